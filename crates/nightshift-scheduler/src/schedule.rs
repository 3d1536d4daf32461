use std::fmt;
use std::iter::FusedIterator;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CrontabError;
use crate::field::CrontabField;
use crate::field_kind::CrontabFieldKind;

/// Upper bound on day/month re-resolutions for a single occurrence.
///
/// Each retry advances at least one month, so an impossible date such as
/// `30 2` walks one year per retry until it reaches `end`.
const MAX_CALENDAR_RETRIES: usize = 10_000;

/// A parsed five-field crontab expression.
///
/// Day-of-month and day-of-week combine as AND: the day-of-week field is a
/// post-filter on dates that already satisfy the other four fields. This
/// differs from POSIX cron, which ORs the two when both are restricted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CrontabSchedule {
    minutes: CrontabField,
    hours: CrontabField,
    days: CrontabField,
    months: CrontabField,
    days_of_week: CrontabField,
}

impl CrontabSchedule {
    /// Parse `minute hour day month day-of-week`.
    pub fn parse(expression: &str) -> Result<Self, CrontabError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let [minutes, hours, days, months, days_of_week] = fields.as_slice() else {
            return Err(CrontabError::FieldCount {
                expression: expression.to_string(),
                found: fields.len(),
            });
        };

        Ok(Self {
            minutes: CrontabField::parse(CrontabFieldKind::Minute, minutes)?,
            hours: CrontabField::parse(CrontabFieldKind::Hour, hours)?,
            days: CrontabField::parse(CrontabFieldKind::Day, days)?,
            months: CrontabField::parse(CrontabFieldKind::Month, months)?,
            days_of_week: CrontabField::parse(CrontabFieldKind::DayOfWeek, days_of_week)?,
        })
    }

    pub fn minutes(&self) -> &CrontabField {
        &self.minutes
    }

    pub fn hours(&self) -> &CrontabField {
        &self.hours
    }

    pub fn days(&self) -> &CrontabField {
        &self.days
    }

    pub fn months(&self) -> &CrontabField {
        &self.months
    }

    pub fn days_of_week(&self) -> &CrontabField {
        &self.days_of_week
    }

    /// Default horizon for open-ended queries: 9999-12-31 23:59:59.
    pub fn default_end() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(9999, 12, 31)
            .and_then(|d| d.and_hms_opt(23, 59, 59))
            .unwrap_or(NaiveDateTime::MAX)
    }

    /// Earliest minute strictly after `base` that matches all five fields.
    ///
    /// Returns `end` itself when no occurrence exists before `end`; callers
    /// treat a result `>= end` as "no further occurrence". Seconds of `base`
    /// are ignored and the result always has zero seconds.
    pub fn next_occurrence(&self, base: NaiveDateTime, end: NaiveDateTime) -> NaiveDateTime {
        let mut base = base;
        loop {
            let Some(next) = self.resolve(base, end) else {
                return end;
            };
            if next >= end {
                return end;
            }
            if self
                .days_of_week
                .contains(next.weekday().num_days_from_sunday())
            {
                return next;
            }
            // Wrong weekday: start over from the last minute of that day.
            match next.date().and_hms_opt(23, 59, 0) {
                Some(last_minute) => base = last_minute,
                None => return end,
            }
        }
    }

    /// Like [`next_occurrence`](Self::next_occurrence) with the default
    /// horizon, mapping "no occurrence" to `None`.
    pub fn next_occurrence_after(&self, base: NaiveDateTime) -> Option<NaiveDateTime> {
        let end = Self::default_end();
        let next = self.next_occurrence(base, end);
        (next < end).then_some(next)
    }

    /// All occurrences after `base` and before `end`, in order.
    pub fn next_occurrences(&self, base: NaiveDateTime, end: NaiveDateTime) -> Occurrences<'_> {
        Occurrences {
            schedule: self,
            current: base,
            end,
            done: false,
        }
    }

    /// Resolve minute, hour, day and month with carry, ignoring day-of-week.
    ///
    /// `None` means the resolution ran into `end` (or past the calendar).
    fn resolve(&self, base: NaiveDateTime, end: NaiveDateTime) -> Option<NaiveDateTime> {
        let (base_year, base_month, base_day) = (base.year(), base.month(), base.day());
        let (base_hour, base_minute) = (base.hour(), base.minute());

        let first_minute = first_of(&self.minutes);
        let first_hour = first_of(&self.hours);
        let first_day = first_of(&self.days);
        let first_month = first_of(&self.months);

        let mut year = base_year;
        let mut month = base_month;
        let mut day = base_day;
        let mut hour = base_hour;

        let mut minute = match self.minutes.next(base_minute + 1) {
            Some(m) => m,
            None => {
                hour += 1;
                first_minute
            }
        };

        hour = match self.hours.next(hour) {
            Some(h) => {
                if h > base_hour {
                    minute = first_minute;
                }
                h
            }
            None => {
                minute = first_minute;
                day += 1;
                first_hour
            }
        };

        let mut day_candidate = self.days.next(day);

        for _ in 0..MAX_CALENDAR_RETRIES {
            match day_candidate {
                Some(d) => {
                    if d > base_day {
                        minute = first_minute;
                        hour = first_hour;
                    }
                    day = d;
                }
                None => {
                    minute = first_minute;
                    hour = first_hour;
                    day = first_day;
                    month += 1;
                }
            }

            match self.months.next(month) {
                Some(m) => {
                    if m > base_month {
                        minute = first_minute;
                        hour = first_hour;
                        day = first_day;
                    }
                    month = m;
                }
                None => {
                    minute = first_minute;
                    hour = first_hour;
                    day = first_day;
                    month = first_month;
                    year += 1;
                }
            }

            let date_changed = day != base_day || month != base_month || year != base_year;
            if day > 28 && date_changed && day > days_in_month(year, month) {
                if (year, month, day) >= (end.year(), end.month(), end.day()) {
                    return None;
                }
                // The day does not exist in this month; re-resolve day/month.
                day_candidate = None;
                continue;
            }

            return NaiveDate::from_ymd_opt(year, month, day)
                .and_then(|date| date.and_hms_opt(hour, minute, 0));
        }

        None
    }
}

impl fmt::Display for CrontabSchedule {
    /// Canonical numeric form, e.g. `0,15,30,45 * 1-5 * 1-5`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.minutes.format(true),
            self.hours.format(true),
            self.days.format(true),
            self.months.format(true),
            self.days_of_week.format(true),
        )
    }
}

impl FromStr for CrontabSchedule {
    type Err = CrontabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for CrontabSchedule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CrontabSchedule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let expression = String::deserialize(deserializer)?;
        Self::parse(&expression).map_err(serde::de::Error::custom)
    }
}

/// Forward-only sequence of occurrences, from
/// [`CrontabSchedule::next_occurrences`].
#[derive(Debug)]
pub struct Occurrences<'a> {
    schedule: &'a CrontabSchedule,
    current: NaiveDateTime,
    end: NaiveDateTime,
    done: bool,
}

impl Iterator for Occurrences<'_> {
    type Item = NaiveDateTime;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let next = self.schedule.next_occurrence(self.current, self.end);
        if next >= self.end {
            self.done = true;
            return None;
        }
        self.current = next;
        Some(next)
    }
}

impl FusedIterator for Occurrences<'_> {}

/// Parsed fields are never empty; the domain minimum is only a fallback.
fn first_of(field: &CrontabField) -> u32 {
    field.first().unwrap_or_else(|| field.kind().min_value())
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month >= 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map_or(31, |d| d.day())
}
