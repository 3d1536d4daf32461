//! Static domain descriptors for the five crontab fields.

use std::fmt;

const MONTH_NAMES: &[&str] = &[
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

const DAY_OF_WEEK_NAMES: &[&str] = &[
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// One of the five crontab field domains, in expression order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrontabFieldKind {
    /// 0–59
    Minute,
    /// 0–23
    Hour,
    /// 1–31, regardless of the month's real length.
    Day,
    /// 1–12, or `January`…`December`.
    Month,
    /// 0–6 with 0 = Sunday, or `Sunday`…`Saturday`.
    DayOfWeek,
}

impl CrontabFieldKind {
    /// All kinds in the order they appear in an expression.
    pub const ALL: [CrontabFieldKind; 5] = [
        CrontabFieldKind::Minute,
        CrontabFieldKind::Hour,
        CrontabFieldKind::Day,
        CrontabFieldKind::Month,
        CrontabFieldKind::DayOfWeek,
    ];

    pub const fn min_value(self) -> u32 {
        match self {
            CrontabFieldKind::Minute | CrontabFieldKind::Hour | CrontabFieldKind::DayOfWeek => 0,
            CrontabFieldKind::Day | CrontabFieldKind::Month => 1,
        }
    }

    pub const fn max_value(self) -> u32 {
        match self {
            CrontabFieldKind::Minute => 59,
            CrontabFieldKind::Hour => 23,
            CrontabFieldKind::Day => 31,
            CrontabFieldKind::Month => 12,
            CrontabFieldKind::DayOfWeek => 6,
        }
    }

    /// Number of distinct values in the domain.
    pub const fn value_count(self) -> u32 {
        self.max_value() - self.min_value() + 1
    }

    /// Name table indexed by `value - min_value()`, if the field has one.
    pub const fn names(self) -> Option<&'static [&'static str]> {
        match self {
            CrontabFieldKind::Month => Some(MONTH_NAMES),
            CrontabFieldKind::DayOfWeek => Some(DAY_OF_WEEK_NAMES),
            _ => None,
        }
    }

    /// Resolve a value name by case-insensitive prefix.
    ///
    /// An exact name always wins; otherwise the prefix must match exactly one
    /// name. Returns `None` for kinds without a name table.
    pub(crate) fn lookup_name(self, text: &str) -> Option<NameLookup> {
        let names = self.names()?;
        let wanted = text.to_ascii_lowercase();

        if let Some(index) = names.iter().position(|n| n.to_ascii_lowercase() == wanted) {
            return Some(NameLookup::Found(self.min_value() + index as u32));
        }

        let matches: Vec<usize> = names
            .iter()
            .enumerate()
            .filter(|(_, n)| n.to_ascii_lowercase().starts_with(&wanted))
            .map(|(i, _)| i)
            .collect();

        Some(match matches.as_slice() {
            [] => NameLookup::Unknown,
            [index] => NameLookup::Found(self.min_value() + *index as u32),
            many => NameLookup::Ambiguous(many.iter().map(|&i| names[i]).collect()),
        })
    }
}

/// Outcome of [`CrontabFieldKind::lookup_name`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NameLookup {
    Found(u32),
    Unknown,
    Ambiguous(Vec<&'static str>),
}

impl fmt::Display for CrontabFieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CrontabFieldKind::Minute => "minute",
            CrontabFieldKind::Hour => "hour",
            CrontabFieldKind::Day => "day",
            CrontabFieldKind::Month => "month",
            CrontabFieldKind::DayOfWeek => "day of week",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domains_fit_in_a_u64_mask() {
        for kind in CrontabFieldKind::ALL {
            assert!(kind.value_count() <= 64, "{kind} has too many values");
        }
    }

    #[test]
    fn name_tables_match_domain_size() {
        for kind in CrontabFieldKind::ALL {
            if let Some(names) = kind.names() {
                assert_eq!(names.len() as u32, kind.value_count());
            }
        }
    }

    #[test]
    fn exact_and_unique_prefix_lookup() {
        let dow = CrontabFieldKind::DayOfWeek;
        assert_eq!(dow.lookup_name("MON"), Some(NameLookup::Found(1)));
        assert_eq!(dow.lookup_name("friday"), Some(NameLookup::Found(5)));
        assert_eq!(dow.lookup_name("th"), Some(NameLookup::Found(4)));

        let month = CrontabFieldKind::Month;
        assert_eq!(month.lookup_name("may"), Some(NameLookup::Found(5)));
        assert_eq!(month.lookup_name("Dec"), Some(NameLookup::Found(12)));
    }

    #[test]
    fn ambiguous_and_unknown_names() {
        assert_eq!(
            CrontabFieldKind::Month.lookup_name("ju"),
            Some(NameLookup::Ambiguous(vec!["June", "July"]))
        );
        assert_eq!(
            CrontabFieldKind::DayOfWeek.lookup_name("xyz"),
            Some(NameLookup::Unknown)
        );
        assert_eq!(CrontabFieldKind::Hour.lookup_name("noon"), None);
    }
}
