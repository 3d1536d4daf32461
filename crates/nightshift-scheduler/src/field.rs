//! A parsed crontab field: the set of values one field matches.
//!
//! Each comma-separated term of a field (`*`, `a`, `a-b`, each with an
//! optional `/step`) reduces to a `(start, end, interval)` triple that is fed
//! to an accumulator setting bits in a fixed-size mask. Bit `i` stands for the
//! value `i + kind.min_value()`.

use std::fmt;

use crate::error::{CrontabError, FieldValueError};
use crate::field_kind::{CrontabFieldKind, NameLookup};

/// The value set of one crontab field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CrontabField {
    kind: CrontabFieldKind,
    bits: u64,
    /// Lowest value actually set (not the domain bound).
    min_value_set: Option<u32>,
    /// Highest value actually set (not the domain bound).
    max_value_set: Option<u32>,
}

impl CrontabField {
    /// A field of `kind` that matches nothing.
    pub fn empty(kind: CrontabFieldKind) -> Self {
        Self {
            kind,
            bits: 0,
            min_value_set: None,
            max_value_set: None,
        }
    }

    /// Parse a comma-separated field expression such as `*/15`, `1-5` or
    /// `MON,WED,FRI`.
    pub fn parse(kind: CrontabFieldKind, expression: &str) -> Result<Self, CrontabError> {
        let mut field = Self::empty(kind);
        parse_terms(kind, expression, &mut |start, end, interval| {
            field.accumulate(start, end, interval)
        })
        .map_err(|source| CrontabError::Field {
            kind,
            expression: expression.to_string(),
            source,
        })?;
        Ok(field)
    }

    pub fn kind(&self) -> CrontabFieldKind {
        self.kind
    }

    /// Lowest value in the set, or `None` if the set is empty.
    pub fn first(&self) -> Option<u32> {
        self.min_value_set
    }

    /// Smallest value in the set that is `>= start`.
    pub fn next(&self, start: u32) -> Option<u32> {
        let (lowest, highest) = (self.min_value_set?, self.max_value_set?);
        if start <= lowest {
            return Some(lowest);
        }
        if start > highest {
            return None;
        }
        let remaining = self.bits >> (start - self.kind.min_value());
        (remaining != 0).then(|| start + remaining.trailing_zeros())
    }

    /// Whether `value` is in the set. Values outside the domain never are.
    pub fn contains(&self, value: u32) -> bool {
        if value < self.kind.min_value() || value > self.kind.max_value() {
            return false;
        }
        self.bits & (1u64 << (value - self.kind.min_value())) != 0
    }

    /// Render the set back into field syntax.
    ///
    /// Runs of consecutive values collapse into `a-b`; a set covering the
    /// whole domain renders as `*`. Month and weekday values render by name
    /// unless `numeric_only` is set.
    pub fn format(&self, numeric_only: bool) -> String {
        let (min, max) = (self.kind.min_value(), self.kind.max_value());
        let mut out = String::new();
        let mut next = self.first();
        let mut runs = 0;

        while let Some(first) = next {
            let mut last = first;
            next = self.next(last + 1);
            while next == Some(last + 1) {
                last += 1;
                next = self.next(last + 1);
            }

            if runs == 0 && first == min && last == max {
                return "*".to_string();
            }
            if runs > 0 {
                out.push(',');
            }
            self.push_value(&mut out, first, numeric_only);
            if first != last {
                out.push('-');
                self.push_value(&mut out, last, numeric_only);
            }
            runs += 1;
        }

        out
    }

    fn push_value(&self, out: &mut String, value: u32, numeric_only: bool) {
        match self.kind.names() {
            Some(names) if !numeric_only => {
                out.push_str(names[(value - self.kind.min_value()) as usize]);
            }
            _ if value < 100 => {
                // Two-digit fast path; every crontab domain lands here.
                if value >= 10 {
                    out.push(char::from(b'0' + (value / 10) as u8));
                }
                out.push(char::from(b'0' + (value % 10) as u8));
            }
            _ => out.push_str(&value.to_string()),
        }
    }

    /// Merge one `(start, end, interval)` triple into the set.
    ///
    /// `None` bounds are open and clamp to the domain. A single value
    /// (`start == end`) must lie inside the domain; a range has its bounds
    /// swapped if reversed and its closed ends validated.
    fn accumulate(
        &mut self,
        start: Option<u32>,
        end: Option<u32>,
        interval: u32,
    ) -> Result<(), FieldValueError> {
        let (min, max) = (self.kind.min_value(), self.kind.max_value());

        let (start, end) = match (start, end) {
            (None, None) => (min, max),
            (Some(value), Some(same)) if value == same => {
                self.check_bounds(value)?;
                (value, value)
            }
            (start, end) => {
                let (start, end) = match (start, end) {
                    (Some(a), Some(b)) if a > b => (Some(b), Some(a)),
                    other => other,
                };
                let start = match start {
                    None => min,
                    Some(v) if v < min => {
                        return Err(FieldValueError::BelowMinimum { value: v, min, max })
                    }
                    Some(v) => v,
                };
                let end = match end {
                    None => max,
                    Some(v) if v > max => {
                        return Err(FieldValueError::AboveMaximum { value: v, min, max })
                    }
                    Some(v) => v,
                };
                (start, end)
            }
        };

        let interval = interval.max(1);
        let mut value = start;
        let mut last = start;
        while value <= end {
            self.bits |= 1u64 << (value - min);
            last = value;
            match value.checked_add(interval) {
                Some(next) => value = next,
                None => break,
            }
        }

        self.min_value_set = Some(self.min_value_set.map_or(start, |v| v.min(start)));
        self.max_value_set = Some(self.max_value_set.map_or(last, |v| v.max(last)));
        Ok(())
    }

    fn check_bounds(&self, value: u32) -> Result<(), FieldValueError> {
        let (min, max) = (self.kind.min_value(), self.kind.max_value());
        if value < min {
            return Err(FieldValueError::BelowMinimum { value, min, max });
        }
        if value > max {
            return Err(FieldValueError::AboveMaximum { value, min, max });
        }
        Ok(())
    }
}

impl fmt::Display for CrontabField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format(false))
    }
}

// ---------------------------------------------------------------------------
// Term grammar
// ---------------------------------------------------------------------------

fn parse_terms<F>(
    kind: CrontabFieldKind,
    expression: &str,
    accumulate: &mut F,
) -> Result<(), FieldValueError>
where
    F: FnMut(Option<u32>, Option<u32>, u32) -> Result<(), FieldValueError>,
{
    if expression.is_empty() {
        return Err(FieldValueError::Empty);
    }
    for term in expression.split(',') {
        parse_term(kind, term, accumulate)?;
    }
    Ok(())
}

fn parse_term<F>(kind: CrontabFieldKind, term: &str, accumulate: &mut F) -> Result<(), FieldValueError>
where
    F: FnMut(Option<u32>, Option<u32>, u32) -> Result<(), FieldValueError>,
{
    if term.is_empty() {
        return Err(FieldValueError::Empty);
    }

    let (body, every) = match term.split_once('/') {
        Some((body, step)) => (body, parse_step(step)?),
        None => (term, 1),
    };

    if body == "*" {
        return accumulate(None, None, every);
    }

    if let Some((first, last)) = body.split_once('-') {
        let first = parse_value(kind, first)?;
        let last = parse_value(kind, last)?;
        return accumulate(Some(first), Some(last), every);
    }

    let value = parse_value(kind, body)?;
    if every == 1 {
        accumulate(Some(value), Some(value), 1)
    } else {
        accumulate(Some(value), Some(kind.max_value()), every)
    }
}

fn parse_step(text: &str) -> Result<u32, FieldValueError> {
    text.parse().map_err(|_| FieldValueError::InvalidStep {
        value: text.to_string(),
    })
}

fn parse_value(kind: CrontabFieldKind, text: &str) -> Result<u32, FieldValueError> {
    let first = text.chars().next().ok_or(FieldValueError::Empty)?;

    let not_numeric = || FieldValueError::NotNumeric {
        value: text.to_string(),
        min: kind.min_value(),
        max: kind.max_value(),
    };

    if first.is_ascii_digit() {
        return text.parse().map_err(|_| not_numeric());
    }

    match kind.lookup_name(text) {
        None => Err(not_numeric()),
        Some(NameLookup::Found(value)) => Ok(value),
        Some(NameLookup::Unknown) => Err(FieldValueError::UnknownName {
            value: text.to_string(),
            names: kind.names().unwrap_or_default().join(", "),
        }),
        Some(NameLookup::Ambiguous(candidates)) => Err(FieldValueError::AmbiguousName {
            value: text.to_string(),
            candidates: candidates.join(", "),
        }),
    }
}
