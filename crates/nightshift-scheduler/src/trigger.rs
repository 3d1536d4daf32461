use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::schedule::CrontabSchedule;

/// Defines when a project build should be started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// Fire repeatedly with a fixed interval in seconds.
    Interval { every_secs: u64 },

    /// Fire on every occurrence of a crontab expression.
    Cron { expression: CrontabSchedule },
}

impl Trigger {
    /// Build a cron trigger from expression text.
    pub fn cron(expression: &str) -> crate::error::Result<Self> {
        Ok(Trigger::Cron {
            expression: CrontabSchedule::parse(expression)?,
        })
    }

    /// Next fire time strictly after `from`. See [`compute_next_fire`].
    pub fn next_fire(&self, from: NaiveDateTime) -> Option<NaiveDateTime> {
        compute_next_fire(self, from)
    }
}

/// Compute the next fire time for `trigger` strictly after `from`.
///
/// Returns `None` when the trigger has no future fire time (a cron
/// expression that never matches again).
pub fn compute_next_fire(trigger: &Trigger, from: NaiveDateTime) -> Option<NaiveDateTime> {
    match trigger {
        // A zero interval would fire on every tick; treat it as one second.
        Trigger::Interval { every_secs } => {
            let secs = i64::try_from((*every_secs).max(1)).unwrap_or(i64::MAX);
            from.checked_add_signed(Duration::try_seconds(secs)?)
        }
        Trigger::Cron { expression } => expression.next_occurrence_after(from),
    }
}
