//! `nightshift-scheduler` — crontab evaluation and build triggers.
//!
//! # Overview
//!
//! A [`CrontabSchedule`] is parsed from a classic five-field expression
//! (`minute hour day month day-of-week`) and answers "when is the next
//! occurrence after this instant?". Each field is a [`CrontabField`]: a bit
//! set over the field's [`CrontabFieldKind`] domain.
//!
//! [`TriggerEngine`] polls a table of named [`Trigger`]s and reports every
//! fire on an mpsc channel; the table is managed through a cloneable
//! [`TriggerHandle`] while the engine loop runs.
//!
//! # Field syntax
//!
//! | Term      | Meaning                                           |
//! |-----------|---------------------------------------------------|
//! | `*`       | every value in the domain                         |
//! | `a`       | the single value `a`                              |
//! | `a-b`     | `a` through `b` inclusive                         |
//! | `x/N`     | any of the above, every `N`th value               |
//! | `a,b,...` | union of terms                                    |
//!
//! Months (`jan`…) and weekdays (`sun`…) may be given by unique prefix.
//! Day-of-month and day-of-week are combined with AND.

pub mod engine;
pub mod error;
pub mod field;
pub mod field_kind;
pub mod schedule;
pub mod trigger;
pub mod types;

pub use engine::{TriggerEngine, TriggerHandle};
pub use error::{CrontabError, FieldValueError, Result, SchedulerError};
pub use field::CrontabField;
pub use field_kind::CrontabFieldKind;
pub use schedule::{CrontabSchedule, Occurrences};
pub use trigger::{compute_next_fire, Trigger};
pub use types::{FiredTrigger, TriggerState};
