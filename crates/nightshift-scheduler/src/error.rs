use thiserror::Error;

use crate::field_kind::CrontabFieldKind;

/// Why a single crontab field term was rejected.
///
/// Always carried as the `source` of a [`CrontabError::Field`], which names
/// the complete field text the term came from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldValueError {
    #[error("a crontab field value cannot be empty")]
    Empty,

    #[error(
        "'{value}' is not a valid value for this crontab field; \
         it must be a numeric value between {min} and {max} (all inclusive)"
    )]
    NotNumeric { value: String, min: u32, max: u32 },

    #[error("'{value}' is not a known value name; use one of the following: {names}")]
    UnknownName { value: String, names: String },

    #[error("'{value}' is ambiguous; it matches {candidates}")]
    AmbiguousName { value: String, candidates: String },

    #[error("'{value}' is not a valid step; it must be a non-negative number")]
    InvalidStep { value: String },

    #[error(
        "{value} is lower than the minimum allowable value for this field; \
         value must be between {min} and {max} (all inclusive)"
    )]
    BelowMinimum { value: u32, min: u32, max: u32 },

    #[error(
        "{value} is higher than the maximum allowable value for this field; \
         value must be between {min} and {max} (all inclusive)"
    )]
    AboveMaximum { value: u32, min: u32, max: u32 },
}

/// Errors raised while parsing a crontab expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CrontabError {
    /// One of the five fields could not be parsed.
    #[error("'{expression}' is not a valid crontab {kind} field expression")]
    Field {
        kind: CrontabFieldKind,
        expression: String,
        #[source]
        source: FieldValueError,
    },

    /// The expression did not split into exactly five fields.
    #[error(
        "'{expression}' is not a valid crontab expression; it must contain 5 fields \
         (minute, hour, day, month, day of week) but has {found}"
    )]
    FieldCount { expression: String, found: usize },
}

/// Errors that can occur within the trigger subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The cron expression backing a trigger is invalid.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(#[from] CrontabError),

    /// A trigger with this name is already registered.
    #[error("Trigger already registered: {name}")]
    DuplicateTrigger { name: String },

    /// No trigger with the given name exists.
    #[error("Trigger not found: {name}")]
    TriggerNotFound { name: String },

    /// The trigger has no future fire time at all.
    #[error("Trigger never fires: {name}")]
    NeverFires { name: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
