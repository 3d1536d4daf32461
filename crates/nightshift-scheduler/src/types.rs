use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::trigger::Trigger;

/// Snapshot of a registered trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerState {
    /// Project (or other consumer) name the trigger belongs to.
    pub name: String,
    /// When and how often it fires.
    pub trigger: Trigger,
    /// Next planned fire time, if any.
    pub next_fire: Option<NaiveDateTime>,
    /// Time of the most recent fire, if any.
    pub last_fire: Option<NaiveDateTime>,
    /// Total number of fires so far.
    pub fire_count: u32,
}

/// Delivered to the consumer each time a trigger comes due.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiredTrigger {
    pub name: String,
    /// The fire time the trigger was scheduled for.
    pub scheduled_for: NaiveDateTime,
    /// When the engine actually noticed it was due.
    pub fired_at: NaiveDateTime,
}
