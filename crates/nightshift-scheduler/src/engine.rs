use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::{
    error::{Result, SchedulerError},
    trigger::{compute_next_fire, Trigger},
    types::{FiredTrigger, TriggerState},
};

type TriggerTable = Arc<Mutex<BTreeMap<String, TriggerState>>>;

/// Shared handle for trigger management (list/add/remove) while the engine
/// loop runs.
#[derive(Clone, Default)]
pub struct TriggerHandle {
    triggers: TriggerTable,
}

impl TriggerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `trigger` under `name`, computing its first fire time from
    /// the current local time.
    pub fn add(&self, name: &str, trigger: Trigger) -> Result<TriggerState> {
        self.add_at(name, trigger, now())
    }

    pub(crate) fn add_at(
        &self,
        name: &str,
        trigger: Trigger,
        now: NaiveDateTime,
    ) -> Result<TriggerState> {
        let mut table = lock(&self.triggers);
        if table.contains_key(name) {
            return Err(SchedulerError::DuplicateTrigger {
                name: name.to_string(),
            });
        }

        let next_fire = compute_next_fire(&trigger, now).ok_or_else(|| {
            SchedulerError::NeverFires {
                name: name.to_string(),
            }
        })?;

        let state = TriggerState {
            name: name.to_string(),
            trigger,
            next_fire: Some(next_fire),
            last_fire: None,
            fire_count: 0,
        };
        table.insert(name.to_string(), state.clone());
        info!(trigger = %name, %next_fire, "trigger added");
        Ok(state)
    }

    /// Remove a trigger by name. Returns `TriggerNotFound` if absent.
    pub fn remove(&self, name: &str) -> Result<()> {
        if lock(&self.triggers).remove(name).is_none() {
            return Err(SchedulerError::TriggerNotFound {
                name: name.to_string(),
            });
        }
        info!(trigger = %name, "trigger removed");
        Ok(())
    }

    /// Return all registered triggers ordered by name.
    pub fn list(&self) -> Vec<TriggerState> {
        lock(&self.triggers).values().cloned().collect()
    }
}

/// Drives registered triggers and reports each fire on a channel.
pub struct TriggerEngine {
    triggers: TriggerTable,
    /// If set, fired triggers are sent here.
    fired_tx: Option<mpsc::Sender<FiredTrigger>>,
    poll_interval: Duration,
}

impl TriggerEngine {
    /// Create an engine over the triggers managed by `handle`.
    ///
    /// The sender is non-blocking (`try_send`) so the tick loop is never
    /// stalled by a slow consumer.
    pub fn new(
        handle: &TriggerHandle,
        fired_tx: Option<mpsc::Sender<FiredTrigger>>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            triggers: Arc::clone(&handle.triggers),
            fired_tx,
            poll_interval,
        }
    }

    /// Main event loop. Polls every `poll_interval` until `shutdown`
    /// broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(poll_ms = self.poll_interval.as_millis() as u64, "trigger engine started");

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(now());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("trigger engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Fire every trigger whose next fire time is at or before `now`.
    ///
    /// Returns the triggers fired on this tick.
    pub(crate) fn tick(&self, now: NaiveDateTime) -> Vec<FiredTrigger> {
        let mut fired = Vec::new();
        {
            let mut table = lock(&self.triggers);
            for state in table.values_mut() {
                let Some(scheduled_for) = state.next_fire.filter(|t| *t <= now) else {
                    continue;
                };

                state.fire_count += 1;
                state.last_fire = Some(now);
                // Compute from "now" so a long pause does not cause a burst
                // of catch-up fires.
                state.next_fire = compute_next_fire(&state.trigger, now);

                match state.next_fire {
                    Some(next) => {
                        debug!(trigger = %state.name, %scheduled_for, %next, "trigger fired")
                    }
                    None => info!(trigger = %state.name, "trigger fired for the last time"),
                }

                fired.push(FiredTrigger {
                    name: state.name.clone(),
                    scheduled_for,
                    fired_at: now,
                });
            }
        }

        if let Some(ref tx) = self.fired_tx {
            for event in &fired {
                if tx.try_send(event.clone()).is_err() {
                    warn!(trigger = %event.name, "fired channel full or closed, fire dropped");
                }
            }
        }
        fired
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn lock(table: &TriggerTable) -> MutexGuard<'_, BTreeMap<String, TriggerState>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 20)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn add_computes_first_fire() {
        let handle = TriggerHandle::new();
        let state = handle
            .add_at("nightly", Trigger::cron("0 2 * * *").unwrap(), at(10, 0, 0))
            .unwrap();
        assert_eq!(
            state.next_fire,
            NaiveDate::from_ymd_opt(2024, 5, 21).unwrap().and_hms_opt(2, 0, 0)
        );
        assert_eq!(handle.list().len(), 1);
    }

    #[test]
    fn duplicate_and_missing_names() {
        let handle = TriggerHandle::new();
        let t = Trigger::Interval { every_secs: 60 };
        handle.add_at("a", t.clone(), at(10, 0, 0)).unwrap();
        assert!(matches!(
            handle.add_at("a", t, at(10, 0, 0)),
            Err(SchedulerError::DuplicateTrigger { .. })
        ));
        assert!(matches!(
            handle.remove("b"),
            Err(SchedulerError::TriggerNotFound { .. })
        ));
        handle.remove("a").unwrap();
        assert!(handle.list().is_empty());
    }

    #[test]
    fn trigger_that_never_fires_is_rejected() {
        let handle = TriggerHandle::new();
        let err = handle
            .add_at("never", Trigger::cron("0 0 31 2 *").unwrap(), at(10, 0, 0))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NeverFires { .. }));
    }

    #[test]
    fn tick_fires_due_triggers_only() {
        let handle = TriggerHandle::new();
        handle
            .add_at("fast", Trigger::Interval { every_secs: 30 }, at(10, 0, 0))
            .unwrap();
        handle
            .add_at("slow", Trigger::Interval { every_secs: 3600 }, at(10, 0, 0))
            .unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let engine = TriggerEngine::new(&handle, Some(tx), Duration::from_secs(1));

        assert!(engine.tick(at(10, 0, 10)).is_empty());

        let fired = engine.tick(at(10, 0, 31));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].name, "fast");
        assert_eq!(fired[0].scheduled_for, at(10, 0, 30));

        let delivered = rx.try_recv().unwrap();
        assert_eq!(delivered, fired[0]);

        let fast = handle.list().into_iter().find(|s| s.name == "fast").unwrap();
        assert_eq!(fast.fire_count, 1);
        assert_eq!(fast.next_fire, Some(at(10, 1, 1)));
    }

    #[test]
    fn full_channel_does_not_stall_tick() {
        let handle = TriggerHandle::new();
        handle
            .add_at("a", Trigger::Interval { every_secs: 1 }, at(10, 0, 0))
            .unwrap();
        let (tx, _rx) = mpsc::channel(1);
        let engine = TriggerEngine::new(&handle, Some(tx), Duration::from_secs(1));

        assert_eq!(engine.tick(at(10, 0, 5)).len(), 1);
        // Channel now full; the second fire is logged and dropped.
        assert_eq!(engine.tick(at(10, 0, 10)).len(), 1);
        assert_eq!(handle.list()[0].fire_count, 2);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let handle = TriggerHandle::new();
        let engine = TriggerEngine::new(&handle, None, Duration::from_millis(10));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(engine.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("engine did not stop")
            .unwrap();
    }
}
