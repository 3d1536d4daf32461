//! `ProcessMonitor`: registry of the process currently running for each
//! project, used to abort a build by project name.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ProcessError, Result};

/// Default bound on how long registry operations wait for the lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

struct MonitorEntry {
    id: Uuid,
    filename: String,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    abort: CancellationToken,
}

/// Proof of a registry entry, handed back to `unregister`.
///
/// Removal only succeeds while the entry still carries this registration's
/// id, so a stale registration cannot remove a newer process's entry.
#[derive(Debug, Clone)]
pub struct Registration {
    project: String,
    id: Uuid,
    abort: CancellationToken,
}

impl Registration {
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Fires when `abort` is called for this project.
    pub fn abort_token(&self) -> &CancellationToken {
        &self.abort
    }
}

/// Snapshot of one running process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunningProcess {
    pub project: String,
    pub filename: String,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
}

/// Project name to running process map, guarded by an async mutex that is
/// only ever acquired with a bounded wait.
pub struct ProcessMonitor {
    entries: Mutex<HashMap<String, MonitorEntry>>,
    lock_timeout: Duration,
}

impl Default for ProcessMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

impl ProcessMonitor {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            lock_timeout,
        }
    }

    async fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, MonitorEntry>>> {
        tokio::time::timeout(self.lock_timeout, self.entries.lock())
            .await
            .map_err(|_| ProcessError::MonitorBusy {
                waited: self.lock_timeout,
            })
    }

    /// Record that `filename` is about to run for `project`.
    ///
    /// An existing entry for the same project is replaced; callers are
    /// expected to run at most one process per project at a time.
    pub async fn register(&self, project: &str, filename: &str) -> Result<Registration> {
        let registration = Registration {
            project: project.to_string(),
            id: Uuid::new_v4(),
            abort: CancellationToken::new(),
        };
        let entry = MonitorEntry {
            id: registration.id,
            filename: filename.to_string(),
            pid: None,
            started_at: Utc::now(),
            abort: registration.abort.clone(),
        };

        let mut entries = self.lock().await?;
        if let Some(previous) = entries.insert(project.to_string(), entry) {
            warn!(
                project = %project,
                previous = %previous.filename,
                "replacing monitor entry of a process that is still registered"
            );
        }
        debug!(project = %project, id = %registration.id, "process registered");
        Ok(registration)
    }

    /// Attach the OS process id once the process has been spawned.
    pub async fn set_pid(&self, registration: &Registration, pid: u32) -> Result<()> {
        let mut entries = self.lock().await?;
        if let Some(entry) = entries
            .get_mut(&registration.project)
            .filter(|e| e.id == registration.id)
        {
            entry.pid = Some(pid);
        }
        Ok(())
    }

    /// Remove the entry created by `registration`. Returns `false` if the
    /// entry was already gone or has been replaced.
    pub async fn unregister(&self, registration: &Registration) -> Result<bool> {
        let mut entries = self.lock().await?;
        Ok(remove_owned(&mut entries, registration))
    }

    /// Remove the entry created by `registration` without awaiting.
    ///
    /// Used from `Drop`. If the lock is contended the removal is handed to a
    /// task on the current runtime.
    pub fn release(self: &Arc<Self>, registration: Registration) {
        if let Ok(mut entries) = self.entries.try_lock() {
            remove_owned(&mut entries, &registration);
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let monitor = Arc::clone(self);
                handle.spawn(async move {
                    if let Err(e) = monitor.unregister(&registration).await {
                        warn!(project = %registration.project, "failed to release monitor entry: {e}");
                    }
                });
            }
            Err(_) => warn!(
                project = %registration.project,
                "monitor entry left behind, no runtime to release it"
            ),
        }
    }

    /// Fire the abort signal of the process running for `project`.
    ///
    /// Returns `false` when nothing is registered under that name.
    pub async fn abort(&self, project: &str) -> Result<bool> {
        let entries = self.lock().await?;
        match entries.get(project) {
            Some(entry) => {
                info!(project = %project, pid = ?entry.pid, "aborting process");
                entry.abort.cancel();
                Ok(true)
            }
            None => {
                info!(project = %project, "abort requested but no process is running");
                Ok(false)
            }
        }
    }

    pub async fn is_running(&self, project: &str) -> Result<bool> {
        Ok(self.lock().await?.contains_key(project))
    }

    /// Snapshot of all registered processes ordered by project name.
    pub async fn running(&self) -> Result<Vec<RunningProcess>> {
        let entries = self.lock().await?;
        let mut list: Vec<RunningProcess> = entries
            .iter()
            .map(|(project, e)| RunningProcess {
                project: project.clone(),
                filename: e.filename.clone(),
                pid: e.pid,
                started_at: e.started_at,
            })
            .collect();
        list.sort_by(|a, b| a.project.cmp(&b.project));
        Ok(list)
    }
}

fn remove_owned(entries: &mut HashMap<String, MonitorEntry>, registration: &Registration) -> bool {
    let owned = entries
        .get(&registration.project)
        .is_some_and(|e| e.id == registration.id);
    if owned {
        entries.remove(&registration.project);
        debug!(project = %registration.project, "process unregistered");
    }
    owned
}
