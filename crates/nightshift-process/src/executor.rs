//! `ProcessExecutor`: the entry point callers use to run one build step and
//! to abort the step currently running for a project.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    error::Result,
    monitor::{ProcessMonitor, Registration},
    runnable::RunnableProcess,
    types::{OutputLine, ProcessInfo, ProcessResult},
};

/// Runs processes under supervision and tracks them in a shared
/// [`ProcessMonitor`]. Cheap to clone.
#[derive(Clone)]
pub struct ProcessExecutor {
    monitor: Arc<ProcessMonitor>,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new(Arc::new(ProcessMonitor::default()))
    }
}

impl ProcessExecutor {
    pub fn new(monitor: Arc<ProcessMonitor>) -> Self {
        Self { monitor }
    }

    pub fn monitor(&self) -> &Arc<ProcessMonitor> {
        &self.monitor
    }

    /// Run `info` for `project` and wait until it exits, times out or is
    /// killed.
    ///
    /// # Errors
    ///
    /// - `Spawn`: the process could not be started.
    /// - `Cancelled`: `cancel` fired; the process was killed first.
    /// - `KillNotConfirmed`: a killed process was not reaped in time.
    /// - `MonitorBusy`: the registry could not be locked.
    pub async fn execute(
        &self,
        info: &ProcessInfo,
        project: &str,
        cancel: &CancellationToken,
    ) -> Result<ProcessResult> {
        self.run(info, project, cancel, None).await
    }

    /// Like [`execute`](Self::execute), additionally publishing every output
    /// line on `sender` while the process runs.
    pub async fn execute_streaming(
        &self,
        info: &ProcessInfo,
        project: &str,
        cancel: &CancellationToken,
        sender: mpsc::Sender<OutputLine>,
    ) -> Result<ProcessResult> {
        self.run(info, project, cancel, Some(sender)).await
    }

    /// Kill the process currently running for `project`, if any.
    pub async fn abort_for(&self, project: &str) -> Result<bool> {
        self.monitor.abort(project).await
    }

    async fn run(
        &self,
        info: &ProcessInfo,
        project: &str,
        cancel: &CancellationToken,
        sink: Option<mpsc::Sender<OutputLine>>,
    ) -> Result<ProcessResult> {
        let started = Instant::now();
        let registration = self.monitor.register(project, info.filename()).await?;
        let mut guard = RegistrationGuard {
            monitor: Arc::clone(&self.monitor),
            registration,
            released: false,
        };

        let outcome = self
            .supervise(info, project, cancel, sink, &guard.registration)
            .await;

        if let Err(e) = guard.release().await {
            warn!(project = %project, "failed to unregister process: {e}");
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(result) => info!(
                project = %project,
                exit_code = result.exit_code(),
                timed_out = result.timed_out(),
                succeeded = result.succeeded(),
                elapsed_ms,
                "process finished"
            ),
            Err(e) => warn!(project = %project, elapsed_ms, "process failed: {e}"),
        }
        outcome
    }

    async fn supervise(
        &self,
        info: &ProcessInfo,
        project: &str,
        cancel: &CancellationToken,
        sink: Option<mpsc::Sender<OutputLine>>,
        registration: &Registration,
    ) -> Result<ProcessResult> {
        let process = RunnableProcess::start(info.clone(), project, sink)?;
        if let Some(pid) = process.pid() {
            if let Err(e) = self.monitor.set_pid(registration, pid).await {
                warn!(project = %project, pid, "failed to record pid: {e}");
            }
        }
        process.run(cancel, registration.abort_token()).await
    }
}

/// Keeps the monitor entry tied to the invocation: if the `execute` future
/// is dropped before it finishes, the entry is released on drop.
struct RegistrationGuard {
    monitor: Arc<ProcessMonitor>,
    registration: Registration,
    released: bool,
}

impl RegistrationGuard {
    async fn release(&mut self) -> Result<bool> {
        let removed = self.monitor.unregister(&self.registration).await?;
        self.released = true;
        Ok(removed)
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        if !self.released {
            self.monitor.release(self.registration.clone());
        }
    }
}
