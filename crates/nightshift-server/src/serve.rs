//! `nightshift serve`: wire configured project triggers to the build runner.

use std::sync::Arc;

use nightshift_core::NightshiftConfig;
use nightshift_process::{ProcessExecutor, ProcessMonitor};
use nightshift_scheduler::{FiredTrigger, TriggerEngine, TriggerHandle};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::runner::{BuildOutcome, BuildRunner};

/// Capacity of the fired-trigger channel between engine and runner.
const FIRED_CHANNEL_CAPACITY: usize = 256;

pub async fn run(config: NightshiftConfig) -> anyhow::Result<()> {
    if config.projects.is_empty() {
        warn!("no projects configured, nothing will be built");
    }

    let triggers = TriggerHandle::new();
    for project in &config.projects {
        let state = triggers.add(&project.name, project.trigger.clone())?;
        info!(
            project = %project.name,
            next_fire = ?state.next_fire,
            tasks = project.tasks.len(),
            "project scheduled"
        );
    }

    let monitor = Arc::new(ProcessMonitor::new(config.executor.monitor_lock_timeout()));
    let executor = ProcessExecutor::new(monitor);
    let runner = Arc::new(BuildRunner::new(
        executor,
        config.projects.iter().cloned(),
        &config.executor,
    ));

    // Fired-trigger channel: TriggerEngine → build loop
    let (fired_tx, mut fired_rx) = mpsc::channel::<FiredTrigger>(FIRED_CHANNEL_CAPACITY);
    let engine = TriggerEngine::new(&triggers, Some(fired_tx), config.server.poll_interval());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine_task = tokio::spawn(engine.run(shutdown_rx));

    info!(projects = config.projects.len(), "nightshift serving");

    let mut builds = JoinSet::new();
    loop {
        tokio::select! {
            fired = fired_rx.recv() => {
                let Some(fired) = fired else {
                    warn!("trigger engine stopped unexpectedly");
                    break;
                };
                info!(project = %fired.name, scheduled_for = %fired.scheduled_for, "trigger fired");
                if let Some(build) = runner.start(&fired.name) {
                    builds.spawn(build);
                }
            }
            Some(joined) = builds.join_next(), if !builds.is_empty() => {
                match joined {
                    Ok(report) if report.outcome == BuildOutcome::Succeeded => {}
                    Ok(report) => info!(project = %report.project, outcome = ?report.outcome, "build finished"),
                    Err(e) => warn!("build task panicked: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
        }
    }

    // signal the engine to stop, then cancel and drain running builds
    let _ = shutdown_tx.send(true);
    let cancelled = runner.cancel_all();
    if !cancelled.is_empty() {
        info!(projects = ?cancelled, "cancelling running builds");
    }
    while let Some(joined) = builds.join_next().await {
        if let Err(e) = joined {
            warn!("build task panicked: {e}");
        }
    }
    let _ = engine_task.await;
    info!("nightshift stopped");
    Ok(())
}
