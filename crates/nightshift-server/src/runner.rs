//! `BuildRunner`: turns trigger fires into builds, at most one per project
//! at a time.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::{mapref::entry::Entry, DashMap};
use nightshift_core::{ExecutorConfig, ProjectConfig};
use nightshift_process::{OutputChannel, OutputLine, ProcessError, ProcessExecutor};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a build ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Succeeded,
    /// Task `task` exited with a code outside its success list.
    Failed { task: usize, exit_code: i32 },
    TimedOut { task: usize },
    Cancelled,
    /// Task `task` could not be supervised (spawn failure, kill failure).
    Error { task: usize, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub project: String,
    pub outcome: BuildOutcome,
}

pub struct BuildRunner {
    executor: ProcessExecutor,
    projects: HashMap<String, Arc<ProjectConfig>>,
    /// Cancel tokens of the builds in flight, keyed by project name.
    active: DashMap<String, CancellationToken>,
    default_timeout: Duration,
    output_buffer: usize,
}

impl BuildRunner {
    pub fn new(
        executor: ProcessExecutor,
        projects: impl IntoIterator<Item = ProjectConfig>,
        config: &ExecutorConfig,
    ) -> Self {
        Self {
            executor,
            projects: projects
                .into_iter()
                .map(|p| (p.name.clone(), Arc::new(p)))
                .collect(),
            active: DashMap::new(),
            default_timeout: config.default_timeout(),
            output_buffer: config.output_buffer.max(1),
        }
    }

    /// Start a build of `project` unless one is already running.
    ///
    /// Returns the build future to drive, or `None` if the fire is skipped.
    pub fn start(
        self: &Arc<Self>,
        project: &str,
    ) -> Option<impl Future<Output = BuildReport> + Send + 'static> {
        let Some(config) = self.projects.get(project).cloned() else {
            warn!(project = %project, "trigger fired for unknown project");
            return None;
        };

        let cancel = CancellationToken::new();
        match self.active.entry(project.to_string()) {
            Entry::Occupied(_) => {
                info!(project = %project, "build already running, fire skipped");
                return None;
            }
            Entry::Vacant(slot) => {
                slot.insert(cancel.clone());
            }
        }

        let runner = Arc::clone(self);
        Some(async move {
            let outcome = runner.build(&config, &cancel).await;
            runner.active.remove(&config.name);
            BuildReport {
                project: config.name.clone(),
                outcome,
            }
        })
    }

    /// Cancel every build in flight. Returns the affected project names.
    pub fn cancel_all(&self) -> Vec<String> {
        self.active
            .iter()
            .map(|entry| {
                entry.value().cancel();
                entry.key().clone()
            })
            .collect()
    }

    pub fn is_building(&self, project: &str) -> bool {
        self.active.contains_key(project)
    }

    async fn build(&self, project: &ProjectConfig, cancel: &CancellationToken) -> BuildOutcome {
        let infos = project.process_infos(self.default_timeout);
        info!(project = %project.name, tasks = infos.len(), "build started");

        for (task, info) in infos.iter().enumerate() {
            let (tx, rx) = mpsc::channel(self.output_buffer);
            let logger = tokio::spawn(log_output(rx));
            let outcome = self
                .executor
                .execute_streaming(info, &project.name, cancel, tx)
                .await;
            let _ = logger.await;

            let result = match outcome {
                Ok(result) => result,
                Err(ProcessError::Cancelled) => {
                    info!(project = %project.name, task, "build cancelled");
                    return BuildOutcome::Cancelled;
                }
                Err(e) => {
                    warn!(project = %project.name, task, "build task error: {e}");
                    return BuildOutcome::Error {
                        task,
                        message: e.to_string(),
                    };
                }
            };

            if result.timed_out() {
                warn!(project = %project.name, task, "build task timed out");
                return BuildOutcome::TimedOut { task };
            }
            if !result.succeeded() {
                warn!(
                    project = %project.name,
                    task,
                    exit_code = result.exit_code(),
                    "build task failed"
                );
                return BuildOutcome::Failed {
                    task,
                    exit_code: result.exit_code(),
                };
            }
        }

        info!(project = %project.name, "build succeeded");
        BuildOutcome::Succeeded
    }
}

async fn log_output(mut rx: mpsc::Receiver<OutputLine>) {
    while let Some(output) = rx.recv().await {
        match output.channel {
            OutputChannel::StandardOutput => {
                debug!(project = %output.project, "{}", output.line)
            }
            OutputChannel::ErrorOutput => {
                info!(project = %output.project, channel = %output.channel, "{}", output.line)
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use nightshift_core::TaskConfig;
    use nightshift_process::PriorityClass;
    use nightshift_scheduler::Trigger;
    use std::collections::BTreeMap;
    use std::path::Path;

    fn task(script: &str) -> TaskConfig {
        TaskConfig {
            executable: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            secret_args: vec![],
            timeout_ms: None,
            success_exit_codes: vec![],
            env: BTreeMap::new(),
            priority: PriorityClass::Normal,
            stdin: None,
        }
    }

    fn project(name: &str, dir: &Path, tasks: Vec<TaskConfig>) -> ProjectConfig {
        ProjectConfig {
            name: name.to_string(),
            working_directory: dir.to_path_buf(),
            trigger: Trigger::Interval { every_secs: 60 },
            tasks,
        }
    }

    fn runner(projects: Vec<ProjectConfig>) -> Arc<BuildRunner> {
        Arc::new(BuildRunner::new(
            ProcessExecutor::default(),
            projects,
            &ExecutorConfig::default(),
        ))
    }

    #[tokio::test]
    async fn tasks_run_in_order_until_one_fails() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(vec![project(
            "api",
            dir.path(),
            vec![
                task("touch first"),
                task("exit 2"),
                task("touch never"),
            ],
        )]);

        let report = runner.start("api").unwrap().await;
        assert_eq!(
            report.outcome,
            BuildOutcome::Failed {
                task: 1,
                exit_code: 2
            }
        );
        assert!(dir.path().join("first").exists());
        assert!(!dir.path().join("never").exists());
        assert!(!runner.is_building("api"));
    }

    #[tokio::test]
    async fn second_fire_is_skipped_while_building() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(vec![project("web", dir.path(), vec![task("sleep 0.3")])]);

        let first = runner.start("web").unwrap();
        assert!(runner.is_building("web"));
        assert!(runner.start("web").is_none());

        assert_eq!(first.await.outcome, BuildOutcome::Succeeded);
        assert!(runner.start("web").is_some());
    }

    #[tokio::test]
    async fn cancel_all_stops_running_builds() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(vec![project("slow", dir.path(), vec![task("sleep 5")])]);

        let build = tokio::spawn(runner.start("slow").unwrap());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runner.cancel_all(), vec!["slow".to_string()]);

        let report = tokio::time::timeout(Duration::from_secs(4), build)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.outcome, BuildOutcome::Cancelled);
    }

    #[tokio::test]
    async fn unknown_project_is_ignored() {
        let runner = runner(vec![]);
        assert!(runner.start("ghost").is_none());
    }
}
