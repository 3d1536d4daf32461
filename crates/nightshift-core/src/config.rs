use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use nightshift_process::{PriorityClass, ProcessArguments, ProcessInfo};
use nightshift_scheduler::Trigger;
use serde::{Deserialize, Serialize};

use crate::error::{NightshiftError, Result};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_MONITOR_LOCK_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_OUTPUT_BUFFER: usize = 256;
pub const DEFAULT_TASK_TIMEOUT_MS: u64 = 600_000; // 10 minutes
pub const DEFAULT_LOG_FILTER: &str =
    "nightshift_server=info,nightshift_process=info,nightshift_scheduler=info";

/// Environment variable naming the config file when no path is given.
pub const CONFIG_ENV: &str = "NIGHTSHIFT_CONFIG";

/// Top-level config (nightshift.toml + NIGHTSHIFT_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NightshiftConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// How often the trigger engine checks for due projects.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl ServerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_monitor_lock_timeout_ms")]
    pub monitor_lock_timeout_ms: u64,
    /// Capacity of the output line channel.
    #[serde(default = "default_output_buffer")]
    pub output_buffer: usize,
    /// Applied to tasks that set no `timeout_ms` of their own.
    #[serde(default = "default_task_timeout_ms")]
    pub default_timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            monitor_lock_timeout_ms: DEFAULT_MONITOR_LOCK_TIMEOUT_MS,
            output_buffer: DEFAULT_OUTPUT_BUFFER,
            default_timeout_ms: DEFAULT_TASK_TIMEOUT_MS,
        }
    }
}

impl ExecutorConfig {
    pub fn monitor_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.monitor_lock_timeout_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// One project: where it builds, when, and which steps it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    pub working_directory: PathBuf,
    pub trigger: Trigger,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

impl ProjectConfig {
    /// Process descriptors for every task, in execution order.
    pub fn process_infos(&self, default_timeout: Duration) -> Vec<ProcessInfo> {
        self.tasks
            .iter()
            .map(|task| task.process_info(&self.working_directory, default_timeout))
            .collect()
    }
}

/// One build step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub executable: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Appended after `args`; masked in logs.
    #[serde(default)]
    pub secret_args: Vec<String>,
    /// 0 disables the timeout; unset falls back to the executor default.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub success_exit_codes: Vec<i32>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub priority: PriorityClass,
    #[serde(default)]
    pub stdin: Option<String>,
}

impl TaskConfig {
    pub fn process_info(&self, working_directory: &Path, default_timeout: Duration) -> ProcessInfo {
        let mut arguments: ProcessArguments = self.args.iter().cloned().collect();
        for secret in &self.secret_args {
            arguments = arguments.secret(secret.clone());
        }
        let timeout = self
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(default_timeout);

        let mut info = ProcessInfo::new(&self.executable, working_directory)
            .with_arguments(arguments)
            .with_priority(self.priority)
            .with_timeout(timeout)
            .with_success_exit_codes(self.success_exit_codes.iter().copied());
        for (key, value) in &self.env {
            info = info.env(key, value);
        }
        if let Some(stdin) = &self.stdin {
            info = info.with_stdin(stdin.clone());
        }
        info
    }
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}
fn default_monitor_lock_timeout_ms() -> u64 {
    DEFAULT_MONITOR_LOCK_TIMEOUT_MS
}
fn default_output_buffer() -> usize {
    DEFAULT_OUTPUT_BUFFER
}
fn default_task_timeout_ms() -> u64 {
    DEFAULT_TASK_TIMEOUT_MS
}

impl NightshiftConfig {
    /// Load config from a TOML file with NIGHTSHIFT_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. $NIGHTSHIFT_CONFIG
    ///   3. ~/.nightshift/nightshift.toml
    ///
    /// Nested keys are addressed with `__`, e.g.
    /// `NIGHTSHIFT_SERVER__POLL_INTERVAL_MS=250`. Cron expressions are parsed
    /// while loading, so an invalid schedule fails here.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let path = config_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .unwrap_or_else(default_config_path);

        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
        }

        let config: NightshiftConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("NIGHTSHIFT_").split("__"))
            .extract()
            .map_err(|e| NightshiftError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the server cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.server.poll_interval_ms == 0 {
            return Err(NightshiftError::Config(
                "server.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.executor.output_buffer == 0 {
            return Err(NightshiftError::Config(
                "executor.output_buffer must be greater than 0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for project in &self.projects {
            let invalid = |reason: &str| NightshiftError::InvalidProject {
                project: project.name.clone(),
                reason: reason.to_string(),
            };
            if project.name.trim().is_empty() {
                return Err(invalid("name must not be empty"));
            }
            if !seen.insert(project.name.as_str()) {
                return Err(invalid("duplicate project name"));
            }
            if project.tasks.is_empty() {
                return Err(invalid("at least one task is required"));
            }
            if project.tasks.iter().any(|t| t.executable.trim().is_empty()) {
                return Err(invalid("task executable must not be empty"));
            }
        }
        Ok(())
    }

    pub fn project(&self, name: &str) -> Result<&ProjectConfig> {
        self.projects
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| NightshiftError::ProjectNotFound {
                name: name.to_string(),
            })
    }
}

fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".nightshift").join("nightshift.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use nightshift_scheduler::CrontabSchedule;

    const SAMPLE: &str = r#"
        [server]
        poll_interval_ms = 500

        [[projects]]
        name = "api"
        working_directory = "/srv/build/api"
        trigger = { kind = "cron", expression = "30 2 * * mon-fri" }

        [[projects.tasks]]
        executable = "make"
        args = ["release"]
        secret_args = ["--token=abc"]
        timeout_ms = 1000
        success_exit_codes = [0, 2]
        env = { CI = "1" }
        priority = "below_normal"

        [[projects]]
        name = "docs"
        working_directory = "/srv/build/docs"
        trigger = { kind = "interval", every_secs = 3600 }

        [[projects.tasks]]
        executable = "mdbook"
        args = ["build"]
    "#;

    #[test]
    fn loads_projects_and_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("nightshift.toml", SAMPLE)?;
            let config = NightshiftConfig::load(Some(Path::new("nightshift.toml")))
                .map_err(|e| e.to_string())?;

            assert_eq!(config.server.poll_interval_ms, 500);
            assert_eq!(config.server.log_filter, DEFAULT_LOG_FILTER);
            assert_eq!(config.executor.output_buffer, DEFAULT_OUTPUT_BUFFER);
            assert_eq!(config.projects.len(), 2);

            let api = config.project("api").map_err(|e| e.to_string())?;
            assert_eq!(
                api.trigger,
                Trigger::Cron {
                    expression: CrontabSchedule::parse("30 2 * * 1-5").unwrap()
                }
            );
            assert_eq!(api.tasks[0].priority, PriorityClass::BelowNormal);
            Ok(())
        });
    }

    #[test]
    fn env_overrides_nested_keys() {
        Jail::expect_with(|jail| {
            jail.create_file("nightshift.toml", SAMPLE)?;
            jail.set_env("NIGHTSHIFT_SERVER__POLL_INTERVAL_MS", "250");
            jail.set_env("NIGHTSHIFT_EXECUTOR__OUTPUT_BUFFER", "8");

            let config = NightshiftConfig::load(Some(Path::new("nightshift.toml")))
                .map_err(|e| e.to_string())?;
            assert_eq!(config.server.poll_interval_ms, 250);
            assert_eq!(config.executor.output_buffer, 8);
            Ok(())
        });
    }

    #[test]
    fn config_env_var_selects_the_file() {
        Jail::expect_with(|jail| {
            jail.create_file("elsewhere.toml", "[server]\npoll_interval_ms = 42\n")?;
            jail.set_env(CONFIG_ENV, "elsewhere.toml");

            let config = NightshiftConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.server.poll_interval_ms, 42);
            Ok(())
        });
    }

    #[test]
    fn invalid_cron_names_the_expression() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "nightshift.toml",
                r#"
                [[projects]]
                name = "bad"
                working_directory = "/tmp"
                trigger = { kind = "cron", expression = "61 * * * *" }
                [[projects.tasks]]
                executable = "true"
                "#,
            )?;

            let err = NightshiftConfig::load(Some(Path::new("nightshift.toml"))).unwrap_err();
            assert!(err.to_string().contains("61"), "{err}");
            Ok(())
        });
    }

    #[test]
    fn validation_rejects_duplicates_and_empty_projects() {
        let task = TaskConfig {
            executable: "true".to_string(),
            args: vec![],
            secret_args: vec![],
            timeout_ms: None,
            success_exit_codes: vec![],
            env: BTreeMap::new(),
            priority: PriorityClass::Normal,
            stdin: None,
        };
        let project = ProjectConfig {
            name: "dup".to_string(),
            working_directory: PathBuf::from("/tmp"),
            trigger: Trigger::Interval { every_secs: 60 },
            tasks: vec![task],
        };

        let mut config = NightshiftConfig {
            projects: vec![project.clone(), project.clone()],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(NightshiftError::InvalidProject { .. })
        ));

        config.projects = vec![ProjectConfig {
            tasks: vec![],
            ..project
        }];
        assert!(config.validate().is_err());

        config.projects.clear();
        config.executor.output_buffer = 0;
        assert!(matches!(config.validate(), Err(NightshiftError::Config(_))));
    }

    #[test]
    fn task_maps_to_process_info() {
        let task = TaskConfig {
            executable: "make".to_string(),
            args: vec!["release".to_string()],
            secret_args: vec!["--token=abc".to_string()],
            timeout_ms: None,
            success_exit_codes: vec![0, 2],
            env: BTreeMap::from([("CI".to_string(), "1".to_string())]),
            priority: PriorityClass::High,
            stdin: Some("y\n".to_string()),
        };

        let info = task.process_info(Path::new("/nonexistent"), Duration::from_secs(60));
        assert_eq!(info.filename(), "make");
        assert_eq!(info.arguments().to_string(), "release ********");
        assert_eq!(info.timeout(), Some(Duration::from_secs(60)));
        assert!(info.process_successful(2));
        assert_eq!(info.environment().get("CI").map(String::as_str), Some("1"));
        assert_eq!(info.priority(), PriorityClass::High);
        assert_eq!(info.stdin(), Some("y\n"));

        let unbounded = TaskConfig {
            timeout_ms: Some(0),
            ..task
        };
        assert_eq!(
            unbounded
                .process_info(Path::new("/nonexistent"), Duration::from_secs(60))
                .timeout(),
            None
        );
    }
}
