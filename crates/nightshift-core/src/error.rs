use nightshift_process::ProcessError;
use nightshift_scheduler::SchedulerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NightshiftError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid project '{project}': {reason}")]
    InvalidProject { project: String, reason: String },

    #[error("Project not found: {name}")]
    ProjectNotFound { name: String },

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NightshiftError {
    /// Short error code string used in log lines and exit reports.
    pub fn code(&self) -> &'static str {
        match self {
            NightshiftError::Config(_) => "CONFIG_ERROR",
            NightshiftError::InvalidProject { .. } => "INVALID_PROJECT",
            NightshiftError::ProjectNotFound { .. } => "PROJECT_NOT_FOUND",
            NightshiftError::Scheduler(_) => "SCHEDULER_ERROR",
            NightshiftError::Process(ProcessError::Spawn { .. }) => "SPAWN_FAILED",
            NightshiftError::Process(ProcessError::Cancelled) => "CANCELLED",
            NightshiftError::Process(_) => "PROCESS_ERROR",
            NightshiftError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, NightshiftError>;
