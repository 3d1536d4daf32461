//! Error types for the nightshift-process crate.

use std::time::Duration;

use thiserror::Error;

/// All errors that can originate from supervising a process.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The OS process could not be created (bad executable, missing working
    /// directory, permission denied).
    #[error("failed to start '{filename}': {source}")]
    Spawn {
        filename: String,
        #[source]
        source: std::io::Error,
    },

    /// The caller cancelled the invocation. The process was killed first.
    #[error("process execution was cancelled")]
    Cancelled,

    /// The process did not exit within the grace period after being killed.
    #[error("process {pid} for '{filename}' was not confirmed dead within {grace:?}")]
    KillNotConfirmed {
        filename: String,
        pid: u32,
        grace: Duration,
    },

    /// The process registry could not be locked in time.
    #[error("process monitor lock not acquired within {waited:?}")]
    MonitorBusy { waited: Duration },

    /// Waiting on the child failed after it was started.
    #[error("I/O error while supervising process: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ProcessError>;
