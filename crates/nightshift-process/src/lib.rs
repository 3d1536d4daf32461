//! nightshift-process — supervised execution of external build steps.
//!
//! A [`ProcessExecutor`] spawns the program described by a [`ProcessInfo`],
//! captures and optionally streams its output, enforces the timeout and kills
//! the whole process tree on timeout, cancellation or abort.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use nightshift_process::{ProcessArguments, ProcessExecutor, ProcessInfo};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let executor = ProcessExecutor::default();
//!     let info = ProcessInfo::new("make", "/srv/build/api")
//!         .with_arguments(ProcessArguments::new().plain("release"))
//!         .with_timeout(Duration::from_secs(600));
//!
//!     let result = executor
//!         .execute(&info, "api", &CancellationToken::new())
//!         .await
//!         .unwrap();
//!     println!("{} -> {}", result.exit_code(), result.stdout());
//! }
//! ```

pub mod error;
pub mod executor;
pub mod monitor;
mod os;
pub mod runnable;
pub mod types;

pub use error::{ProcessError, Result};
pub use executor::ProcessExecutor;
pub use monitor::{ProcessMonitor, Registration, RunningProcess};
pub use runnable::{ProcessState, RunnableProcess, KILL_GRACE_PERIOD};
pub use types::{
    Argument, OutputChannel, OutputLine, PriorityClass, ProcessArguments, ProcessInfo,
    ProcessResult, KILLED_EXIT_CODE, SECRET_MASK,
};
