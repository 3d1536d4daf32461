//! nightshift-core — configuration and the top-level error type shared by
//! the nightshift binary.

pub mod config;
pub mod error;

pub use config::{ExecutorConfig, NightshiftConfig, ProjectConfig, ServerConfig, TaskConfig};
pub use error::{NightshiftError, Result};
