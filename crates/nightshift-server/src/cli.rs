//! Command-line interface for the nightshift build server.
//!
//! Commands:
//! - `next`: show the upcoming occurrences of a cron expression
//! - `run`: execute one process under supervision
//! - `serve`: run configured projects on their triggers

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Nightshift build-automation server
#[derive(Parser, Debug)]
#[command(name = "nightshift")]
#[command(about = "Scheduled build automation with supervised processes")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("NIGHTSHIFT_REVISION"), ")"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the next occurrences of a crontab expression
    Next {
        /// Five-field crontab expression, e.g. "*/15 * * * MON-FRI"
        expression: String,
        /// Number of occurrences to print
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,
        /// Start time as "YYYY-MM-DD HH:MM" (default: now)
        #[arg(long)]
        from: Option<String>,
        /// Print a JSON object instead of plain text
        #[arg(long)]
        json: bool,
    },
    /// Run one process with a timeout, streaming its output
    Run {
        /// Project name the process is registered under
        #[arg(long, default_value = "adhoc")]
        project: String,
        /// Kill the process after this many milliseconds (0 = never)
        #[arg(long, default_value_t = 0)]
        timeout_ms: u64,
        /// Working directory (default: current directory)
        #[arg(long)]
        workdir: Option<PathBuf>,
        /// Exit code counted as success; repeatable (default: 0)
        #[arg(long = "success-code")]
        success_codes: Vec<i32>,
        /// Program to execute
        program: String,
        /// Arguments passed to the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Start the scheduler and run builds when their triggers fire
    Serve {
        /// Config file (default: $NIGHTSHIFT_CONFIG or ~/.nightshift/nightshift.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}
