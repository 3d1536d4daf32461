//! `nightshift run`: execute a single process under supervision.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nightshift_process::{
    OutputChannel, OutputLine, ProcessArguments, ProcessError, ProcessExecutor, ProcessInfo,
    ProcessMonitor, ProcessResult,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Exit status reported when the process hit its timeout (as coreutils
/// `timeout` does).
pub const EXIT_TIMED_OUT: i32 = 124;
/// Exit status reported when the run was interrupted with Ctrl-C.
pub const EXIT_CANCELLED: i32 = 130;

pub struct RunArgs {
    pub project: String,
    pub timeout_ms: u64,
    pub workdir: Option<PathBuf>,
    pub success_codes: Vec<i32>,
    pub program: String,
    pub args: Vec<String>,
}

/// Run the process and return the exit status the CLI should exit with.
pub async fn run(args: RunArgs, output_buffer: usize) -> anyhow::Result<i32> {
    let workdir = match args.workdir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let info = ProcessInfo::new(&args.program, workdir)
        .with_arguments(args.args.into_iter().collect::<ProcessArguments>())
        .with_timeout(Duration::from_millis(args.timeout_ms))
        .with_success_exit_codes(args.success_codes);

    let executor = ProcessExecutor::new(Arc::new(ProcessMonitor::default()));
    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping process");
            on_ctrl_c.cancel();
        }
    });

    let (tx, rx) = mpsc::channel(output_buffer.max(1));
    let printer = tokio::spawn(print_output(rx));
    let outcome = executor
        .execute_streaming(&info, &args.project, &cancel, tx)
        .await;
    // The sender is gone once execute returns, so the printer drains and ends.
    let _ = printer.await;

    match outcome {
        Ok(result) => {
            report(&result);
            Ok(exit_status(&result))
        }
        Err(ProcessError::Cancelled) => {
            eprintln!("nightshift: cancelled");
            Ok(EXIT_CANCELLED)
        }
        Err(e) => Err(e.into()),
    }
}

async fn print_output(mut rx: mpsc::Receiver<OutputLine>) {
    while let Some(output) = rx.recv().await {
        match output.channel {
            OutputChannel::StandardOutput => println!("{}", output.line),
            OutputChannel::ErrorOutput => eprintln!("{}", output.line),
        }
    }
}

fn report(result: &ProcessResult) {
    if result.timed_out() {
        eprintln!("nightshift: process timed out and was killed");
    } else if !result.succeeded() {
        eprintln!("nightshift: process failed with exit code {}", result.exit_code());
    }
}

/// Map a result to a shell exit status: 0 on success, 124 on timeout,
/// otherwise the process's own code (1 if it has none in range).
pub fn exit_status(result: &ProcessResult) -> i32 {
    if result.timed_out() {
        EXIT_TIMED_OUT
    } else if result.succeeded() {
        0
    } else {
        match result.exit_code() {
            code @ 1..=255 => code,
            _ => 1,
        }
    }
}
