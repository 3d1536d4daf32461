//! `RunnableProcess`: owns one spawned child for the duration of an
//! invocation: output pumping, the supervision wait and kill escalation.

use std::future::Future;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::{ProcessError, Result},
    os,
    types::{OutputChannel, OutputLine, ProcessInfo, ProcessResult, KILLED_EXIT_CODE},
};

/// How long a killed process may take to be reaped before the kill is
/// considered failed.
pub const KILL_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// How long detached readers get to wind down before they are aborted.
const READER_DETACH_WAIT: Duration = Duration::from_millis(500);

/// How long to watch for process-group members that outlive a kill.
const GROUP_SETTLE_WAIT: Duration = Duration::from_secs(1);

/// Lifecycle of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Created,
    Started,
    ExitedNormally,
    TimedOutThenKilled,
    AbortedThenKilled,
    Disposed,
}

/// What ended the supervision wait.
enum WaitOutcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
    Aborted,
    Interrupted,
}

type OutputBuffer = Arc<Mutex<String>>;

/// A started child process under supervision.
pub struct RunnableProcess {
    info: ProcessInfo,
    project: String,
    child: Child,
    pid: Option<u32>,
    state: ProcessState,
    stdout: OutputBuffer,
    stderr: OutputBuffer,
    stdout_closed: CancellationToken,
    stderr_closed: CancellationToken,
    /// Stops the reader tasks before a kill.
    detach: CancellationToken,
    /// Fired by a reader task that hit an I/O error.
    interrupt: CancellationToken,
    readers: Vec<JoinHandle<()>>,
}

impl RunnableProcess {
    /// Spawn the process described by `info`.
    ///
    /// Output lines are appended to in-memory buffers and, if `sink` is set,
    /// published on it as they arrive.
    pub fn start(
        info: ProcessInfo,
        project: &str,
        sink: Option<mpsc::Sender<OutputLine>>,
    ) -> Result<Self> {
        let spawn_error = |source| ProcessError::Spawn {
            filename: info.filename().to_string(),
            source,
        };
        debug!(project = %project, state = ?ProcessState::Created, "process created");

        let workdir = info.working_directory();
        if !workdir.is_dir() {
            return Err(spawn_error(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("working directory {} does not exist", workdir.display()),
            )));
        }

        let mut command = Command::new(info.filename());
        command
            .args(info.arguments().private_values())
            .current_dir(workdir)
            .envs(info.environment())
            .stdin(if info.stdin().is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(spawn_error)?;
        let pid = child.id();

        if let Some(pid) = pid {
            match os::apply_priority(pid, info.priority()) {
                Ok(true) => debug!(pid, priority = ?info.priority(), "priority applied"),
                Ok(false) => {}
                Err(e) => warn!(pid, priority = ?info.priority(), "failed to set priority: {e}"),
            }
        }

        if let (Some(content), Some(mut stdin)) = (info.stdin(), child.stdin.take()) {
            let content = content.to_string();
            let project = project.to_string();
            tokio::spawn(async move {
                let written = async {
                    stdin.write_all(content.as_bytes()).await?;
                    stdin.flush().await
                }
                .await;
                if let Err(e) = written {
                    warn!(project = %project, "failed to write stdin: {e}");
                }
                // Dropping the handle closes the pipe.
            });
        }

        let detach = CancellationToken::new();
        let interrupt = CancellationToken::new();
        let stdout = OutputBuffer::default();
        let stderr = OutputBuffer::default();
        let stdout_closed = CancellationToken::new();
        let stderr_closed = CancellationToken::new();
        let mut readers = Vec::with_capacity(2);

        if let Some(pipe) = child.stdout.take() {
            readers.push(tokio::spawn(pump(
                pipe,
                StreamContext {
                    project: project.to_string(),
                    channel: OutputChannel::StandardOutput,
                    buffer: Arc::clone(&stdout),
                    closed: stdout_closed.clone(),
                    detach: detach.clone(),
                    interrupt: interrupt.clone(),
                    sink: sink.clone(),
                },
            )));
        } else {
            stdout_closed.cancel();
        }
        if let Some(pipe) = child.stderr.take() {
            readers.push(tokio::spawn(pump(
                pipe,
                StreamContext {
                    project: project.to_string(),
                    channel: OutputChannel::ErrorOutput,
                    buffer: Arc::clone(&stderr),
                    closed: stderr_closed.clone(),
                    detach: detach.clone(),
                    interrupt: interrupt.clone(),
                    sink,
                },
            )));
        } else {
            stderr_closed.cancel();
        }

        info!(
            project = %project,
            pid = ?pid,
            filename = %info.filename(),
            args = %info.arguments(),
            "process started"
        );

        Ok(Self {
            info,
            project: project.to_string(),
            child,
            pid,
            state: ProcessState::Started,
            stdout,
            stderr,
            stdout_closed,
            stderr_closed,
            detach,
            interrupt,
            readers,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Wait for the process to finish, killing it on timeout, cancellation,
    /// abort or reader failure.
    ///
    /// Cancellation through `cancel` always yields [`ProcessError::Cancelled`]
    /// once the process has been killed. Every other path produces a result.
    pub async fn run(
        mut self,
        cancel: &CancellationToken,
        abort: &CancellationToken,
    ) -> Result<ProcessResult> {
        let outcome = {
            let child = &mut self.child;
            let stdout_closed = self.stdout_closed.clone();
            let stderr_closed = self.stderr_closed.clone();
            let completion = async move {
                let status = child.wait().await;
                stdout_closed.cancelled().await;
                stderr_closed.cancelled().await;
                status
            };
            let deadline = self.info.timeout();
            let timer = async move {
                match deadline {
                    Some(limit) => tokio::time::sleep(limit).await,
                    None => std::future::pending().await,
                }
            };
            let interrupt = self.interrupt.clone();

            tokio::select! {
                status = completion => WaitOutcome::Exited(status),
                _ = timer => WaitOutcome::TimedOut,
                _ = cancel.cancelled() => WaitOutcome::Cancelled,
                _ = abort.cancelled() => WaitOutcome::Aborted,
                _ = interrupt.cancelled() => WaitOutcome::Interrupted,
            }
        };

        let mut timed_out = false;
        let mut interrupted = false;
        let exit_code = match outcome {
            WaitOutcome::Exited(Ok(status)) => {
                self.finish_readers(READER_DETACH_WAIT).await;
                self.transition(ProcessState::ExitedNormally);
                exit_code_of(status)
            }
            WaitOutcome::Exited(Err(e)) => {
                warn!(project = %self.project, "waiting on process failed: {e}");
                self.kill().await?;
                self.transition(ProcessState::AbortedThenKilled);
                return Err(e.into());
            }
            WaitOutcome::TimedOut => {
                warn!(
                    project = %self.project,
                    pid = ?self.pid,
                    timeout = ?self.info.timeout(),
                    "process timed out"
                );
                timed_out = true;
                let code = self.kill().await?;
                self.transition(ProcessState::TimedOutThenKilled);
                code
            }
            WaitOutcome::Cancelled => {
                info!(project = %self.project, pid = ?self.pid, "process cancelled");
                self.kill().await?;
                self.transition(ProcessState::AbortedThenKilled);
                return Err(ProcessError::Cancelled);
            }
            WaitOutcome::Aborted => {
                info!(project = %self.project, pid = ?self.pid, "process aborted");
                let code = self.kill().await?;
                self.transition(ProcessState::AbortedThenKilled);
                code
            }
            WaitOutcome::Interrupted => {
                warn!(project = %self.project, pid = ?self.pid, "output reader failed, killing process");
                interrupted = true;
                let code = self.kill().await?;
                self.transition(ProcessState::AbortedThenKilled);
                code
            }
        };

        Ok(finished_result(
            &self.info,
            take_buffer(&self.stdout),
            take_buffer(&self.stderr),
            exit_code,
            timed_out,
            interrupted,
        ))
    }

    /// Detach the readers, kill the process group and wait for the child to
    /// be reaped. Returns the exit code to report.
    async fn kill(&mut self) -> Result<i32> {
        self.detach.cancel();
        self.finish_readers(READER_DETACH_WAIT).await;

        match self.pid {
            Some(pid) => {
                if let Err(e) = os::kill_tree(pid) {
                    warn!(project = %self.project, pid, "failed to kill process tree: {e}");
                    // Fall back to the direct child at least.
                    let _ = self.child.start_kill();
                }
            }
            None => {
                let _ = self.child.start_kill();
            }
        }

        let status = reap_within(
            self.child.wait(),
            KILL_GRACE_PERIOD,
            self.info.filename(),
            self.pid,
        )
        .await?;

        if let Some(pid) = self.pid {
            if os::group_lingers(pid, GROUP_SETTLE_WAIT).await {
                warn!(
                    project = %self.project,
                    pid,
                    "process group members still present after kill (awaiting reaping)"
                );
            }
        }

        let code = exit_code_of(status);
        debug!(project = %self.project, exit_code = code, "process killed");
        Ok(code)
    }

    /// Join the reader tasks, aborting any that outlive `wait`.
    async fn finish_readers(&mut self, wait: Duration) {
        for mut task in std::mem::take(&mut self.readers) {
            if tokio::time::timeout(wait, &mut task).await.is_err() {
                task.abort();
            }
        }
    }

    fn transition(&mut self, to: ProcessState) {
        debug!(project = %self.project, from = ?self.state, to = ?to, "process state");
        self.state = to;
    }
}

impl Drop for RunnableProcess {
    fn drop(&mut self) {
        for task in &self.readers {
            task.abort();
        }
        // Still started: the run future was dropped mid-wait. `kill_on_drop`
        // only reaches the direct child, so take the whole group down here.
        if self.state == ProcessState::Started {
            if let Some(pid) = self.pid {
                warn!(project = %self.project, pid, "process dropped while running, killing process tree");
                if let Err(e) = os::kill_tree(pid) {
                    warn!(project = %self.project, pid, "failed to kill process tree: {e}");
                }
            }
        }
        self.transition(ProcessState::Disposed);
    }
}

struct StreamContext {
    project: String,
    channel: OutputChannel,
    buffer: OutputBuffer,
    closed: CancellationToken,
    detach: CancellationToken,
    interrupt: CancellationToken,
    sink: Option<mpsc::Sender<OutputLine>>,
}

/// Read `stream` line by line into the buffer and the sink until
/// end-of-stream, detach or an I/O error.
async fn pump<R: AsyncRead + Unpin>(stream: R, mut ctx: StreamContext) {
    let mut reader = BufReader::new(stream);
    let mut raw = Vec::new();
    loop {
        raw.clear();
        let read = tokio::select! {
            biased;
            _ = ctx.detach.cancelled() => return,
            read = reader.read_until(b'\n', &mut raw) => read,
        };

        match read {
            Ok(0) => {
                ctx.closed.cancel();
                return;
            }
            Ok(_) => {
                let text = String::from_utf8_lossy(&raw);
                let line = text.trim_end_matches(['\n', '\r']);
                {
                    let mut buffer = ctx.buffer.lock().unwrap_or_else(PoisonError::into_inner);
                    buffer.push_str(line);
                    buffer.push('\n');
                }

                if let Some(tx) = &ctx.sink {
                    let event = OutputLine {
                        project: ctx.project.clone(),
                        channel: ctx.channel,
                        line: line.to_string(),
                    };
                    let sent = tokio::select! {
                        biased;
                        _ = ctx.detach.cancelled() => return,
                        sent = tx.send(event) => sent,
                    };
                    if sent.is_err() {
                        debug!(project = %ctx.project, channel = %ctx.channel, "output receiver dropped");
                        ctx.sink = None;
                    }
                }
            }
            Err(e) => {
                warn!(project = %ctx.project, channel = %ctx.channel, "failed to read process output: {e}");
                ctx.interrupt.cancel();
                return;
            }
        }
    }
}

/// Wait for a killed child to be reaped, giving up after `grace`.
async fn reap_within<F>(
    wait: F,
    grace: Duration,
    filename: &str,
    pid: Option<u32>,
) -> Result<ExitStatus>
where
    F: Future<Output = std::io::Result<ExitStatus>>,
{
    match tokio::time::timeout(grace, wait).await {
        Ok(status) => Ok(status?),
        Err(_) => Err(ProcessError::KillNotConfirmed {
            filename: filename.to_string(),
            pid: pid.unwrap_or_default(),
            grace,
        }),
    }
}

/// A reader failure fails the invocation whatever the exit code was.
fn finished_result(
    info: &ProcessInfo,
    stdout: String,
    stderr: String,
    exit_code: i32,
    timed_out: bool,
    interrupted: bool,
) -> ProcessResult {
    let failed = interrupted || !info.process_successful(exit_code);
    ProcessResult::with_failed(stdout, stderr, exit_code, timed_out, failed)
}

fn take_buffer(buffer: &OutputBuffer) -> String {
    std::mem::take(&mut *buffer.lock().unwrap_or_else(PoisonError::into_inner))
}

fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or(KILLED_EXIT_CODE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Yields one line, then fails every read.
    struct BrokenPipe {
        served: bool,
    }

    impl AsyncRead for BrokenPipe {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.served {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "pipe went away",
                )));
            }
            self.served = true;
            buf.put_slice(b"compiling\n");
            Poll::Ready(Ok(()))
        }
    }

    fn context(channel: OutputChannel) -> StreamContext {
        StreamContext {
            project: "api".to_string(),
            channel,
            buffer: OutputBuffer::default(),
            closed: CancellationToken::new(),
            detach: CancellationToken::new(),
            interrupt: CancellationToken::new(),
            sink: None,
        }
    }

    #[tokio::test]
    async fn read_error_interrupts_instead_of_closing() {
        let ctx = context(OutputChannel::ErrorOutput);
        let (buffer, closed, interrupt) = (
            Arc::clone(&ctx.buffer),
            ctx.closed.clone(),
            ctx.interrupt.clone(),
        );

        pump(BrokenPipe { served: false }, ctx).await;

        assert!(interrupt.is_cancelled());
        assert!(!closed.is_cancelled());
        assert_eq!(take_buffer(&buffer), "compiling\n");
    }

    #[tokio::test]
    async fn end_of_stream_closes_and_publishes_lines() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut ctx = context(OutputChannel::StandardOutput);
        ctx.sink = Some(tx);
        let closed = ctx.closed.clone();

        pump(&b"one\r\ntwo"[..], ctx).await;

        assert!(closed.is_cancelled());
        assert_eq!(rx.recv().await.map(|l| l.line), Some("one".to_string()));
        assert_eq!(rx.recv().await.map(|l| l.line), Some("two".to_string()));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn interrupted_run_fails_even_with_a_clean_exit() {
        let info = ProcessInfo::new("make", ".");
        let result = finished_result(&info, String::new(), String::new(), 0, false, true);
        assert!(result.failed());
        assert!(!result.timed_out());

        let clean = finished_result(&info, String::new(), String::new(), 0, false, false);
        assert!(clean.succeeded());
    }

    #[tokio::test]
    async fn unreaped_child_is_reported_as_kill_not_confirmed() {
        let err = reap_within(
            std::future::pending(),
            Duration::from_millis(20),
            "make",
            Some(4242),
        )
        .await
        .unwrap_err();

        match err {
            ProcessError::KillNotConfirmed { filename, pid, grace } => {
                assert_eq!(filename, "make");
                assert_eq!(pid, 4242);
                assert_eq!(grace, Duration::from_millis(20));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
