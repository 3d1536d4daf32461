//! Value types describing one process invocation and its outcome.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Rendered in place of a secret argument in the public form.
pub const SECRET_MASK: &str = "********";

/// Exit code reported for a process that was terminated by a signal.
pub const KILLED_EXIT_CODE: i32 = -1;

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// A single command-line argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Argument {
    Plain(String),
    /// Passed to the process verbatim but never logged.
    Secret(String),
}

impl Argument {
    /// The value handed to the OS.
    pub fn value(&self) -> &str {
        match self {
            Argument::Plain(v) | Argument::Secret(v) => v,
        }
    }

    /// The value safe to show in logs.
    pub fn public_value(&self) -> &str {
        match self {
            Argument::Plain(v) => v,
            Argument::Secret(_) => SECRET_MASK,
        }
    }
}

/// Ordered argument list with a private form (for execution) and a public
/// form (for logging).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessArguments {
    args: Vec<Argument>,
}

impl ProcessArguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plain(mut self, value: impl Into<String>) -> Self {
        self.args.push(Argument::Plain(value.into()));
        self
    }

    pub fn secret(mut self, value: impl Into<String>) -> Self {
        self.args.push(Argument::Secret(value.into()));
        self
    }

    pub fn push(&mut self, argument: Argument) {
        self.args.push(argument);
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Argument> {
        self.args.iter()
    }

    /// Every argument value, secrets included.
    pub fn private_values(&self) -> impl Iterator<Item = &str> {
        self.args.iter().map(Argument::value)
    }

    /// Every argument value with secrets masked.
    pub fn public_values(&self) -> impl Iterator<Item = &str> {
        self.args.iter().map(Argument::public_value)
    }
}

impl<S: Into<String>> FromIterator<S> for ProcessArguments {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            args: iter.into_iter().map(|s| Argument::Plain(s.into())).collect(),
        }
    }
}

/// Formats the public form; arguments containing whitespace are quoted.
impl fmt::Display for ProcessArguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, value) in self.public_values().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            if value.is_empty() || value.chars().any(char::is_whitespace) {
                write!(f, "\"{value}\"")?;
            } else {
                f.write_str(value)?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PriorityClass
// ---------------------------------------------------------------------------

/// Scheduling priority requested for the child process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityClass {
    Idle,
    BelowNormal,
    #[default]
    Normal,
    AboveNormal,
    High,
    RealTime,
}

impl PriorityClass {
    /// Unix nice value used for this class.
    pub const fn nice_value(self) -> i32 {
        match self {
            PriorityClass::Idle => 19,
            PriorityClass::BelowNormal => 10,
            PriorityClass::Normal => 0,
            PriorityClass::AboveNormal => -5,
            PriorityClass::High => -10,
            PriorityClass::RealTime => -20,
        }
    }
}

// ---------------------------------------------------------------------------
// ProcessInfo
// ---------------------------------------------------------------------------

/// Describes one process invocation. Built once per build step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    filename: String,
    arguments: ProcessArguments,
    working_directory: PathBuf,
    environment: BTreeMap<String, String>,
    priority: PriorityClass,
    timeout: Duration,
    success_exit_codes: BTreeSet<i32>,
    stdin: Option<String>,
}

impl ProcessInfo {
    /// Create a descriptor for `filename` run inside `working_directory`.
    ///
    /// Surrounding quotes are stripped from `filename`. If a file with that
    /// name exists inside the working directory, the filename is replaced by
    /// its full path so PATH lookup cannot pick a different program.
    pub fn new(filename: &str, working_directory: impl Into<PathBuf>) -> Self {
        let working_directory = working_directory.into();
        let filename = resolve_filename(filename, &working_directory);
        Self {
            filename,
            arguments: ProcessArguments::new(),
            working_directory,
            environment: BTreeMap::new(),
            priority: PriorityClass::Normal,
            timeout: Duration::ZERO,
            success_exit_codes: BTreeSet::from([0]),
            stdin: None,
        }
    }

    pub fn with_arguments(mut self, arguments: ProcessArguments) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: PriorityClass) -> Self {
        self.priority = priority;
        self
    }

    /// Zero means no timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the success exit-code whitelist. An empty list keeps `{0}`.
    pub fn with_success_exit_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        let codes: BTreeSet<i32> = codes.into_iter().collect();
        if !codes.is_empty() {
            self.success_exit_codes = codes;
        }
        self
    }

    /// Content written to the child's stdin, after which stdin is closed.
    pub fn with_stdin(mut self, content: impl Into<String>) -> Self {
        self.stdin = Some(content.into());
        self
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn arguments(&self) -> &ProcessArguments {
        &self.arguments
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    pub fn priority(&self) -> PriorityClass {
        self.priority
    }

    /// `None` when the process may run forever.
    pub fn timeout(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }

    pub fn success_exit_codes(&self) -> &BTreeSet<i32> {
        &self.success_exit_codes
    }

    pub fn stdin(&self) -> Option<&str> {
        self.stdin.as_deref()
    }

    /// Whether `exit_code` counts as success for this invocation.
    pub fn process_successful(&self, exit_code: i32) -> bool {
        self.success_exit_codes.contains(&exit_code)
    }
}

fn resolve_filename(filename: &str, working_directory: &Path) -> String {
    let trimmed = filename.trim().trim_matches('"');
    let candidate = working_directory.join(trimmed);
    if !trimmed.is_empty() && candidate.is_file() {
        candidate.to_string_lossy().into_owned()
    } else {
        trimmed.to_string()
    }
}

// ---------------------------------------------------------------------------
// ProcessResult
// ---------------------------------------------------------------------------

/// Outcome of one supervised invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessResult {
    stdout: String,
    stderr: String,
    exit_code: i32,
    timed_out: bool,
    failed: bool,
}

impl ProcessResult {
    /// Result whose `failed` flag is derived from `exit_code != 0`.
    pub fn new(
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        exit_code: i32,
        timed_out: bool,
    ) -> Self {
        Self::with_failed(stdout, stderr, exit_code, timed_out, exit_code != 0)
    }

    /// Result with an explicitly supplied `failed` flag.
    pub fn with_failed(
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        exit_code: i32,
        timed_out: bool,
        failed: bool,
    ) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
            timed_out,
            failed,
        }
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn succeeded(&self) -> bool {
        !self.failed && !self.timed_out
    }
}

// ---------------------------------------------------------------------------
// Output streaming
// ---------------------------------------------------------------------------

/// Which pipe an output line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputChannel {
    StandardOutput,
    ErrorOutput,
}

impl fmt::Display for OutputChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputChannel::StandardOutput => f.write_str("stdout"),
            OutputChannel::ErrorOutput => f.write_str("stderr"),
        }
    }
}

/// One line of child output, published while the process runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub project: String,
    pub channel: OutputChannel,
    /// Line text without its trailing newline.
    pub line: String,
}
