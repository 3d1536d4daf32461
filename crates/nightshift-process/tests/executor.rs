//! End-to-end supervisor tests against real processes.
#![cfg(unix)]

use std::time::{Duration, Instant};

use nightshift_process::{
    OutputChannel, PriorityClass, ProcessArguments, ProcessError, ProcessExecutor, ProcessInfo,
    KILLED_EXIT_CODE,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn shell(script: &str, dir: &std::path::Path) -> ProcessInfo {
    ProcessInfo::new("sh", dir).with_arguments(ProcessArguments::new().plain("-c").plain(script))
}

/// Whether `pid` is gone or only a zombie awaiting its new parent.
#[cfg(target_os = "linux")]
fn is_dead(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Err(_) => true,
        Ok(stat) => stat.rsplit(')').next().unwrap().split_whitespace().next() == Some("Z"),
    }
}

#[tokio::test]
async fn echo_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let executor = ProcessExecutor::default();
    let info = ProcessInfo::new("echo", dir.path())
        .with_arguments(ProcessArguments::new().plain("hello"));

    let result = executor
        .execute(&info, "echo", &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.stdout().contains("hello"));
    assert_eq!(result.exit_code(), 0);
    assert!(result.succeeded());
    assert!(result.stderr().is_empty());
}

#[tokio::test]
async fn timeout_kills_the_process() {
    let dir = tempfile::tempdir().unwrap();
    let executor = ProcessExecutor::default();
    let info = ProcessInfo::new("sleep", dir.path())
        .with_arguments(ProcessArguments::new().plain("5"))
        .with_timeout(Duration::from_millis(100));

    let started = Instant::now();
    let result = executor
        .execute(&info, "sleepy", &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.timed_out());
    assert!(!result.succeeded());
    assert_eq!(result.exit_code(), KILLED_EXIT_CODE);
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn timeout_kills_background_children_too() {
    let dir = tempfile::tempdir().unwrap();
    let executor = ProcessExecutor::default();
    let info = shell("sleep 30 & echo $!; wait", dir.path())
        .with_timeout(Duration::from_millis(300));

    let result = executor
        .execute(&info, "tree", &CancellationToken::new())
        .await
        .unwrap();
    assert!(result.timed_out());

    let grandchild: u32 = result.stdout().trim().parse().unwrap();
    assert!(is_dead(grandchild), "grandchild {grandchild} still alive");
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn dropped_invocation_releases_entry_and_kills_the_tree() {
    let dir = tempfile::tempdir().unwrap();
    let executor = ProcessExecutor::default();
    let info = shell("sleep 30 & echo $! > child.pid; wait", dir.path());

    let outcome = tokio::time::timeout(
        Duration::from_millis(300),
        executor.execute(&info, "dropped", &CancellationToken::new()),
    )
    .await;
    assert!(outcome.is_err(), "sleep finished early");

    assert!(executor.monitor().running().await.unwrap().is_empty());
    assert!(!executor.abort_for("dropped").await.unwrap());

    let grandchild: u32 = std::fs::read_to_string(dir.path().join("child.pid"))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    let deadline = Instant::now() + Duration::from_secs(3);
    while !is_dead(grandchild) {
        assert!(Instant::now() < deadline, "grandchild {grandchild} survived the drop");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn priority_class_sets_the_nice_value() {
    let dir = tempfile::tempdir().unwrap();
    let executor = ProcessExecutor::default();
    // The pause lets the priority land before `cut` is forked.
    let info = shell("sleep 0.2; cut -d' ' -f19 /proc/self/stat", dir.path())
        .with_priority(PriorityClass::Idle);

    let result = executor
        .execute(&info, "niced", &CancellationToken::new())
        .await
        .unwrap();
    assert!(result.succeeded(), "{}", result.stderr());
    assert_eq!(result.stdout().trim(), "19");
}

#[tokio::test]
async fn stdin_content_is_delivered_and_closed() {
    let dir = tempfile::tempdir().unwrap();
    let executor = ProcessExecutor::default();
    let info = ProcessInfo::new("cat", dir.path())
        .with_stdin("one\ntwo\n")
        .with_timeout(Duration::from_secs(10));

    let result = executor
        .execute(&info, "cat", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.stdout(), "one\ntwo\n");
    assert!(result.succeeded());
}

#[tokio::test]
async fn environment_overlay_and_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("marker.txt"), "").unwrap();
    let executor = ProcessExecutor::default();
    let info = shell("echo $NIGHTSHIFT_TEST_VALUE; ls", dir.path())
        .env("NIGHTSHIFT_TEST_VALUE", "from-overlay");

    let result = executor
        .execute(&info, "env", &CancellationToken::new())
        .await
        .unwrap();
    assert!(result.stdout().contains("from-overlay"));
    assert!(result.stdout().contains("marker.txt"));
}

#[tokio::test]
async fn custom_success_codes_decide_failure() {
    let dir = tempfile::tempdir().unwrap();
    let executor = ProcessExecutor::default();

    let plain = shell("exit 3", dir.path());
    let result = executor
        .execute(&plain, "codes", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.exit_code(), 3);
    assert!(result.failed());

    let whitelisted = shell("exit 3", dir.path()).with_success_exit_codes([0, 3]);
    let result = executor
        .execute(&whitelisted, "codes", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.exit_code(), 3);
    assert!(result.succeeded());
}

#[tokio::test]
async fn missing_working_directory_is_a_spawn_error() {
    let executor = ProcessExecutor::default();
    let info = ProcessInfo::new("echo", "/definitely/not/a/dir");

    let err = executor
        .execute(&info, "missing", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::Spawn { .. }), "{err}");
    assert!(executor.monitor().running().await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_executable_is_a_spawn_error() {
    let dir = tempfile::tempdir().unwrap();
    let executor = ProcessExecutor::default();
    let info = ProcessInfo::new("nightshift-no-such-program", dir.path());

    let err = executor
        .execute(&info, "missing", &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        ProcessError::Spawn { filename, .. } => assert_eq!(filename, "nightshift-no-such-program"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn streaming_publishes_both_channels() {
    let dir = tempfile::tempdir().unwrap();
    let executor = ProcessExecutor::default();
    let info = shell("echo out-1; echo err-1 1>&2; echo out-2", dir.path());
    let (tx, mut rx) = mpsc::channel(16);

    let result = executor
        .execute_streaming(&info, "stream", &CancellationToken::new(), tx)
        .await
        .unwrap();
    assert!(result.succeeded());

    let mut lines = Vec::new();
    while let Some(line) = rx.recv().await {
        lines.push(line);
    }
    assert!(lines.iter().all(|l| l.project == "stream"));

    let stdout: Vec<_> = lines
        .iter()
        .filter(|l| l.channel == OutputChannel::StandardOutput)
        .map(|l| l.line.as_str())
        .collect();
    assert_eq!(stdout, vec!["out-1", "out-2"]);
    assert!(lines
        .iter()
        .any(|l| l.channel == OutputChannel::ErrorOutput && l.line == "err-1"));
    assert_eq!(result.stderr(), "err-1\n");
}

#[tokio::test]
async fn abort_for_unknown_project_is_false() {
    let executor = ProcessExecutor::default();
    assert!(!executor.abort_for("no-such-project").await.unwrap());
}

#[tokio::test]
async fn abort_for_kills_the_running_process() {
    let dir = tempfile::tempdir().unwrap();
    let executor = ProcessExecutor::default();
    let info = ProcessInfo::new("sleep", dir.path())
        .with_arguments(ProcessArguments::new().plain("5"));

    let runner = executor.clone();
    let task = tokio::spawn(async move {
        runner
            .execute(&info, "abortable", &CancellationToken::new())
            .await
    });

    let deadline = Instant::now() + Duration::from_secs(5);
    while !executor.monitor().is_running("abortable").await.unwrap() {
        assert!(Instant::now() < deadline, "process never registered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(executor.abort_for("abortable").await.unwrap());

    let result = tokio::time::timeout(Duration::from_secs(4), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!result.timed_out());
    assert!(result.failed());
    assert_eq!(result.exit_code(), KILLED_EXIT_CODE);
    assert!(!executor.monitor().is_running("abortable").await.unwrap());
}

#[tokio::test]
async fn cancellation_kills_then_reports_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let executor = ProcessExecutor::default();
    let info = ProcessInfo::new("sleep", dir.path())
        .with_arguments(ProcessArguments::new().plain("5"));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = executor.execute(&info, "cancel", &cancel).await.unwrap_err();
    assert!(matches!(err, ProcessError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn sequential_runs_leave_the_registry_empty() {
    let dir = tempfile::tempdir().unwrap();
    let executor = ProcessExecutor::default();
    let info = ProcessInfo::new("true", dir.path());

    for _ in 0..3 {
        executor
            .execute(&info, "repeat", &CancellationToken::new())
            .await
            .unwrap();
        assert!(executor.monitor().running().await.unwrap().is_empty());
    }
}
