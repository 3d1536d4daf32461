//! Platform helpers: process-tree termination and scheduling priority.

use std::io;
use std::time::Duration;

use crate::types::PriorityClass;

/// Forcibly terminate `pid` and every process in its group.
///
/// On unix the child is spawned as the leader of its own process group, so
/// `killpg(SIGKILL)` also reaches its background children. Elsewhere
/// `taskkill /T /F` walks the process tree.
pub(crate) fn kill_tree(pid: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        let pgid = to_pid(pid)?;
        // Safety: killpg only sends a signal; pgid is a group we created.
        let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
        if rc == -1 {
            let err = io::Error::last_os_error();
            // ESRCH: the group is already gone.
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(err);
            }
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let output = std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .output()?;
        if output.status.success() {
            Ok(())
        } else {
            Err(io::Error::other(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

/// Whether any process in the group led by `pid` still exists (zombies
/// included).
pub(crate) fn group_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        let Ok(pgid) = to_pid(pid) else {
            return false;
        };
        // Safety: signal 0 performs the permission/existence check only.
        unsafe { libc::killpg(pgid, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Poll until the process group led by `pid` has emptied or `wait` elapses.
/// Returns `true` if members are still present afterwards.
pub(crate) async fn group_lingers(pid: u32, wait: Duration) -> bool {
    let step = Duration::from_millis(25);
    let mut waited = Duration::ZERO;
    while group_alive(pid) {
        if waited >= wait {
            return true;
        }
        tokio::time::sleep(step).await;
        waited += step;
    }
    false
}

/// Apply `priority` to `pid` unless it already matches the priority of the
/// current process.
pub(crate) fn apply_priority(pid: u32, priority: PriorityClass) -> io::Result<bool> {
    #[cfg(unix)]
    {
        let target = priority.nice_value();
        if current_nice() == Some(target) {
            return Ok(false);
        }
        // Safety: plain syscall on a child we just spawned.
        let rc = unsafe {
            libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, target)
        };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(true)
    }
    #[cfg(not(unix))]
    {
        let _ = (pid, priority);
        Ok(false)
    }
}

#[cfg(unix)]
fn current_nice() -> Option<i32> {
    // getpriority may legitimately return -1, so errno must be checked.
    // Safety: both calls only read process state.
    unsafe {
        clear_errno();
        let nice = libc::getpriority(libc::PRIO_PROCESS, 0);
        if nice == -1 && io::Error::last_os_error().raw_os_error().unwrap_or(0) != 0 {
            return None;
        }
        Some(nice)
    }
}

#[cfg(all(unix, any(target_os = "linux", target_os = "android")))]
unsafe fn clear_errno() {
    *libc::__errno_location() = 0;
}

#[cfg(all(unix, any(target_os = "macos", target_os = "ios", target_os = "freebsd")))]
unsafe fn clear_errno() {
    *libc::__error() = 0;
}

#[cfg(all(
    unix,
    not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd"
    ))
))]
unsafe fn clear_errno() {}

#[cfg(unix)]
fn to_pid(pid: u32) -> io::Result<libc::pid_t> {
    match libc::pid_t::try_from(pid) {
        // 0 would address our own process group.
        Ok(p) if p > 0 => Ok(p),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid process id {pid}"),
        )),
    }
}
