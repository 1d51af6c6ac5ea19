//! Child shutdown with SIGTERM → SIGKILL escalation, and pid liveness checks.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tokio::time::timeout;
use tracing::{debug, warn};

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Stop a child process and reap it.
///
/// # Strategy
/// 1. If `graceful`, send SIGTERM and wait up to `grace` for exit
/// 2. Otherwise, or on timeout, SIGKILL
/// 3. Wait up to `kill_grace` for reaping
///
/// On non-unix targets there is no SIGTERM and the child is killed directly.
pub async fn shutdown_child(
    child: &mut Child,
    graceful: bool,
    grace: Duration,
    kill_grace: Duration,
) -> io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }

    #[cfg(unix)]
    if graceful {
        if let Some(status) = terminate(child, grace).await? {
            return Ok(status);
        }
        warn!(pid = ?child.id(), grace_secs = grace.as_secs(), "Process ignored SIGTERM, sending SIGKILL");
    }

    #[cfg(not(unix))]
    let _ = (graceful, grace);

    child.start_kill()?;
    match timeout(kill_grace, child.wait()).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("process did not exit within {}s of SIGKILL", kill_grace.as_secs()),
        )),
    }
}

/// SIGTERM and wait; `None` when the process outlived `grace`.
#[cfg(unix)]
async fn terminate(child: &mut Child, grace: Duration) -> io::Result<Option<ExitStatus>> {
    let Some(pid) = child.id() else {
        // Already reaped
        return child.wait().await.map(Some);
    };

    if let Err(e) = signal::kill(nix_pid(pid), Signal::SIGTERM) {
        // Process may have already exited
        if e == Errno::ESRCH {
            return child.wait().await.map(Some);
        }
        return Err(io::Error::other(e));
    }
    debug!(pid, "Sent SIGTERM");

    match timeout(grace, child.wait()).await {
        Ok(result) => result.map(Some),
        Err(_) => Ok(None),
    }
}

/// Whether a process with this pid exists.
///
/// Uses the null signal. A permission error means the process exists but
/// belongs to someone else.
pub fn pid_exists(pid: u32) -> bool {
    #[cfg(unix)]
    {
        match signal::kill(nix_pid(pid), None) {
            Ok(()) => true,
            Err(Errno::ESRCH) => false,
            Err(_) => true,
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

#[cfg(unix)]
fn nix_pid(pid: u32) -> Pid {
    Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX))
}
