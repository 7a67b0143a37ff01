//! Child process liveness checks and signal escalation.

use std::time::Duration;

use tokio::process::Child;

/// Check if a process is still alive.
pub fn pid_is_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }

    #[cfg(unix)]
    {
        // Signal 0 doesn't send a signal but checks if the process exists
        let result = unsafe { libc::kill(pid as libc::pid_t, 0) };
        if result == 0 {
            return true;
        }
        // EPERM means it exists but we don't have permission
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    {
        true // Non-Unix: can't check liveness, assume running
    }
}

/// Send `signal` to `pid`. Returns false if delivery failed.
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: libc::c_int) -> bool {
    if pid == 0 {
        return false;
    }
    unsafe { libc::kill(pid as libc::pid_t, signal) == 0 }
}

/// Stop a child process and reap it.
///
/// Sends SIGINT so the tool can release state locks, waits `grace`, then
/// SIGTERM, then SIGKILL. Returns the number of signals that were needed.
pub async fn terminate_child(child: &mut Child, grace: Duration) -> usize {
    #[cfg(unix)]
    {
        let Some(pid) = child.id() else {
            // Already reaped
            return 0;
        };
        if !pid_is_alive(pid) {
            let _ = child.wait().await;
            return 0;
        }

        for (attempt, signal) in [libc::SIGINT, libc::SIGTERM].into_iter().enumerate() {
            if !send_signal(pid, signal) {
                let _ = child.wait().await;
                return attempt;
            }
            if tokio::time::timeout(grace, child.wait()).await.is_ok() {
                return attempt + 1;
            }
            log::warn!(
                "Process {} did not exit after signal {}, escalating",
                pid,
                signal
            );
        }

        log::error!("Process {} ignored SIGTERM, sending SIGKILL", pid);
        if let Err(e) = child.kill().await {
            log::warn!("Failed to kill process {}: {}", pid, e);
        }
        3
    }

    #[cfg(not(unix))]
    {
        let _ = grace;
        if let Err(e) = child.kill().await {
            log::warn!("Failed to kill child process: {}", e);
        }
        1
    }
}
