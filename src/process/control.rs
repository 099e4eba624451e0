//! Platform-agnostic process control functions.
//!
//! Termination always targets the whole process tree: launch commands are
//! typically wrapper scripts, and killing only the wrapper leaves the real
//! worker alive with its port still bound.

use crate::error::{AppError, Result};

/// Check if a process is alive by PID.
#[cfg(target_os = "windows")]
pub fn is_process_alive(pid: u32) -> bool {
    super::win_api::is_process_alive(pid)
}

/// Check if a process is alive by PID.
#[cfg(not(target_os = "windows"))]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Terminate a process and everything it spawned. Blocking.
///
/// Sends SIGTERM to the process group first, waits out a short grace
/// window, then SIGKILLs whatever remains. A process that disappears
/// between signals counts as terminated.
#[cfg(not(target_os = "windows"))]
pub fn kill_process_tree(pid: u32) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::{getpgid, Pid};

    if !is_process_alive(pid) {
        return Ok(());
    }

    let target = Pid::from_raw(pid as i32);
    let group = getpgid(Some(target)).ok();

    let signal_tree = |signal: Signal| match group {
        Some(pgid) => killpg(pgid, signal),
        None => kill(target, signal),
    };

    if signal_tree(Signal::SIGTERM).is_ok() && wait_for_exit(pid) {
        return Ok(());
    }

    match signal_tree(Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(AppError::termination_failed(format!(
            "failed to kill process tree of pid {pid}: {e}"
        ))),
    }
}

/// Terminate a process and everything it spawned. Blocking.
#[cfg(target_os = "windows")]
pub fn kill_process_tree(pid: u32) -> Result<()> {
    if !is_process_alive(pid) {
        return Ok(());
    }

    let output = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .output()
        .map_err(|e| AppError::termination_failed(format!("failed to run taskkill: {e}")))?;

    if output.status.success() || !is_process_alive(pid) {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let detail = stderr.trim();
        let detail = if detail.is_empty() {
            stdout.trim()
        } else {
            detail
        };
        Err(AppError::termination_failed(format!(
            "taskkill failed for pid {}: {}",
            pid,
            if detail.is_empty() {
                "(no output)"
            } else {
                detail
            }
        )))
    }
}

#[cfg(not(target_os = "windows"))]
fn wait_for_exit(pid: u32) -> bool {
    use std::time::Instant;

    use super::{TERM_POLL_INTERVAL, TERM_WAIT_TIMEOUT};

    let deadline = Instant::now() + TERM_WAIT_TIMEOUT;
    while Instant::now() < deadline {
        if !is_process_alive(pid) {
            return true;
        }
        std::thread::sleep(TERM_POLL_INTERVAL);
    }
    !is_process_alive(pid)
}

/// Find the PID listening on a local TCP port.
#[cfg(target_os = "windows")]
pub fn pid_listening_on_port(port: u16) -> Option<u32> {
    super::win_api::pid_on_port(port)
}

/// Find the PID listening on a local TCP port.
#[cfg(not(target_os = "windows"))]
pub fn pid_listening_on_port(port: u16) -> Option<u32> {
    let output = std::process::Command::new("lsof")
        .args(["-t", "-sTCP:LISTEN", &format!("-iTCP:{port}")])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .find_map(|line| line.trim().parse::<u32>().ok())
}

/// Terminate whatever process currently owns `port`.
///
/// Best-effort adoption path for services whose handle was lost (for
/// example, started by a previous session). Returns the PID that was
/// killed, or `None` if nothing was listening.
pub fn terminate_by_port(port: u16) -> Result<Option<u32>> {
    match pid_listening_on_port(port) {
        Some(pid) => kill_process_tree(pid).map(|()| Some(pid)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn reaped_child_pid() -> u32 {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[cfg(unix)]
    #[test]
    fn exited_pid_is_not_alive() {
        assert!(!is_process_alive(reaped_child_pid()));
    }

    #[cfg(unix)]
    #[test]
    fn killing_an_exited_process_succeeds() {
        assert!(kill_process_tree(reaped_child_pid()).is_ok());
    }

    #[test]
    fn unbound_port_has_no_listener_to_terminate() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        assert!(matches!(terminate_by_port(port), Ok(None)));
    }
}
