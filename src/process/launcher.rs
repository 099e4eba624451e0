//! Spawning managed service processes.

use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::error::{AppError, Result};
use crate::supervisor::ServiceDescriptor;

use super::control;

/// Opaque reference to a spawned service process.
///
/// `is_alive` must not block; `terminate` is best-effort, targets the
/// whole process tree, and may block briefly.
pub trait ServiceHandle: Send {
    fn pid(&self) -> Option<u32>;
    fn is_alive(&mut self) -> bool;
    fn terminate(&mut self) -> Result<()>;
}

/// Strategy seam for process creation, so tests can substitute launches
/// without touching the OS.
pub trait Launcher: Send + Sync {
    fn launch(&self, descriptor: &ServiceDescriptor) -> Result<Box<dyn ServiceHandle>>;
}

/// Production launcher: spawns the descriptor's command as an OS process.
///
/// The child gets its own process group so termination can reach the
/// workers that wrapper scripts spawn. Service output goes to the
/// service's own log file, not through us, so stdio is detached.
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn launch(&self, descriptor: &ServiceDescriptor) -> Result<Box<dyn ServiceHandle>> {
        let mut cmd = Command::new(&descriptor.command);
        cmd.args(&descriptor.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        if let Some(dir) = &descriptor.cwd {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        #[cfg(target_os = "windows")]
        {
            use windows::Win32::System::Threading::{CREATE_NEW_PROCESS_GROUP, CREATE_NO_WINDOW};
            cmd.creation_flags((CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW).0);
        }

        let child = cmd
            .spawn()
            .map_err(|e| spawn_error(&descriptor.command, &e))?;
        let pid = child.id();

        Ok(Box::new(SystemHandle { child, pid }))
    }
}

fn spawn_error(command: &str, err: &std::io::Error) -> AppError {
    match err.kind() {
        std::io::ErrorKind::NotFound => AppError::executable_not_found(command),
        std::io::ErrorKind::PermissionDenied => AppError::spawn_denied(command, err.to_string()),
        _ => AppError::spawn_failed(format!("failed to spawn {command}: {err}")),
    }
}

struct SystemHandle {
    child: Child,
    /// Captured at spawn; `Child::id` returns `None` once the child has
    /// been reaped, but termination still needs the group leader's pid.
    pid: Option<u32>,
}

impl ServiceHandle for SystemHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn terminate(&mut self) -> Result<()> {
        match self.pid {
            Some(pid) => kill_tree_and_reap(&mut self.child, pid),
            None => self
                .child
                .start_kill()
                .map_err(|e| AppError::termination_failed(e.to_string())),
        }
    }
}

fn kill_tree_and_reap(child: &mut Child, pid: u32) -> Result<()> {
    let result = control::kill_process_tree(pid);
    // Collect the exit status if it is already available, so the child
    // does not linger as a zombie until the handle drops.
    let _ = child.try_wait();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(command: &str) -> ServiceDescriptor {
        ServiceDescriptor {
            name: "test".to_string(),
            command: command.to_string(),
            args: Vec::new(),
            cwd: None,
            port: None,
            log_path: None,
        }
    }

    #[tokio::test]
    async fn missing_executable_maps_to_executable_not_found() {
        let err = SystemLauncher
            .launch(&descriptor("definitely-not-a-real-command-a7f3"))
            .err()
            .unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::ExecutableNotFound);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawned_process_is_alive_then_terminated() {
        let mut handle = SystemLauncher
            .launch(&ServiceDescriptor {
                args: vec!["30".to_string()],
                ..descriptor("sleep")
            })
            .unwrap();

        assert!(handle.is_alive());
        handle.terminate().unwrap();

        // try_wait needs a moment for the signal to be delivered.
        let mut alive = true;
        for _ in 0..20 {
            if !handle.is_alive() {
                alive = false;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        assert!(!alive, "process survived terminate()");
    }
}
