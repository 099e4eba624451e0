//! Process launching and control for managed services.

mod control;
mod health;
mod launcher;

#[cfg(target_os = "windows")]
pub(crate) mod win_api;

#[cfg(not(target_os = "windows"))]
use std::time::Duration;

pub use control::{is_process_alive, kill_process_tree, pid_listening_on_port, terminate_by_port};
pub use health::probe_port;
pub use launcher::{Launcher, ServiceHandle, SystemLauncher};

/// Grace window between the polite termination signal and the forced kill.
#[cfg(not(target_os = "windows"))]
pub(crate) const TERM_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Liveness poll interval while waiting out the grace window.
#[cfg(not(target_os = "windows"))]
pub(crate) const TERM_POLL_INTERVAL: Duration = Duration::from_millis(50);
