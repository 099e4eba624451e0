//! Service supervision: lifecycle state machine, log tailing, health scans.

mod manager;
mod tailer;

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use manager::Supervisor;

/// Timeout for a single TCP health probe.
pub(crate) const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Maximum number of in-flight probes during a health scan.
pub(crate) const PROBE_CONCURRENCY: usize = 4;

/// Poll interval while a log file is missing or has no new data.
pub(crate) const TAIL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long `stop` waits for a tailer to exit before abandoning it.
pub(crate) const TAILER_STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Delay before the informational probe that follows a service start.
pub(crate) const STARTUP_PROBE_DELAY: Duration = Duration::from_secs(3);

/// Static definition of one manageable service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Local TCP port probed for liveness, if the service has one.
    #[serde(default)]
    pub port: Option<u16>,
    /// Append-only log file written by the service itself.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

/// Lifecycle phase of a managed service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Stopped,
    Starting,
    Running,
    Stopping,
    StartFailed,
}

/// One line read from a service log file.
///
/// `seq` is monotonic per service and survives tailer restarts, so
/// subscribers can detect reordering across an abandoned tailer and
/// its replacement.
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub service: String,
    pub line: String,
    pub seq: u64,
}

/// Outcome of a single reachability probe.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResult {
    pub service: String,
    pub reachable: bool,
    pub checked_at: DateTime<Utc>,
}

/// Event broadcast to UI subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SupervisorEvent {
    PhaseChanged { service: String, phase: Phase },
    Log(LogEvent),
    Health(HealthResult),
    TerminationFailed { service: String, detail: String },
}
