//! Local multi-service process supervisor for the companion hub.
//!
//! Launches named background services (speech recognition, embedding,
//! retrieval, speech synthesis, the companion animation process, a game
//! bridge) as child processes, follows their log files, probes their
//! health ports, and tears everything down deterministically on exit.
//! The UI layer is an external consumer of [`Supervisor`] and its event
//! subscription.

mod config;
mod error;
mod process;
mod supervisor;

pub use config::{load_config, HubConfig, ServiceConfig};
pub use error::{AppError, ErrorKind, Result};
pub use process::{probe_port, Launcher, ServiceHandle, SystemLauncher};
pub use supervisor::{
    HealthResult, LogEvent, Phase, ServiceDescriptor, Supervisor, SupervisorEvent,
};
