//! The supervisor: owns the per-service runtime-state table and drives
//! lifecycle operations against it.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use futures_util::stream::{self, StreamExt as _};
use tokio::sync::broadcast;

use crate::error::{AppError, Result};
use crate::process::{self, Launcher, ServiceHandle, SystemLauncher};

use super::tailer::TailerHandle;
use super::{
    HealthResult, Phase, ServiceDescriptor, SupervisorEvent, PROBE_CONCURRENCY, PROBE_TIMEOUT,
    STARTUP_PROBE_DELAY,
};

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Mutable per-service state. Mutated only through supervisor operations;
/// the lock is held for field access only, never across I/O.
struct RuntimeState {
    phase: Phase,
    handle: Option<Box<dyn ServiceHandle>>,
    /// Pid recorded at launch; survives a reaped handle so teardown can
    /// still target the process tree.
    last_pid: Option<u32>,
    tailer: Option<TailerHandle>,
    reachable: Option<bool>,
}

struct ServiceEntry {
    descriptor: ServiceDescriptor,
    /// Serializes start/stop for this service only. Operations on other
    /// services never contend on it.
    op_lock: tokio::sync::Mutex<()>,
    state: Mutex<RuntimeState>,
    /// Monotonic log sequence shared by successive tailers of this service.
    log_seq: Arc<AtomicU64>,
}

impl ServiceEntry {
    fn new(descriptor: ServiceDescriptor) -> Self {
        Self {
            descriptor,
            op_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(RuntimeState {
                phase: Phase::Stopped,
                handle: None,
                last_pid: None,
                tailer: None,
                reachable: None,
            }),
            log_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Manages the registered services.
pub struct Supervisor {
    services: HashMap<String, Arc<ServiceEntry>>,
    launcher: Arc<dyn Launcher>,
    events: broadcast::Sender<SupervisorEvent>,
}

impl Supervisor {
    pub fn new(descriptors: Vec<ServiceDescriptor>) -> Self {
        Self::with_launcher(descriptors, Arc::new(SystemLauncher))
    }

    pub fn with_launcher(descriptors: Vec<ServiceDescriptor>, launcher: Arc<dyn Launcher>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let services = descriptors
            .into_iter()
            .map(|descriptor| {
                (
                    descriptor.name.clone(),
                    Arc::new(ServiceEntry::new(descriptor)),
                )
            })
            .collect();
        Self {
            services,
            launcher,
            events,
        }
    }

    /// Subscribe to log lines, phase changes, and health results.
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    /// Start a service. No-op when it is already `Starting` or `Running`,
    /// so repeated UI clicks cannot spawn the process twice.
    pub async fn start(&self, name: &str) -> Result<Phase> {
        let entry = self.entry(name)?;
        let _op = entry.op_lock.lock().await;

        {
            let mut state = entry.lock_state();
            match state.phase {
                Phase::Running | Phase::Starting => return Ok(state.phase),
                _ => state.phase = Phase::Starting,
            }
        }
        self.emit_phase(name, Phase::Starting);

        let handle = match self.launcher.launch(&entry.descriptor) {
            Ok(handle) => handle,
            Err(err) => {
                entry.lock_state().phase = Phase::StartFailed;
                self.emit_phase(name, Phase::StartFailed);
                log::error!("failed to launch {name}: {err}");
                return Err(err);
            }
        };
        let pid = handle.pid();
        log::info!("service {name} launched (pid: {pid:?})");

        // A tailer left over from an abandoned stop must finish before a
        // new one follows the same file.
        let previous = entry.lock_state().tailer.take();
        if let Some(previous) = previous {
            previous.stop().await;
        }

        let tailer = entry.descriptor.log_path.as_ref().map(|path| {
            TailerHandle::spawn(
                name.to_string(),
                path.clone(),
                Arc::clone(&entry.log_seq),
                self.events.clone(),
            )
        });

        {
            let mut state = entry.lock_state();
            state.handle = Some(handle);
            state.last_pid = pid;
            state.tailer = tailer;
            state.phase = Phase::Running;
        }
        self.emit_phase(name, Phase::Running);

        if entry.descriptor.port.is_some() {
            self.schedule_startup_probe(&entry);
        }

        Ok(Phase::Running)
    }

    /// Stop a service. Always leaves the phase at `Stopped`; termination
    /// failures are logged and broadcast rather than blocking teardown.
    pub async fn stop(&self, name: &str) -> Result<Phase> {
        let entry = self.entry(name)?;
        let _op = entry.op_lock.lock().await;

        let (tailer, handle, last_pid) = {
            let mut state = entry.lock_state();
            if state.phase == Phase::Stopped {
                return Ok(Phase::Stopped);
            }
            state.phase = Phase::Stopping;
            (state.tailer.take(), state.handle.take(), state.last_pid)
        };
        self.emit_phase(name, Phase::Stopping);

        if let Some(tailer) = tailer {
            tailer.stop().await;
        }

        if let Err(err) = terminate_service(&entry.descriptor, handle, last_pid).await {
            log::warn!("termination of {name} failed: {err}");
            let _ = self.events.send(SupervisorEvent::TerminationFailed {
                service: name.to_string(),
                detail: err.to_string(),
            });
        }

        {
            let mut state = entry.lock_state();
            state.phase = Phase::Stopped;
            state.last_pid = None;
        }
        self.emit_phase(name, Phase::Stopped);

        Ok(Phase::Stopped)
    }

    /// Last-written phase of every registered service. Never touches
    /// process or network state.
    pub fn status_snapshot(&self) -> HashMap<String, Phase> {
        self.services
            .iter()
            .map(|(name, entry)| (name.clone(), entry.lock_state().phase))
            .collect()
    }

    /// Probe every service that declares a health port, concurrently with
    /// bounded fan-out, and record the results.
    pub async fn refresh_health(&self) -> HashMap<String, bool> {
        let targets: Vec<(Arc<ServiceEntry>, u16)> = self
            .services
            .values()
            .filter_map(|entry| entry.descriptor.port.map(|port| (Arc::clone(entry), port)))
            .collect();

        let probed: Vec<(Arc<ServiceEntry>, bool)> = stream::iter(targets)
            .map(|(entry, port)| async move {
                let reachable = process::probe_port(port, PROBE_TIMEOUT).await;
                (entry, reachable)
            })
            .buffer_unordered(PROBE_CONCURRENCY)
            .collect()
            .await;

        let mut results = HashMap::with_capacity(probed.len());
        for (entry, reachable) in probed {
            entry.lock_state().reachable = Some(reachable);
            let name = entry.descriptor.name.clone();
            let _ = self.events.send(SupervisorEvent::Health(HealthResult {
                service: name.clone(),
                reachable,
                checked_at: Utc::now(),
            }));
            results.insert(name, reachable);
        }
        results
    }

    /// Stop every service that is not already stopped. Best-effort and
    /// infallible: meant for application exit, including abnormal exit,
    /// where a stuck teardown would be worse than a leaked process.
    pub async fn shutdown_all(&self) {
        let names: Vec<String> = self
            .status_snapshot()
            .into_iter()
            .filter(|(_, phase)| *phase != Phase::Stopped)
            .map(|(name, _)| name)
            .collect();

        if names.is_empty() {
            return;
        }
        log::info!("shutting down {} running services", names.len());

        futures_util::future::join_all(names.iter().map(|name| async move {
            if let Err(err) = self.stop(name).await {
                log::warn!("failed to stop {name} during shutdown: {err}");
            }
        }))
        .await;
    }

    fn entry(&self, name: &str) -> Result<Arc<ServiceEntry>> {
        self.services
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::unknown_service(name))
    }

    fn emit_phase(&self, name: &str, phase: Phase) {
        let _ = self.events.send(SupervisorEvent::PhaseChanged {
            service: name.to_string(),
            phase,
        });
    }

    /// Informational reachability check shortly after a start. Never
    /// reverts the phase; a service that is up but not yet listening
    /// simply reports unreachable until the next scan.
    fn schedule_startup_probe(&self, entry: &Arc<ServiceEntry>) {
        let entry = Arc::clone(entry);
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(STARTUP_PROBE_DELAY).await;
            let Some(port) = entry.descriptor.port else {
                return;
            };
            let reachable = process::probe_port(port, PROBE_TIMEOUT).await;
            entry.lock_state().reachable = Some(reachable);
            let _ = events.send(SupervisorEvent::Health(HealthResult {
                service: entry.descriptor.name.clone(),
                reachable,
                checked_at: Utc::now(),
            }));
        });
    }
}

/// Tear down the OS process behind a service: prefer the recorded handle,
/// fall back to the recorded pid, and finally to whatever process owns the
/// descriptor's port (a service adopted from a previous session).
async fn terminate_service(
    descriptor: &ServiceDescriptor,
    handle: Option<Box<dyn ServiceHandle>>,
    last_pid: Option<u32>,
) -> Result<()> {
    let name = descriptor.name.clone();

    if let Some(mut handle) = handle {
        if handle.is_alive() {
            return tokio::task::spawn_blocking(move || handle.terminate())
                .await
                .map_err(|e| AppError::termination_failed(e.to_string()))?;
        }
        log::debug!("handle for {name} already exited, checking for orphans");
    }

    if let Some(pid) = last_pid {
        if process::is_process_alive(pid) {
            return tokio::task::spawn_blocking(move || process::kill_process_tree(pid))
                .await
                .map_err(|e| AppError::termination_failed(e.to_string()))?;
        }
    }

    let Some(port) = descriptor.port else {
        return Ok(());
    };
    tokio::task::spawn_blocking(move || match process::terminate_by_port(port) {
        Ok(Some(pid)) => {
            log::info!("stopped {name} via port {port} (pid: {pid})");
            Ok(())
        }
        Ok(None) => {
            log::info!("no process listening on port {port} for {name}");
            Ok(())
        }
        Err(err) => Err(err),
    })
    .await
    .map_err(|e| AppError::termination_failed(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_service_is_rejected() {
        let supervisor = Supervisor::new(Vec::new());
        let err = supervisor.start("ghost").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnknownService);
        let err = supervisor.stop("ghost").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnknownService);
    }

    #[tokio::test]
    async fn snapshot_starts_all_stopped() {
        let descriptors = vec![
            ServiceDescriptor {
                name: "asr".to_string(),
                command: "scripts/start_asr.sh".to_string(),
                args: Vec::new(),
                cwd: None,
                port: Some(1000),
                log_path: None,
            },
            ServiceDescriptor {
                name: "tts".to_string(),
                command: "scripts/start_tts.sh".to_string(),
                args: Vec::new(),
                cwd: None,
                port: Some(5000),
                log_path: None,
            },
        ];
        let supervisor = Supervisor::new(descriptors);

        let mut names = supervisor.service_names();
        names.sort();
        assert_eq!(names, vec!["asr", "tts"]);

        let snapshot = supervisor.status_snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.values().all(|phase| *phase == Phase::Stopped));
    }
}
