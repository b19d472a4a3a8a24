//! Worker process registry.
//!
//! [`WorkerRegistry`] spawns worker executables, assigns each one the next
//! id in insertion order, and keeps every entry for the lifetime of the
//! registry so stopped workers stay queryable. Each worker gets one task
//! per output stream and one exit-monitor task; the monitor is the only
//! place a worker becomes `Stopped` after a normal exit.
//!
//! `list()` and `stop()` are each atomic, but nothing ties them together:
//! a worker observed in a snapshot may have changed state by the time it
//! is stopped.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use fleetcrypt_core::types::{WorkerId, WorkerStatus};
use fleetcrypt_events::{EventBus, FleetEvent};
use serde::Serialize;
use tokio::process::Command;
use tokio::sync::RwLock;

use crate::process::{forward_lines, terminate};

/// Public snapshot of a registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub address: String,
    pub status: WorkerStatus,
}

/// Errors that can occur when starting a worker.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The worker executable could not be launched. The attempt is still
    /// recorded under `id` with status `Stopped`.
    #[error("Failed to start worker {id} on {address}: {source}")]
    Spawn {
        id: WorkerId,
        address: String,
        source: std::io::Error,
    },
}

/// Internal bookkeeping for a single worker.
struct WorkerEntry {
    id: WorkerId,
    address: String,
    status: WorkerStatus,
    /// OS pid while the process is alive.
    pid: Option<u32>,
}

impl WorkerEntry {
    fn info(&self) -> WorkerInfo {
        WorkerInfo {
            id: self.id,
            address: self.address.clone(),
            status: self.status,
        }
    }
}

#[derive(Default)]
struct RegistryState {
    workers: Vec<WorkerEntry>,
    /// Bumped by `stop_all`; exit monitors started in an earlier epoch no
    /// longer own a slot in `workers`.
    epoch: u64,
}

/// Owns the fleet of worker processes.
pub struct WorkerRegistry {
    worker_bin: PathBuf,
    state: Arc<RwLock<RegistryState>>,
    bus: Arc<EventBus>,
}

impl WorkerRegistry {
    pub fn new(worker_bin: impl Into<PathBuf>, bus: Arc<EventBus>) -> Self {
        Self {
            worker_bin: worker_bin.into(),
            state: Arc::new(RwLock::new(RegistryState::default())),
            bus,
        }
    }

    /// Spawn a worker bound to `address`.
    ///
    /// The entry is recorded as `Running` as soon as the process exists: no
    /// readiness handshake is performed, so the worker may not accept
    /// connections yet.
    pub async fn start(&self, address: &str) -> Result<WorkerInfo, RegistryError> {
        let mut state = self.state.write().await;
        let id = state.workers.len();

        tracing::info!(worker_id = id, address, "Starting worker");

        let spawned = Command::new(&self.worker_bin)
            .arg(address)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                state.workers.push(WorkerEntry {
                    id,
                    address: address.to_string(),
                    status: WorkerStatus::Stopped,
                    pid: None,
                });
                tracing::error!(
                    worker_id = id,
                    address,
                    worker_bin = %self.worker_bin.display(),
                    error = %source,
                    "Failed to spawn worker",
                );
                return Err(RegistryError::Spawn {
                    id,
                    address: address.to_string(),
                    source,
                });
            }
        };

        let entry = WorkerEntry {
            id,
            address: address.to_string(),
            status: WorkerStatus::Running,
            pid: child.id(),
        };
        let info = entry.info();
        state.workers.push(entry);
        let epoch = state.epoch;
        drop(state);

        self.bus.publish(FleetEvent::WorkerStarted {
            id,
            address: info.address.clone(),
            status: info.status,
        });

        if let Some(stdout) = child.stdout.take() {
            let bus = Arc::clone(&self.bus);
            forward_lines(stdout, move |text| {
                tracing::info!(worker_id = id, "Worker stdout: {text}");
                bus.publish(FleetEvent::WorkerOutput { id, text });
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let bus = Arc::clone(&self.bus);
            forward_lines(stderr, move |text| {
                tracing::error!(worker_id = id, "Worker stderr: {text}");
                bus.publish(FleetEvent::WorkerError { id, text });
            });
        }

        let state = Arc::clone(&self.state);
        let bus = Arc::clone(&self.bus);
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    tracing::warn!(worker_id = id, error = %e, "Failed to wait on worker");
                    None
                }
            };
            tracing::info!(worker_id = id, exit_code = ?code, "Worker exited");

            {
                let mut state = state.write().await;
                if state.epoch == epoch {
                    if let Some(entry) = state.workers.get_mut(id) {
                        entry.status = WorkerStatus::Stopped;
                        entry.pid = None;
                    }
                }
            }
            bus.publish(FleetEvent::WorkerStopped { id, code });
        });

        tracing::info!(worker_id = id, "Worker started with status 'running'");
        Ok(info)
    }

    /// Ask worker `id` to stop.
    ///
    /// Returns `true` once the termination request is issued and the entry
    /// is marked `Stopping`; the move to `Stopped` happens when the process
    /// actually exits, which may be arbitrarily late. Returns `false` for an
    /// unknown id, a worker without a live process, or a failed request.
    pub async fn stop(&self, id: WorkerId) -> bool {
        tracing::info!(worker_id = id, "Stopping worker");
        let mut state = self.state.write().await;

        // Ids are list positions; entries are never removed individually.
        let Some(entry) = state.workers.get_mut(id) else {
            tracing::warn!(worker_id = id, "Worker not found");
            return false;
        };
        let Some(pid) = entry.pid else {
            tracing::warn!(worker_id = id, status = %entry.status, "Worker has no live process");
            return false;
        };

        if let Err(e) = terminate(pid) {
            tracing::error!(worker_id = id, pid, error = %e, "Error stopping worker");
            return false;
        }
        entry.status = WorkerStatus::Stopping;
        drop(state);

        self.bus.publish(FleetEvent::WorkerStopping { id });
        true
    }

    /// Signal every live worker and forget all entries.
    ///
    /// Used at shutdown only. Returns the number of processes signalled.
    pub async fn stop_all(&self) -> usize {
        tracing::info!("Stopping all workers");
        let mut state = self.state.write().await;
        let mut signalled = 0;

        for entry in state.workers.iter_mut() {
            let Some(pid) = entry.pid.take() else {
                continue;
            };
            match terminate(pid) {
                Ok(()) => signalled += 1,
                Err(e) => {
                    tracing::error!(worker_id = entry.id, pid, error = %e, "Error stopping worker");
                }
            }
            entry.status = WorkerStatus::Stopped;
        }

        state.workers.clear();
        state.epoch += 1;
        signalled
    }

    /// Snapshot of all workers in insertion order.
    pub async fn list(&self) -> Vec<WorkerInfo> {
        self.state
            .read()
            .await
            .workers
            .iter()
            .map(WorkerEntry::info)
            .collect()
    }

    pub async fn get(&self, id: WorkerId) -> Option<WorkerInfo> {
        self.state.read().await.workers.get(id).map(WorkerEntry::info)
    }

    /// Workers whose id appears in `ids`, in registry order.
    pub async fn select(&self, ids: &[WorkerId]) -> Vec<WorkerInfo> {
        self.state
            .read()
            .await
            .workers
            .iter()
            .filter(|w| ids.contains(&w.id))
            .map(WorkerEntry::info)
            .collect()
    }
}
