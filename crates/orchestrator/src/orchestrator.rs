//! Composition root.
//!
//! [`Orchestrator`] wires the event bus, the worker registry, the master
//! dispatcher and the storage proxy together and is the single entry point
//! used by presentation adapters.

use std::collections::HashMap;
use std::sync::Arc;

use fleetcrypt_core::paths::resolve_output_path;
use fleetcrypt_core::types::WorkerId;
use fleetcrypt_events::{EventBus, FleetEvent, JobId};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use crate::config::FleetConfig;
use crate::dispatcher::MasterDispatcher;
use crate::job::{Job, JobFailure, JobReport, JobRequest, JobSummary};
use crate::registry::{RegistryError, WorkerInfo, WorkerRegistry};
use crate::storage::RemoteStorage;

pub struct Orchestrator {
    bus: Arc<EventBus>,
    registry: WorkerRegistry,
    dispatcher: MasterDispatcher,
    storage: RemoteStorage,
    jobs: RwLock<HashMap<JobId, JobSummary>>,
    tracker: TaskTracker,
}

impl Orchestrator {
    pub fn new(config: &FleetConfig) -> Self {
        let bus = Arc::new(EventBus::new(config.event_capacity));
        Self {
            registry: WorkerRegistry::new(&config.worker_bin, Arc::clone(&bus)),
            dispatcher: MasterDispatcher::new(&config.master_bin, Arc::clone(&bus)),
            storage: RemoteStorage::new(&config.storage_bin, Arc::clone(&bus)),
            jobs: RwLock::new(HashMap::new()),
            tracker: TaskTracker::new(),
            bus,
        }
    }

    /// Subscribe to every worker, job and storage event.
    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.bus.subscribe()
    }

    // -- Workers ----------------------------------------------------------

    pub async fn start_worker(&self, address: &str) -> Result<WorkerInfo, RegistryError> {
        self.registry.start(address).await
    }

    pub async fn stop_worker(&self, id: WorkerId) -> bool {
        self.registry.stop(id).await
    }

    pub async fn list_workers(&self) -> Vec<WorkerInfo> {
        self.registry.list().await
    }

    // -- Jobs -------------------------------------------------------------

    /// Run one job to completion.
    ///
    /// Concurrent calls are independent; each spawns its own master process.
    pub async fn run_job(&self, request: JobRequest) -> JobReport {
        let job_id = uuid::Uuid::new_v4();
        let workers = self.registry.select(&request.worker_ids).await;
        let output = resolve_output_path(&request.input, request.mode, request.output.as_deref());
        let mut job = Job::new(job_id, request.mode, request.input, output, workers);

        if job.workers.is_empty() {
            tracing::warn!(job_id = %job_id, requested = ?request.worker_ids, "No valid workers selected");
            return self.dispatcher.reject(&mut job, JobFailure::NoWorkers);
        }

        self.jobs.write().await.insert(job_id, job.summary());
        let report = self.dispatcher.run(&mut job).await;
        self.jobs.write().await.remove(&job_id);
        report
    }

    /// Run a job in the background. Tracked so `shutdown` can wait for it.
    pub fn spawn_job(self: &Arc<Self>, request: JobRequest) -> JoinHandle<JobReport> {
        let this = Arc::clone(self);
        self.tracker.spawn(async move { this.run_job(request).await })
    }

    /// Snapshot of jobs whose master process has not finished yet.
    pub async fn in_flight_jobs(&self) -> Vec<JobSummary> {
        self.jobs.read().await.values().cloned().collect()
    }

    // -- Storage ----------------------------------------------------------

    pub fn storage(&self) -> &RemoteStorage {
        &self.storage
    }

    // -- Lifecycle --------------------------------------------------------

    /// Wait for background jobs, then stop every worker.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        let signalled = self.registry.stop_all().await;
        tracing::info!(signalled, "Orchestrator shut down");
    }
}
