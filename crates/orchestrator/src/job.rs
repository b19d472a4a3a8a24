//! Per-job state and reporting types.

use std::path::PathBuf;

use fleetcrypt_core::types::{JobOutcome, Mode, WorkerId};
use fleetcrypt_events::JobId;
use serde::Serialize;

use crate::registry::WorkerInfo;

/// Completion code reported for a placeholder (degraded) artifact.
pub const DEGRADED_CODE: i32 = 2;

/// Completion code reported when the master executable cannot be launched.
pub const SPAWN_FAILED_CODE: i32 = -1;

/// A request arriving from the presentation boundary.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub input: PathBuf,
    /// Requested output; `None` or empty derives it from the input.
    pub output: Option<PathBuf>,
    pub mode: Mode,
    pub worker_ids: Vec<WorkerId>,
}

/// Terminal reasons a job is reported as failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobFailure {
    #[error("No valid workers selected")]
    NoWorkers,

    #[error("Input file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("Failed to launch {}: {message}", .program.display())]
    Spawn { program: PathBuf, message: String },

    #[error("File processing failed with code: {}. Fallback method also failed: {message}", display_code(.exit_code))]
    FallbackExhausted {
        exit_code: Option<i32>,
        message: String,
    },
}

fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}

/// One encrypt-or-decrypt round trip through a master process.
///
/// The outcome only moves forward: once terminal it never changes again.
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub mode: Mode,
    pub input: PathBuf,
    pub output: PathBuf,
    pub workers: Vec<WorkerInfo>,
    master_pid: Option<u32>,
    master_bound: bool,
    outcome: JobOutcome,
}

impl Job {
    pub fn new(
        id: JobId,
        mode: Mode,
        input: PathBuf,
        output: PathBuf,
        workers: Vec<WorkerInfo>,
    ) -> Self {
        Self {
            id,
            mode,
            input,
            output,
            workers,
            master_pid: None,
            master_bound: false,
            outcome: JobOutcome::Pending,
        }
    }

    pub fn outcome(&self) -> JobOutcome {
        self.outcome
    }

    /// Move to `outcome`. Returns `false` and leaves the job untouched if it
    /// has already settled.
    pub fn settle(&mut self, outcome: JobOutcome) -> bool {
        if self.outcome.is_terminal() {
            tracing::warn!(
                job_id = %self.id,
                current = ?self.outcome,
                rejected = ?outcome,
                "Ignoring outcome change on settled job",
            );
            return false;
        }
        self.outcome = outcome;
        true
    }

    /// Associate the master process. A job has at most one master; a second
    /// call returns `false`.
    pub fn bind_master(&mut self, pid: Option<u32>) -> bool {
        if self.master_bound {
            return false;
        }
        self.master_bound = true;
        self.master_pid = pid;
        true
    }

    pub fn master_pid(&self) -> Option<u32> {
        self.master_pid
    }

    pub fn worker_addresses(&self) -> impl Iterator<Item = &str> {
        self.workers.iter().map(|w| w.address.as_str())
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            mode: self.mode,
            input: self.input.clone(),
            output: self.output.clone(),
            workers: self.workers.iter().map(|w| w.id).collect(),
            outcome: self.outcome,
        }
    }
}

/// Snapshot of an in-flight job.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub mode: Mode,
    pub input: PathBuf,
    pub output: PathBuf,
    pub workers: Vec<WorkerId>,
    pub outcome: JobOutcome,
}

/// Final result of a job, mirrored by its `JobCompleted` event.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job_id: JobId,
    pub mode: Mode,
    pub input: PathBuf,
    pub output: PathBuf,
    /// Path of the artifact found or written, if any.
    pub artifact: Option<PathBuf>,
    pub outcome: JobOutcome,
    /// Raw master exit code; advisory only.
    pub exit_code: Option<i32>,
    /// Code published in the completion event.
    pub code: i32,
    pub failure: Option<JobFailure>,
    pub degraded: bool,
}

/// Completion code for the presentation boundary.
///
/// `0` for success outcomes, [`DEGRADED_CODE`] for a placeholder artifact,
/// [`SPAWN_FAILED_CODE`] when the master never ran, otherwise the master's
/// nonzero exit code or `1`.
pub fn completion_code(
    outcome: JobOutcome,
    exit_code: Option<i32>,
    failure: Option<&JobFailure>,
) -> i32 {
    match outcome {
        JobOutcome::Succeeded | JobOutcome::FallbackSucceeded => 0,
        JobOutcome::Degraded => DEGRADED_CODE,
        JobOutcome::Pending | JobOutcome::Failed => match failure {
            Some(JobFailure::Spawn { .. }) => SPAWN_FAILED_CODE,
            _ => exit_code.filter(|c| *c != 0).unwrap_or(1),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
