//! Master-process dispatch.
//!
//! One master process per job. Its exit code is recorded but never decides
//! the outcome: the job succeeds when an artifact exists afterwards, and the
//! local [`FallbackCodec`] runs when none does.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use fleetcrypt_core::fallback::{DecryptReport, FallbackCodec};
use fleetcrypt_core::paths::{candidate_key_paths, has_encrypted_suffix};
use fleetcrypt_core::types::{JobOutcome, Mode};
use fleetcrypt_events::{EventBus, FleetEvent, JobId};
use tokio::process::Command;

use crate::job::{completion_code, Job, JobFailure, JobReport};
use crate::process::forward_lines;

/// Upper bound on waiting for a stream forwarder after the master exits.
///
/// A grandchild that inherited the pipes can keep them open indefinitely.
const STREAM_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of the execution phase, before the completion code is derived.
struct Execution {
    outcome: JobOutcome,
    artifact: Option<PathBuf>,
    exit_code: Option<i32>,
    failure: Option<JobFailure>,
}

impl Execution {
    fn failed(failure: JobFailure, exit_code: Option<i32>) -> Self {
        Self {
            outcome: JobOutcome::Failed,
            artifact: None,
            exit_code,
            failure: Some(failure),
        }
    }
}

/// Spawns master processes and settles their jobs.
pub struct MasterDispatcher {
    master_bin: PathBuf,
    codec: FallbackCodec,
    bus: Arc<EventBus>,
}

impl MasterDispatcher {
    pub fn new(master_bin: impl Into<PathBuf>, bus: Arc<EventBus>) -> Self {
        Self {
            master_bin: master_bin.into(),
            codec: FallbackCodec::default(),
            bus,
        }
    }

    /// Run `job` to a terminal outcome and publish its `JobCompleted` event.
    pub async fn run(&self, job: &mut Job) -> JobReport {
        tracing::info!(
            job_id = %job.id,
            mode = %job.mode,
            input = %job.input.display(),
            output = %job.output.display(),
            workers = job.workers.len(),
            "Running job",
        );

        let execution = self.execute(job).await;
        self.finish(job, execution)
    }

    /// Fail `job` without spawning anything.
    pub fn reject(&self, job: &mut Job, failure: JobFailure) -> JobReport {
        tracing::error!(job_id = %job.id, error = %failure, "Job rejected");
        self.error(job.id, failure.to_string());
        self.finish(job, Execution::failed(failure, None))
    }

    fn finish(&self, job: &mut Job, execution: Execution) -> JobReport {
        job.settle(execution.outcome);
        let outcome = job.outcome();
        let code = completion_code(outcome, execution.exit_code, execution.failure.as_ref());
        let degraded = outcome == JobOutcome::Degraded;

        tracing::info!(job_id = %job.id, ?outcome, code, degraded, "Job completed");
        self.bus.publish(FleetEvent::JobCompleted {
            job_id: job.id,
            code,
            outcome,
            degraded,
        });

        JobReport {
            job_id: job.id,
            mode: job.mode,
            input: job.input.clone(),
            output: job.output.clone(),
            artifact: execution.artifact,
            outcome,
            exit_code: execution.exit_code,
            code,
            failure: execution.failure,
            degraded,
        }
    }

    async fn execute(&self, job: &mut Job) -> Execution {
        if !tokio::fs::try_exists(&job.input).await.unwrap_or(false) {
            let failure = JobFailure::InputNotFound(job.input.clone());
            tracing::error!(job_id = %job.id, path = %job.input.display(), "Input file not found");
            self.error(job.id, failure.to_string());
            return Execution::failed(failure, None);
        }

        let output_dir = parent_dir(&job.output);
        if let Err(e) = tokio::fs::create_dir_all(&output_dir).await {
            tracing::error!(
                job_id = %job.id,
                path = %output_dir.display(),
                error = %e,
                "Error creating output directory",
            );
        }

        if job.mode == Mode::Decrypt {
            self.decrypt_preflight(job).await;
        }
        self.check_output_writable(job.id, job.mode, &output_dir).await;

        // -- Master process ------------------------------------------------

        let mut command = Command::new(&self.master_bin);
        command
            .arg(job.mode.as_str())
            .arg(&job.input)
            .arg(&job.output)
            .args(job.worker_addresses())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let failure = JobFailure::Spawn {
                    program: self.master_bin.clone(),
                    message: e.to_string(),
                };
                tracing::error!(job_id = %job.id, error = %e, "Master process error");
                self.error(job.id, format!("Process error: {e}"));
                return Execution::failed(failure, None);
            }
        };
        job.bind_master(child.id());

        let job_id = job.id;
        let mut forwarders = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            let bus = Arc::clone(&self.bus);
            forwarders.push(forward_lines(stdout, move |text| {
                tracing::info!(job_id = %job_id, "Master stdout: {text}");
                bus.publish(FleetEvent::JobOutput { job_id, text });
            }));
        }
        if let Some(stderr) = child.stderr.take() {
            let bus = Arc::clone(&self.bus);
            forwarders.push(forward_lines(stderr, move |text| {
                tracing::error!(job_id = %job_id, "Master stderr: {text}");
                bus.publish(FleetEvent::JobError { job_id, text });
            }));
        }

        let exit_code = match child.wait().await {
            Ok(status) => status.code(),
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to wait on master process");
                None
            }
        };
        tracing::info!(job_id = %job_id, exit_code = ?exit_code, "Master process exited");

        for handle in forwarders {
            if tokio::time::timeout(STREAM_DRAIN_TIMEOUT, handle).await.is_err() {
                tracing::warn!(job_id = %job_id, "Master output stream still open after exit");
            }
        }

        // -- Artifact check ------------------------------------------------

        if let Ok(meta) = tokio::fs::metadata(&job.output).await {
            if exit_code != Some(0) {
                tracing::warn!(
                    job_id = %job_id,
                    exit_code = ?exit_code,
                    "Master exited abnormally but left an artifact",
                );
            }
            tracing::info!(
                job_id = %job_id,
                path = %job.output.display(),
                bytes = meta.len(),
                "Output file created successfully",
            );
            self.output(
                job_id,
                format!(
                    "File processing completed successfully. Output saved to {}",
                    job.output.display()
                ),
            );
            return Execution {
                outcome: JobOutcome::Succeeded,
                artifact: Some(job.output.clone()),
                exit_code,
                failure: None,
            };
        }

        tracing::error!(
            job_id = %job_id,
            mode = %job.mode,
            exit_code = ?exit_code,
            path = %job.output.display(),
            "Output file was not created",
        );
        self.warning(
            job_id,
            format!(
                "Output file was not created (exit code: {}). Attempting fallback {}.",
                exit_code.map_or_else(|| "none".to_string(), |c| c.to_string()),
                job.mode,
            ),
        );

        self.fallback(job, exit_code).await
    }

    async fn fallback(&self, job: &Job, exit_code: Option<i32>) -> Execution {
        match job.mode {
            Mode::Encrypt => match self.codec.encrypt(&job.input, &job.output).await {
                Ok(report) => {
                    self.fallback_saved(job.id, job.mode, &report.output);
                    Execution {
                        outcome: JobOutcome::FallbackSucceeded,
                        artifact: Some(report.output),
                        exit_code,
                        failure: None,
                    }
                }
                Err(e) => self.fallback_exhausted(job.id, exit_code, e.to_string()),
            },
            Mode::Decrypt => match self.codec.decrypt(&job.input, &job.output).await {
                Ok(DecryptReport::Decrypted { output, key_source, .. }) => {
                    tracing::info!(job_id = %job.id, key_source = %key_source, "Fallback decrypt succeeded");
                    self.fallback_saved(job.id, job.mode, &output);
                    Execution {
                        outcome: JobOutcome::FallbackSucceeded,
                        artifact: Some(output),
                        exit_code,
                        failure: None,
                    }
                }
                Ok(DecryptReport::Placeholder { output, reason }) => {
                    self.error(job.id, format!("Fallback decryption failed: {reason}"));
                    self.error(
                        job.id,
                        format!(
                            "Output at {} is a placeholder copy of the input and is NOT decrypted",
                            output.display()
                        ),
                    );
                    Execution {
                        outcome: JobOutcome::Degraded,
                        artifact: Some(output),
                        exit_code,
                        failure: None,
                    }
                }
                Err(e) => self.fallback_exhausted(job.id, exit_code, e.to_string()),
            },
        }
    }

    fn fallback_saved(&self, job_id: JobId, mode: Mode, output: &Path) {
        tracing::info!(job_id = %job_id, %mode, path = %output.display(), "Fallback succeeded");
        self.output(
            job_id,
            format!(
                "File processing completed using fallback method. Output saved to {}",
                output.display()
            ),
        );
    }

    fn fallback_exhausted(&self, job_id: JobId, exit_code: Option<i32>, message: String) -> Execution {
        let failure = JobFailure::FallbackExhausted { exit_code, message };
        tracing::error!(job_id = %job_id, error = %failure, "Fallback failed");
        self.error(job_id, failure.to_string());
        Execution::failed(failure, exit_code)
    }

    async fn decrypt_preflight(&self, job: &Job) {
        if !has_encrypted_suffix(&job.input) {
            tracing::warn!(job_id = %job.id, path = %job.input.display(), "Input lacks .encrypted suffix");
            self.warning(
                job.id,
                format!(
                    "Warning: {} does not end with .encrypted. Decryption may fail.",
                    job.input.display()
                ),
            );
        }

        // Same rule as key discovery: empty key files do not count.
        for key_path in candidate_key_paths(&job.input, &job.output) {
            let usable = tokio::fs::metadata(&key_path)
                .await
                .is_ok_and(|meta| meta.is_file() && meta.len() > 0);
            if usable {
                tracing::info!(job_id = %job.id, path = %key_path.display(), "Found key file for decryption");
                return;
            }
        }

        tracing::warn!(job_id = %job.id, "No key file found for decryption in standard locations");
        self.warning(
            job.id,
            "Warning: No encryption key file found. Will attempt decryption anyway.".to_string(),
        );
    }

    /// Write and remove a throwaway file so permission problems show up as
    /// a warning before the master runs. Never fails the job.
    async fn check_output_writable(&self, job_id: JobId, mode: Mode, dir: &Path) {
        let scratch = dir.join(format!(".fleetcrypt-write-check-{job_id}.tmp"));
        match tokio::fs::write(&scratch, b"test").await {
            Ok(()) => {
                tracing::debug!(job_id = %job_id, path = %scratch.display(), "Wrote write-check file");
                if let Err(e) = tokio::fs::remove_file(&scratch).await {
                    tracing::warn!(job_id = %job_id, error = %e, "Could not remove write-check file");
                }
            }
            Err(e) => {
                tracing::error!(
                    job_id = %job_id,
                    path = %dir.display(),
                    error = %e,
                    "Failed to write write-check file in output directory",
                );
                let verb = match mode {
                    Mode::Encrypt => "Encryption",
                    Mode::Decrypt => "Decryption",
                };
                self.warning(
                    job_id,
                    format!("Warning: Cannot write to output directory. {verb} may fail."),
                );
            }
        }
    }

    fn output(&self, job_id: JobId, text: String) {
        self.bus.publish(FleetEvent::JobOutput { job_id, text });
    }

    fn warning(&self, job_id: JobId, text: String) {
        self.bus.publish(FleetEvent::JobWarning { job_id, text });
    }

    fn error(&self, job_id: JobId, text: String) {
        self.bus.publish(FleetEvent::JobError { job_id, text });
    }
}

/// Directory holding `path`; `.` for a bare file name.
fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_dir_of_bare_name_is_current_dir() {
        assert_eq!(parent_dir(Path::new("file.bin")), PathBuf::from("."));
        assert_eq!(parent_dir(Path::new("a/b/file.bin")), PathBuf::from("a/b"));
    }
}
