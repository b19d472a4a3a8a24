//! Remote-storage CLI proxy.
//!
//! Configure, upload and download are delegated to an external executable
//! with fixed subcommands. This module passes arguments through, forwards
//! output lines and turns the exit code into a [`StorageResult`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use fleetcrypt_events::{EventBus, FleetEvent, JobId};
use serde::Serialize;
use tokio::process::Command;

use crate::process::forward_lines;

/// Remote folder used when `configure` is given none.
pub const DEFAULT_REMOTE_FOLDER: &str = "/encryption_files";

/// Outcome of one storage CLI invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageResult {
    /// Correlates the output events of this call.
    pub transfer_id: JobId,
    pub success: bool,
    pub message: String,
    pub exit_code: Option<i32>,
}

#[derive(Clone, Copy)]
enum Operation {
    Configure,
    Upload,
    Download,
}

impl Operation {
    fn subcommand(self) -> &'static str {
        match self {
            Operation::Configure => "dropbox-config",
            Operation::Upload => "dropbox-upload",
            Operation::Download => "dropbox-download",
        }
    }

    fn success_message(self) -> &'static str {
        match self {
            Operation::Configure => "Dropbox configuration saved successfully",
            Operation::Upload => "File uploaded successfully to Dropbox",
            Operation::Download => "File downloaded successfully from Dropbox",
        }
    }

    fn failure_message(self) -> &'static str {
        match self {
            Operation::Configure => "Failed to save Dropbox configuration",
            Operation::Upload => "Failed to upload file to Dropbox",
            Operation::Download => "Failed to download file from Dropbox",
        }
    }

    /// Whether output lines are published as events. Configure output is
    /// only logged.
    fn publishes_output(self) -> bool {
        !matches!(self, Operation::Configure)
    }
}

/// Wrapper around the storage CLI.
pub struct RemoteStorage {
    cli: PathBuf,
    bus: Arc<EventBus>,
}

impl RemoteStorage {
    pub fn new(cli: impl Into<PathBuf>, bus: Arc<EventBus>) -> Self {
        Self {
            cli: cli.into(),
            bus,
        }
    }

    /// Store the access token and remote folder.
    pub async fn configure(&self, token: &str, folder: Option<&str>) -> StorageResult {
        let folder = folder.filter(|f| !f.is_empty()).unwrap_or(DEFAULT_REMOTE_FOLDER);
        // The token is an argument, never a log field.
        tracing::info!(folder, "Configuring remote storage");
        self.invoke(Operation::Configure, vec![token.into(), folder.into()])
            .await
    }

    /// Upload `local`, optionally to an explicit `remote` path.
    pub async fn upload(&self, local: &Path, remote: Option<&str>) -> StorageResult {
        tracing::info!(local = %local.display(), remote, "Uploading to remote storage");
        let mut args = vec![local.as_os_str().to_owned()];
        if let Some(remote) = remote.filter(|r| !r.is_empty()) {
            args.push(remote.into());
        }
        self.invoke(Operation::Upload, args).await
    }

    pub async fn download(&self, remote: &str, local: &Path) -> StorageResult {
        tracing::info!(remote, local = %local.display(), "Downloading from remote storage");
        self.invoke(
            Operation::Download,
            vec![remote.into(), local.as_os_str().to_owned()],
        )
        .await
    }

    async fn invoke(&self, op: Operation, args: Vec<std::ffi::OsString>) -> StorageResult {
        let transfer_id = uuid::Uuid::new_v4();
        let subcommand = op.subcommand();

        let spawned = Command::new(&self.cli)
            .arg(subcommand)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(subcommand, cli = %self.cli.display(), error = %e, "Error executing storage CLI");
                return StorageResult {
                    transfer_id,
                    success: false,
                    message: e.to_string(),
                    exit_code: None,
                };
            }
        };

        let collected = Arc::new(Mutex::new(String::new()));
        let mut forwarders = Vec::with_capacity(2);

        if let Some(stdout) = child.stdout.take() {
            let bus = op.publishes_output().then(|| Arc::clone(&self.bus));
            forwarders.push(forward_lines(stdout, move |text| {
                tracing::info!(subcommand, "Storage output: {text}");
                if let Some(bus) = &bus {
                    bus.publish(FleetEvent::JobOutput {
                        job_id: transfer_id,
                        text,
                    });
                }
            }));
        }
        if let Some(stderr) = child.stderr.take() {
            let bus = op.publishes_output().then(|| Arc::clone(&self.bus));
            let collected = Arc::clone(&collected);
            forwarders.push(forward_lines(stderr, move |text| {
                tracing::error!(subcommand, "Storage error: {text}");
                if let Ok(mut buf) = collected.lock() {
                    if !buf.is_empty() {
                        buf.push('\n');
                    }
                    buf.push_str(&text);
                }
                if let Some(bus) = &bus {
                    bus.publish(FleetEvent::JobError {
                        job_id: transfer_id,
                        text,
                    });
                }
            }));
        }

        let status = child.wait().await;
        for handle in forwarders {
            let _ = handle.await;
        }

        let exit_code = match status {
            Ok(status) => status.code(),
            Err(e) => {
                tracing::error!(subcommand, error = %e, "Failed to wait on storage CLI");
                None
            }
        };
        tracing::info!(subcommand, exit_code = ?exit_code, "Storage CLI exited");

        let success = exit_code == Some(0);
        let message = if success {
            op.success_message().to_string()
        } else {
            let stderr = collected.lock().map(|s| s.clone()).unwrap_or_default();
            if stderr.is_empty() {
                op.failure_message().to_string()
            } else {
                stderr
            }
        };

        StorageResult {
            transfer_id,
            success,
            message,
            exit_code,
        }
    }
}
