//! `fleetcrypt` -- command-line adapter for the orchestrator.
//!
//! Starts the configured workers, runs one job or storage operation, prints
//! every event as one JSON line on stdout and exits with the completion
//! code. Logs go to stderr.
//!
//! # Environment variables
//!
//! See [`FleetConfig::from_env`]. `RUST_LOG` controls the log filter.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use fleetcrypt_core::types::Mode;
use fleetcrypt_events::FleetEvent;
use fleetcrypt_orchestrator::config::FleetConfig;
use fleetcrypt_orchestrator::job::JobRequest;
use fleetcrypt_orchestrator::storage::StorageResult;
use fleetcrypt_orchestrator::Orchestrator;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "fleetcrypt", version, about = "Distributed file encryption orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, PartialEq, Subcommand)]
enum CliCommand {
    /// Encrypt a file through the worker fleet.
    Encrypt {
        input: PathBuf,
        output: Option<PathBuf>,
    },
    /// Decrypt a file through the worker fleet.
    Decrypt {
        input: PathBuf,
        output: Option<PathBuf>,
    },
    /// Save remote-storage credentials.
    StorageConfig { token: String, folder: Option<String> },
    /// Upload a local file to remote storage.
    Upload { local: PathBuf, remote: Option<String> },
    /// Download a remote file.
    Download { remote: String, local: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "fleetcrypt=info,fleetcrypt_orchestrator=info,fleetcrypt_core=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = FleetConfig::from_env()?;

    tracing::info!(
        master_bin = %config.master_bin.display(),
        worker_bin = %config.worker_bin.display(),
        workers = config.worker_addresses.len(),
        "Starting fleetcrypt",
    );

    let orchestrator = Arc::new(Orchestrator::new(&config));
    let mut rx = orchestrator.subscribe();

    let work = execute(&orchestrator, &config, cli.command);
    tokio::pin!(work);

    let code = loop {
        tokio::select! {
            code = &mut work => break code,
            event = rx.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event printer lagged behind");
                }
                Err(RecvError::Closed) => {}
            },
        }
    };

    loop {
        match rx.try_recv() {
            Ok(event) => print_event(&event),
            Err(TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event printer lagged behind");
            }
            Err(_) => break,
        }
    }

    orchestrator.shutdown().await;
    std::process::exit(code)
}

/// Run one CLI command and return the process exit code.
async fn execute(orchestrator: &Orchestrator, config: &FleetConfig, command: CliCommand) -> i32 {
    match command {
        CliCommand::Encrypt { input, output } => {
            run_job(orchestrator, config, Mode::Encrypt, input, output).await
        }
        CliCommand::Decrypt { input, output } => {
            run_job(orchestrator, config, Mode::Decrypt, input, output).await
        }
        CliCommand::StorageConfig { token, folder } => {
            let result = orchestrator
                .storage()
                .configure(&token, folder.as_deref())
                .await;
            print_storage(&result)
        }
        CliCommand::Upload { local, remote } => {
            let result = orchestrator.storage().upload(&local, remote.as_deref()).await;
            print_storage(&result)
        }
        CliCommand::Download { remote, local } => {
            let result = orchestrator.storage().download(&remote, &local).await;
            print_storage(&result)
        }
    }
}

async fn run_job(
    orchestrator: &Orchestrator,
    config: &FleetConfig,
    mode: Mode,
    input: PathBuf,
    output: Option<PathBuf>,
) -> i32 {
    let mut worker_ids = Vec::with_capacity(config.worker_addresses.len());
    for address in &config.worker_addresses {
        match orchestrator.start_worker(address).await {
            Ok(info) => worker_ids.push(info.id),
            Err(e) => tracing::error!(error = %e, "Skipping worker"),
        }
    }

    let report = orchestrator
        .run_job(JobRequest {
            input,
            output,
            mode,
            worker_ids,
        })
        .await;

    tracing::info!(
        job_id = %report.job_id,
        outcome = ?report.outcome,
        code = report.code,
        output = %report.output.display(),
        "Job finished",
    );
    report.code
}

fn print_event(event: &FleetEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::error!(kind = event.kind(), error = %e, "Failed to serialize event"),
    }
}

fn print_storage(result: &StorageResult) -> i32 {
    match serde_json::to_string(result) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::error!(error = %e, "Failed to serialize storage result"),
    }
    if result.success {
        0
    } else {
        1
    }
}
