use std::path::PathBuf;

use fleetcrypt_events::bus::DEFAULT_CAPACITY;

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has invalid value \"{value}\": {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Orchestrator configuration loaded from environment variables.
///
/// All fields have defaults matching the layout of a local release build.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Worker executable; receives the bind address as its only argument.
    pub worker_bin: PathBuf,
    /// Master executable; receives `mode input output [worker...]`.
    pub master_bin: PathBuf,
    /// Remote-storage CLI proxied by [`crate::storage::RemoteStorage`].
    pub storage_bin: PathBuf,
    /// Worker addresses started by the CLI before running a job.
    pub worker_addresses: Vec<String>,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            worker_bin: PathBuf::from("./build/Release/worker"),
            master_bin: PathBuf::from("./build/Release/master"),
            storage_bin: PathBuf::from("./build/Release/distributed_encryption"),
            worker_addresses: vec!["localhost:50051".to_string()],
            event_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl FleetConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                     | Default                                  |
    /// |-----------------------------|------------------------------------------|
    /// | `FLEETCRYPT_WORKER_BIN`     | `./build/Release/worker`                 |
    /// | `FLEETCRYPT_MASTER_BIN`     | `./build/Release/master`                 |
    /// | `FLEETCRYPT_STORAGE_BIN`    | `./build/Release/distributed_encryption` |
    /// | `FLEETCRYPT_WORKERS`        | `localhost:50051`                        |
    /// | `FLEETCRYPT_EVENT_CAPACITY` | `1024`                                   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let worker_bin = lookup("FLEETCRYPT_WORKER_BIN")
            .map(PathBuf::from)
            .unwrap_or(defaults.worker_bin);
        let master_bin = lookup("FLEETCRYPT_MASTER_BIN")
            .map(PathBuf::from)
            .unwrap_or(defaults.master_bin);
        let storage_bin = lookup("FLEETCRYPT_STORAGE_BIN")
            .map(PathBuf::from)
            .unwrap_or(defaults.storage_bin);

        let worker_addresses = match lookup("FLEETCRYPT_WORKERS") {
            Some(raw) => parse_addresses(&raw),
            None => defaults.worker_addresses,
        };

        let event_capacity = match lookup("FLEETCRYPT_EVENT_CAPACITY") {
            Some(raw) => parse_capacity(&raw)?,
            None => defaults.event_capacity,
        };

        Ok(Self {
            worker_bin,
            master_bin,
            storage_bin,
            worker_addresses,
            event_capacity,
        })
    }
}

/// Split a comma-separated address list, dropping blanks.
fn parse_addresses(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_capacity(raw: &str) -> Result<usize, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        var: "FLEETCRYPT_EVENT_CAPACITY",
        value: raw.to_string(),
        reason,
    };
    let capacity: usize = raw.trim().parse().map_err(|e| invalid(format!("{e}")))?;
    if capacity == 0 {
        return Err(invalid("must be greater than zero".to_string()));
    }
    Ok(capacity)
}
