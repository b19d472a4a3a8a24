//! Shared vocabulary for workers and jobs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Worker ids are positions in the registry's insertion-ordered list.
pub type WorkerId = usize;

/// Suffix carried by every encrypted artifact.
pub const ENCRYPTED_SUFFIX: &str = ".encrypted";

/// Suffix used when a decrypt output cannot be derived by stripping
/// [`ENCRYPTED_SUFFIX`].
pub const DECRYPTED_SUFFIX: &str = ".decrypted";

/// Direction of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Encrypt,
    Decrypt,
}

impl Mode {
    /// Keyword passed as the master executable's first argument.
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Encrypt => "encrypt",
            Mode::Decrypt => "decrypt",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "encrypt" => Ok(Mode::Encrypt),
            "decrypt" => Ok(Mode::Decrypt),
            other => Err(CoreError::Validation(format!(
                "mode must be \"encrypt\" or \"decrypt\", got \"{other}\""
            ))),
        }
    }
}

/// Lifecycle state of a worker process.
///
/// `Running` is assigned optimistically as soon as the process has been
/// spawned; no readiness handshake confirms the worker accepts connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl WorkerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerStatus::Starting => "starting",
            WorkerStatus::Running => "running",
            WorkerStatus::Stopping => "stopping",
            WorkerStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single job.
///
/// `Degraded` marks the placeholder-copy tier of the decrypt fallback: an
/// artifact exists but it is not a decryption of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Pending,
    Succeeded,
    FallbackSucceeded,
    Degraded,
    Failed,
}

impl JobOutcome {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobOutcome::Pending)
    }

    /// Whether the outcome counts as success at the presentation boundary.
    pub fn is_success(self) -> bool {
        matches!(self, JobOutcome::Succeeded | JobOutcome::FallbackSucceeded)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
