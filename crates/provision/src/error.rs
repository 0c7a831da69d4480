use std::fmt;
use std::path::PathBuf;

use headswap_core::error::CoreError;

/// Why an artifact could not be provisioned.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// The mount root is missing; no artifact is reachable.
    #[error("Volume not found at {0}. Is the mount path configured?")]
    MountMissing(PathBuf),

    /// Not enough free space to start (or finish) the transfer.
    #[error("Insufficient disk space: {free_bytes} bytes free, {needed_bytes} bytes still needed, hard floor {floor_bytes} bytes")]
    Capacity {
        free_bytes: u64,
        needed_bytes: u64,
        floor_bytes: u64,
    },

    /// Network or HTTP failure during the download.
    #[error("Transfer failed: {0}")]
    Transfer(String),

    /// Size or structural-header mismatch.
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// Local filesystem or validation failure.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ProvisionError {
    /// Transfer and integrity failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transfer(_) | Self::Integrity(_))
    }
}

/// One artifact that could not be provisioned.
#[derive(Debug)]
pub struct ArtifactFailure {
    pub target: PathBuf,
    pub source_url: String,
    pub error: ProvisionError,
}

impl fmt::Display for ArtifactFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (from {}): {}",
            self.target.display(),
            self.source_url,
            self.error
        )
    }
}

/// Overall failure of a provisioning run.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionFailure {
    /// A failure that makes the whole artifact set unreachable.
    #[error("Provisioning aborted: {0}")]
    Fatal(ProvisionError),

    /// Every artifact that failed, not just the first.
    #[error("{} artifact(s) failed to provision: {}", .0.len(), join_failures(.0))]
    Artifacts(Vec<ArtifactFailure>),
}

impl ProvisionFailure {
    /// Failed artifact targets (empty for fatal failures).
    pub fn failed_targets(&self) -> Vec<&PathBuf> {
        match self {
            Self::Fatal(_) => Vec::new(),
            Self::Artifacts(failures) => failures.iter().map(|f| &f.target).collect(),
        }
    }
}

fn join_failures(failures: &[ArtifactFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
