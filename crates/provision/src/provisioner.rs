//! The per-artifact provisioning state machine.
//!
//! For each artifact, in manifest order:
//!
//! 1. Observe (file, receipt). Both present and verified: done.
//! 2. Any other leftover combination is repaired by deleting receipt and
//!    file; a stale pending file from an earlier process is discarded.
//! 3. Check free space against the configured floors.
//! 4. Download into `<target>.tmp`, resuming within this run's retries.
//! 5. Verify size and safetensors header of the pending file.
//! 6. Rename pending to target, then write `<target>.done`.
//!
//! Failures of steps 4-5 are retried up to the configured bound. When the
//! bound is exhausted the pending file is removed and the artifact is
//! reported; the remaining artifacts are still processed so the final
//! report lists every failure.

use std::path::{Path, PathBuf};

use headswap_core::artifact::{remove_if_exists, ArtifactSpec, ArtifactState};
use headswap_core::disk::{disk_stats_async, CapacityVerdict};
use headswap_core::error::CoreError;
use headswap_core::manifest::validate_manifest;
use headswap_core::retry::{retry_with, Retry};

use crate::config::ProvisionConfig;
use crate::download::{file_len, Downloader};
use crate::error::{ArtifactFailure, ProvisionError, ProvisionFailure};
use crate::verify::verify_artifact;

/// Summary of a successful provisioning run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Artifacts that were already present and verified.
    pub already_ready: Vec<PathBuf>,
    /// Artifacts fetched by this run.
    pub downloaded: Vec<PathBuf>,
    /// Bytes received over the network by this run.
    pub bytes_transferred: u64,
}

enum Outcome {
    AlreadyReady,
    Downloaded { bytes: u64 },
}

pub struct Provisioner {
    config: ProvisionConfig,
    downloader: Downloader,
}

impl Provisioner {
    pub fn new(config: ProvisionConfig) -> Result<Self, ProvisionError> {
        let downloader = Downloader::new(
            config.connect_timeout,
            config.stall_timeout,
            config.auth_token.clone(),
        )?;
        Ok(Self { config, downloader })
    }

    /// Ensure every artifact in `specs` is present, verified, and receipted.
    pub async fn ensure_artifacts_ready(
        &self,
        specs: &[ArtifactSpec],
    ) -> Result<ProvisionReport, ProvisionFailure> {
        validate_manifest(specs).map_err(|e| ProvisionFailure::Fatal(e.into()))?;
        self.check_mount().await.map_err(ProvisionFailure::Fatal)?;

        tracing::info!(
            artifacts = specs.len(),
            volume_root = %self.config.volume_root.display(),
            "Verifying artifacts",
        );

        let mut report = ProvisionReport::default();
        let mut failures = Vec::new();

        for spec in specs {
            match self.ensure_one(spec).await {
                Ok(Outcome::AlreadyReady) => {
                    tracing::info!(artifact = %spec.name(), "Artifact ready");
                    report.already_ready.push(spec.target_path.clone());
                }
                Ok(Outcome::Downloaded { bytes }) => {
                    tracing::info!(artifact = %spec.name(), bytes, "Artifact downloaded and verified");
                    report.downloaded.push(spec.target_path.clone());
                    report.bytes_transferred += bytes;
                }
                Err(error) => {
                    tracing::error!(artifact = %spec.name(), error = %error, "Artifact failed");
                    failures.push(ArtifactFailure {
                        target: spec.target_path.clone(),
                        source_url: spec.source_url.clone(),
                        error,
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(ProvisionFailure::Artifacts(failures))
        }
    }

    async fn check_mount(&self) -> Result<(), ProvisionError> {
        let root = &self.config.volume_root;
        match tokio::fs::metadata(root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            _ => Err(ProvisionError::MountMissing(root.clone())),
        }
    }

    async fn ensure_one(&self, spec: &ArtifactSpec) -> Result<Outcome, ProvisionError> {
        let state = ArtifactState::observe(spec).await?;

        match state {
            ArtifactState::Ready => {
                if !self.config.verify_on_startup {
                    return Ok(Outcome::AlreadyReady);
                }
                match verify_artifact(spec, &spec.target_path, self.config.size_tolerance_bytes).await {
                    Ok(_) => return Ok(Outcome::AlreadyReady),
                    Err(e) => {
                        tracing::warn!(artifact = %spec.name(), error = %e, "Receipted artifact failed verification, refetching");
                        discard_artifact(spec).await?;
                    }
                }
            }
            state if state.needs_repair() => {
                tracing::warn!(artifact = %spec.name(), %state, "Inconsistent artifact, discarding");
                discard_artifact(spec).await?;
            }
            _ => {}
        }

        let pending = spec.pending_path();
        if remove_if_exists(&pending).await? {
            tracing::warn!(artifact = %spec.name(), "Discarded pending download from an earlier run");
        }

        if let Some(parent) = spec.target_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::io(parent, e))?;
        }

        tracing::info!(artifact = %spec.name(), url = %spec.source_url, "Downloading missing artifact");

        let label = format!("Download of {}", spec.name());
        let result = retry_with(
            &self.config.retry,
            &label,
            |attempt| self.attempt(spec, &pending, attempt),
            |e: &ProvisionError| if e.is_retryable() { Retry::Yes } else { Retry::No },
        )
        .await;

        match result {
            Ok(bytes) => Ok(Outcome::Downloaded { bytes }),
            Err(e) => {
                if let Err(cleanup) = remove_if_exists(&pending).await {
                    tracing::warn!(artifact = %spec.name(), error = %cleanup, "Failed to remove pending file");
                }
                Err(e)
            }
        }
    }

    /// One download + verify + commit attempt. Returns bytes received.
    async fn attempt(
        &self,
        spec: &ArtifactSpec,
        pending: &Path,
        attempt: u32,
    ) -> Result<u64, ProvisionError> {
        let have = file_len(pending).await?;
        self.preflight_capacity(spec, have).await?;

        tracing::debug!(artifact = %spec.name(), attempt, resume_from = have, "Starting transfer attempt");
        let stats = self.downloader.fetch(&spec.source_url, pending).await?;

        if let Err(e) = verify_artifact(spec, pending, self.config.size_tolerance_bytes).await {
            remove_if_exists(pending).await?;
            return Err(e);
        }

        commit(spec, pending).await?;
        Ok(stats.bytes_written)
    }

    async fn preflight_capacity(&self, spec: &ArtifactSpec, have: u64) -> Result<(), ProvisionError> {
        let probe_dir = spec
            .target_path
            .parent()
            .unwrap_or(&self.config.volume_root);
        let stats = disk_stats_async(probe_dir).await?;
        let needed = spec.remaining_bytes(have);
        let thresholds = self.config.disk;

        match thresholds.assess(stats.free_bytes, needed) {
            CapacityVerdict::Ok => Ok(()),
            CapacityVerdict::Warn => {
                tracing::warn!(
                    artifact = %spec.name(),
                    free_bytes = stats.free_bytes,
                    soft_floor_bytes = thresholds.soft_floor_bytes,
                    "Free disk space is low",
                );
                Ok(())
            }
            CapacityVerdict::Reject => Err(ProvisionError::Capacity {
                free_bytes: stats.free_bytes,
                needed_bytes: needed,
                floor_bytes: thresholds.hard_floor_bytes,
            }),
        }
    }
}

/// Remove receipt then file. The receipt goes first so an interruption
/// leaves a file-only state, which is repaired on the next run.
async fn discard_artifact(spec: &ArtifactSpec) -> Result<(), ProvisionError> {
    remove_if_exists(&spec.receipt_path()).await?;
    remove_if_exists(&spec.target_path).await?;
    Ok(())
}

/// Atomically move the verified pending file into place, then receipt it.
async fn commit(spec: &ArtifactSpec, pending: &Path) -> Result<(), ProvisionError> {
    tokio::fs::rename(pending, &spec.target_path)
        .await
        .map_err(|e| CoreError::io(pending, e))?;

    let receipt = spec.receipt_path();
    let file = tokio::fs::File::create(&receipt)
        .await
        .map_err(|e| CoreError::io(&receipt, e))?;
    file.sync_all()
        .await
        .map_err(|e| CoreError::io(&receipt, e))?;
    Ok(())
}
