//! Artifact provisioning.
//!
//! Ensures every artifact of a manifest is present on the mounted volume,
//! complete, and structurally valid before the service starts. The
//! persisted layout and readiness rules live in
//! [`headswap_core::artifact`]; this crate adds the network transfer, the
//! verification pass, and the per-artifact state machine.

pub mod config;
pub mod download;
pub mod error;
pub mod provisioner;
pub mod verify;

pub use config::ProvisionConfig;
pub use error::{ArtifactFailure, ProvisionError, ProvisionFailure};
pub use provisioner::{ProvisionReport, Provisioner};

/// Load the manifest described by `config` and provision every artifact.
pub async fn provision(config: &ProvisionConfig) -> Result<ProvisionReport, ProvisionFailure> {
    let specs = config
        .artifact_specs()
        .await
        .map_err(|e| ProvisionFailure::Fatal(e.into()))?;
    let provisioner = Provisioner::new(config.clone()).map_err(ProvisionFailure::Fatal)?;
    provisioner.ensure_artifacts_ready(&specs).await
}
