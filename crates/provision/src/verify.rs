//! Artifact verification: size policy plus safetensors header parse.

use std::path::Path;

use headswap_core::artifact::ArtifactSpec;
use headswap_core::safetensors::{read_header, SafetensorsHeader};

use crate::download::file_len;
use crate::error::ProvisionError;

/// Verify the file at `path` against `spec`.
///
/// The size check runs first because it is a single `stat`; the header is
/// only parsed for files of plausible length.
pub async fn verify_artifact(
    spec: &ArtifactSpec,
    path: &Path,
    tolerance: u64,
) -> Result<SafetensorsHeader, ProvisionError> {
    let actual = file_len(path).await?;
    spec.check_size(actual, tolerance)
        .map_err(|m| ProvisionError::Integrity(format!("{}: {m}", spec.name())))?;

    read_header(path)
        .await
        .map_err(|e| ProvisionError::Integrity(format!("{}: {e}", spec.name())))
}
