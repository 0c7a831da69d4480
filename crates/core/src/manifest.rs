//! The set of artifacts the service needs before it can run.
//!
//! A manifest is either the built-in list (the models the head-swap
//! workflow loads) or a JSON file supplied at deploy time. Either way it is
//! validated before the provisioner touches the disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::artifact::{ArtifactKind, ArtifactSpec, PENDING_SUFFIX, RECEIPT_SUFFIX};
use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Built-in manifest
// ---------------------------------------------------------------------------

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// `(relative target path, source URL, minimum size in bytes)`.
///
/// The upstream files are not pinned to a revision, so their sizes are
/// floors rather than exact lengths. Deployments that pin revisions should
/// ship a manifest file with strict sizes instead.
const BUILTIN_ARTIFACTS: &[(&str, &str, u64)] = &[
    (
        "models/vae/qwen_image_vae.safetensors",
        "https://huggingface.co/Comfy-Org/Qwen-Image-Edit_ComfyUI/resolve/main/split_files/vae/qwen_image_vae.safetensors",
        200 * MIB,
    ),
    (
        "models/clip/qwen/qwen_2.5_vl_7b_fp8_scaled.safetensors",
        "https://huggingface.co/Comfy-Org/Qwen-Image-Edit_ComfyUI/resolve/main/split_files/text_encoders/qwen_2.5_vl_7b_fp8_scaled.safetensors",
        8 * GIB,
    ),
    (
        "models/unet/qwen/qwen_image_edit_2509_fp8_e4m3fn.safetensors",
        "https://huggingface.co/Comfy-Org/Qwen-Image-Edit_ComfyUI/resolve/main/split_files/diffusion_models/qwen_image_edit_2509_fp8_e4m3fn.safetensors",
        19 * GIB,
    ),
    (
        "models/loras/qwen/bfs_head_v3_qwen_image_edit_2509.safetensors",
        "https://huggingface.co/Alissonerdx/BFS-Best-Face-Swap/resolve/main/bfs_head_v3_qwen_image_edit_2509.safetensors",
        10 * MIB,
    ),
];

/// The built-in manifest rooted at `volume_root`.
pub fn builtin_manifest(volume_root: &Path) -> Vec<ArtifactSpec> {
    BUILTIN_ARTIFACTS
        .iter()
        .map(|(rel, url, min)| {
            ArtifactSpec::new(volume_root.join(rel), *url, *min, ArtifactKind::MinSize)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Manifest file
// ---------------------------------------------------------------------------

/// Parse a JSON manifest (an array of [`ArtifactSpec`]).
///
/// Relative target paths are resolved under `volume_root`. The result is
/// validated with [`validate_manifest`].
pub fn parse_manifest(json: &str, volume_root: &Path) -> Result<Vec<ArtifactSpec>, CoreError> {
    let mut specs: Vec<ArtifactSpec> = serde_json::from_str(json)
        .map_err(|e| CoreError::Validation(format!("Invalid artifact manifest: {e}")))?;

    for spec in &mut specs {
        if spec.target_path.is_relative() {
            spec.target_path = volume_root.join(&spec.target_path);
        }
    }

    validate_manifest(&specs)?;
    Ok(specs)
}

/// Read and parse a manifest file.
pub async fn load_manifest(path: &Path, volume_root: &Path) -> Result<Vec<ArtifactSpec>, CoreError> {
    let json = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CoreError::io(path, e))?;
    parse_manifest(&json, volume_root)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a whole manifest.
///
/// - Target paths are absolute and unique.
/// - Targets do not collide with another artifact's sidecar names.
/// - Source URLs are `http(s)://`.
/// - Expected sizes are positive.
pub fn validate_manifest(specs: &[ArtifactSpec]) -> Result<(), CoreError> {
    let mut seen: HashSet<&PathBuf> = HashSet::new();

    for spec in specs {
        let target = &spec.target_path;
        if !target.is_absolute() {
            return Err(CoreError::Validation(format!(
                "Artifact target must be an absolute path: {}",
                target.display()
            )));
        }
        let name = target.to_string_lossy();
        if name.ends_with(RECEIPT_SUFFIX) || name.ends_with(PENDING_SUFFIX) {
            return Err(CoreError::Validation(format!(
                "Artifact target must not end with '{RECEIPT_SUFFIX}' or '{PENDING_SUFFIX}': {name}"
            )));
        }
        if !seen.insert(target) {
            return Err(CoreError::Validation(format!(
                "Duplicate artifact target: {name}"
            )));
        }
        let url = spec.source_url.trim();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(CoreError::Validation(format!(
                "Artifact {name} needs an http(s) source URL, got '{url}'"
            )));
        }
        if spec.expected_size_bytes == 0 {
            return Err(CoreError::Validation(format!(
                "Artifact {name} must declare a positive expected size"
            )));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
