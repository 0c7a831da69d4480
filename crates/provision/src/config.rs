use std::path::PathBuf;
use std::time::Duration;

use headswap_core::artifact::ArtifactSpec;
use headswap_core::config::{env_flag, env_gigabytes, env_opt, env_or, env_secs, env_string};
use headswap_core::disk::DiskThresholds;
use headswap_core::error::CoreError;
use headswap_core::manifest::{builtin_manifest, load_manifest};
use headswap_core::retry::RetryPolicy;

/// Default mount path of the network volume.
pub const DEFAULT_VOLUME_ROOT: &str = "/runpod-volume";

/// Provisioner configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    /// Mount root that must exist before anything is downloaded.
    pub volume_root: PathBuf,
    /// Optional manifest file; the built-in manifest is used when unset.
    pub manifest_path: Option<PathBuf>,
    /// Free-space floors checked before each transfer attempt.
    pub disk: DiskThresholds,
    /// Attempts per artifact and the pause between them.
    pub retry: RetryPolicy,
    /// TCP connect timeout of one attempt.
    pub connect_timeout: Duration,
    /// Longest tolerated wait for response headers or between two chunks.
    pub stall_timeout: Duration,
    /// Slack allowed for strict-size artifacts.
    pub size_tolerance_bytes: u64,
    /// Re-verify size and header of artifacts that already have a receipt.
    pub verify_on_startup: bool,
    /// Bearer token sent to the artifact source, if any.
    pub auth_token: Option<String>,
}

impl ProvisionConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default          |
    /// |----------------------------------|------------------|
    /// | `VOLUME_ROOT`                    | `/runpod-volume` |
    /// | `ARTIFACT_MANIFEST`              | unset (built-in) |
    /// | `DISK_HARD_FLOOR_GB`             | `5`              |
    /// | `DISK_SOFT_FLOOR_GB`             | `25`             |
    /// | `DOWNLOAD_ATTEMPTS`              | `5`              |
    /// | `DOWNLOAD_RETRY_DELAY_SECS`      | `10`             |
    /// | `DOWNLOAD_CONNECT_TIMEOUT_SECS`  | `30`             |
    /// | `DOWNLOAD_STALL_TIMEOUT_SECS`    | `120`            |
    /// | `SIZE_TOLERANCE_BYTES`           | `16`             |
    /// | `VERIFY_ON_STARTUP`              | `true`           |
    /// | `HF_TOKEN`                       | unset            |
    pub fn from_env() -> Result<Self, CoreError> {
        Ok(Self {
            volume_root: PathBuf::from(env_string("VOLUME_ROOT", DEFAULT_VOLUME_ROOT)),
            manifest_path: env_opt("ARTIFACT_MANIFEST").map(PathBuf::from),
            disk: DiskThresholds {
                hard_floor_bytes: env_gigabytes("DISK_HARD_FLOOR_GB", 5.0)?,
                soft_floor_bytes: env_gigabytes("DISK_SOFT_FLOOR_GB", 25.0)?,
            },
            retry: RetryPolicy::new(
                env_or("DOWNLOAD_ATTEMPTS", 5)?,
                env_secs("DOWNLOAD_RETRY_DELAY_SECS", 10)?,
            ),
            connect_timeout: env_secs("DOWNLOAD_CONNECT_TIMEOUT_SECS", 30)?,
            stall_timeout: env_secs("DOWNLOAD_STALL_TIMEOUT_SECS", 120)?,
            size_tolerance_bytes: env_or("SIZE_TOLERANCE_BYTES", 16)?,
            verify_on_startup: env_flag("VERIFY_ON_STARTUP", true)?,
            auth_token: env_opt("HF_TOKEN"),
        })
    }

    /// Defaults for a given volume root, without reading the environment.
    pub fn with_volume_root(volume_root: impl Into<PathBuf>) -> Self {
        Self {
            volume_root: volume_root.into(),
            manifest_path: None,
            disk: DiskThresholds {
                hard_floor_bytes: 5 * 1024 * 1024 * 1024,
                soft_floor_bytes: 25 * 1024 * 1024 * 1024,
            },
            retry: RetryPolicy::new(5, Duration::from_secs(10)),
            connect_timeout: Duration::from_secs(30),
            stall_timeout: Duration::from_secs(120),
            size_tolerance_bytes: 16,
            verify_on_startup: true,
            auth_token: None,
        }
    }

    /// The artifacts to provision: the manifest file if configured,
    /// otherwise the built-in list.
    pub async fn artifact_specs(&self) -> Result<Vec<ArtifactSpec>, CoreError> {
        match &self.manifest_path {
            Some(path) => load_manifest(path, &self.volume_root).await,
            None => Ok(builtin_manifest(&self.volume_root)),
        }
    }
}
