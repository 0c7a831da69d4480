//! Artifact descriptions and their on-disk layout.
//!
//! Every artifact owns three co-located paths:
//!
//! | Path             | Meaning                                          |
//! |------------------|--------------------------------------------------|
//! | `<target>`       | The committed artifact.                          |
//! | `<target>.done`  | Receipt: exists only after verification passed.  |
//! | `<target>.tmp`   | Pending download, never trusted as an artifact.  |
//!
//! The readiness of an artifact is the pair (file present, receipt present),
//! modelled explicitly by [`ArtifactState`].

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Suffix of the receipt marker written after successful verification.
pub const RECEIPT_SUFFIX: &str = ".done";

/// Suffix of the in-flight download file.
pub const PENDING_SUFFIX: &str = ".tmp";

// ---------------------------------------------------------------------------
// Description
// ---------------------------------------------------------------------------

/// How the expected size of an artifact is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Actual length must equal the expected length within a small tolerance.
    #[default]
    Strict,
    /// Actual length must be at least the expected length.
    MinSize,
}

/// One required file: where it lives, where it comes from, how big it is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    pub target_path: PathBuf,
    pub source_url: String,
    pub expected_size_bytes: u64,
    #[serde(default)]
    pub kind: ArtifactKind,
}

impl ArtifactSpec {
    pub fn new(
        target_path: impl Into<PathBuf>,
        source_url: impl Into<String>,
        expected_size_bytes: u64,
        kind: ArtifactKind,
    ) -> Self {
        Self {
            target_path: target_path.into(),
            source_url: source_url.into(),
            expected_size_bytes,
            kind,
        }
    }

    /// File name of the target, for log lines.
    pub fn name(&self) -> String {
        self.target_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.target_path.display().to_string())
    }

    /// Path of the receipt marker (`<target>.done`).
    pub fn receipt_path(&self) -> PathBuf {
        with_suffix(&self.target_path, RECEIPT_SUFFIX)
    }

    /// Path of the pending download (`<target>.tmp`).
    pub fn pending_path(&self) -> PathBuf {
        with_suffix(&self.target_path, PENDING_SUFFIX)
    }

    /// Check an observed byte length against the expected size.
    ///
    /// `tolerance` only applies to [`ArtifactKind::Strict`].
    pub fn check_size(&self, actual: u64, tolerance: u64) -> Result<(), SizeMismatch> {
        let ok = match self.kind {
            ArtifactKind::Strict => actual.abs_diff(self.expected_size_bytes) <= tolerance,
            ArtifactKind::MinSize => actual >= self.expected_size_bytes,
        };
        if ok {
            Ok(())
        } else {
            Err(SizeMismatch {
                kind: self.kind,
                expected: self.expected_size_bytes,
                actual,
                tolerance,
            })
        }
    }

    /// Bytes still needed to complete this artifact given `have` bytes on disk.
    pub fn remaining_bytes(&self, have: u64) -> u64 {
        self.expected_size_bytes.saturating_sub(have)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// An artifact whose length does not satisfy its size policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeMismatch {
    pub kind: ArtifactKind,
    pub expected: u64,
    pub actual: u64,
    pub tolerance: u64,
}

impl fmt::Display for SizeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ArtifactKind::Strict => write!(
                f,
                "size {} bytes differs from expected {} bytes by more than {} bytes",
                self.actual, self.expected, self.tolerance
            ),
            ArtifactKind::MinSize => write!(
                f,
                "size {} bytes is below the minimum of {} bytes",
                self.actual, self.expected
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// The four combinations of (artifact file, receipt).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
    /// File and receipt both present: candidate for the fast path.
    Ready,
    /// File without receipt: a partial or unverified write. Repair.
    FileOnly,
    /// Receipt without file: inconsistent. Repair.
    ReceiptOnly,
    /// Neither present: needs download.
    Absent,
}

impl ArtifactState {
    pub fn from_presence(file: bool, receipt: bool) -> Self {
        match (file, receipt) {
            (true, true) => Self::Ready,
            (true, false) => Self::FileOnly,
            (false, true) => Self::ReceiptOnly,
            (false, false) => Self::Absent,
        }
    }

    /// Observe the current state of `spec` on disk.
    pub async fn observe(spec: &ArtifactSpec) -> Result<Self, CoreError> {
        let file = is_file(&spec.target_path).await?;
        let receipt_path = spec.receipt_path();
        let receipt = tokio::fs::try_exists(&receipt_path)
            .await
            .map_err(|e| CoreError::io(&receipt_path, e))?;
        Ok(Self::from_presence(file, receipt))
    }

    /// Whether the on-disk leftovers must be removed before downloading.
    pub fn needs_repair(self) -> bool {
        matches!(self, Self::FileOnly | Self::ReceiptOnly)
    }
}

impl fmt::Display for ArtifactState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ready => "ready",
            Self::FileOnly => "file without receipt",
            Self::ReceiptOnly => "receipt without file",
            Self::Absent => "absent",
        };
        f.write_str(s)
    }
}

async fn is_file(path: &Path) -> Result<bool, CoreError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_file()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CoreError::io(path, e)),
    }
}

/// Remove a file, treating "already gone" as success.
pub async fn remove_if_exists(path: &Path) -> Result<bool, CoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CoreError::io(path, e)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
