//! Free-space probing and the capacity policy applied before a download.

use std::path::Path;

use crate::error::CoreError;

/// Filesystem usage for the volume holding a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskStats {
    pub total_bytes: u64,
    pub free_bytes: u64,
}

/// Read disk usage for the filesystem containing `path` via `statvfs`.
#[cfg(unix)]
pub fn disk_stats(path: &Path) -> Result<DiskStats, CoreError> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| CoreError::Validation(format!("Path contains NUL: {}", path.display())))?;
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();

    // Safety: `c_path` is a valid NUL-terminated string and `stat` is only
    // read after the call reports success.
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if ret != 0 {
        return Err(CoreError::io(path, std::io::Error::last_os_error()));
    }
    let stat = unsafe { stat.assume_init() };

    let block_size = stat.f_frsize as u64;
    Ok(DiskStats {
        total_bytes: stat.f_blocks as u64 * block_size,
        free_bytes: stat.f_bavail as u64 * block_size,
    })
}

#[cfg(not(unix))]
pub fn disk_stats(path: &Path) -> Result<DiskStats, CoreError> {
    Err(CoreError::Internal(format!(
        "Disk statistics are not supported on this platform ({})",
        path.display()
    )))
}

/// Async wrapper running the syscall on the blocking pool.
pub async fn disk_stats_async(path: &Path) -> Result<DiskStats, CoreError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || disk_stats(&owned))
        .await
        .map_err(|e| CoreError::Internal(format!("Disk stats task failed: {e}")))?
}

// ---------------------------------------------------------------------------
// Capacity policy
// ---------------------------------------------------------------------------

/// Free-space floors checked before starting a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskThresholds {
    /// Below this, the download is refused.
    pub hard_floor_bytes: u64,
    /// Below this, the download proceeds with a warning.
    pub soft_floor_bytes: u64,
}

/// Outcome of [`DiskThresholds::assess`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityVerdict {
    Ok,
    Warn,
    Reject,
}

impl DiskThresholds {
    /// Classify `free` bytes against the floors and the bytes still needed.
    ///
    /// A transfer is refused when free space is under the hard floor or
    /// cannot hold the remaining bytes of the artifact.
    pub fn assess(&self, free: u64, needed: u64) -> CapacityVerdict {
        if free < self.hard_floor_bytes || free < needed {
            CapacityVerdict::Reject
        } else if free < self.soft_floor_bytes {
            CapacityVerdict::Warn
        } else {
            CapacityVerdict::Ok
        }
    }
}
