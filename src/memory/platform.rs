//! Platform shared-memory locations.
//!
//! File-backed segments live in a flat per-crate directory. macOS
//! (`shm_open`) and Windows (named file mappings) address segments by name
//! in a kernel namespace and need no directory at all.

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
use std::path::PathBuf;

/// Base directory for file-backed shared memory segments.
///
/// tmpfs on Linux, so segments are RAM-backed with no disk I/O.
#[cfg(target_os = "linux")]
pub fn shm_base_dir() -> PathBuf {
    PathBuf::from("/dev/shm/shmwall")
}

/// Base directory for file-backed shared memory segments (plain-file
/// fallback for platforms without a native shared memory namespace).
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
pub fn shm_base_dir() -> PathBuf {
    PathBuf::from("/tmp/shmwall")
}

/// Whether this platform backs segments with RAM rather than a plain file.
pub fn has_native_shm() -> bool {
    cfg!(any(target_os = "linux", target_os = "macos", target_os = "windows"))
}
