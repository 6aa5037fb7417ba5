//! Shared memory segments for cross-process coordination.
//!
//! - **ShmSegment**: a named, zero-initialized region of 32-bit words that a
//!   coordinator creates and workers attach to by name.
//!
//! Each platform uses its optimal shared memory mechanism:
//! - Linux: files in /dev/shm (tmpfs - RAM-backed)
//! - macOS: shm_open() + mmap (POSIX shared memory)
//! - Windows: CreateFileMappingW named mappings (pagefile-backed)
//! - Other: file-backed mmap under /tmp
//!
//! The only cross-process handshake is the segment name; base addresses are
//! per-process and never cross a process boundary.

pub(crate) mod platform;
pub mod segment;

pub use platform::has_native_shm;
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub use platform::shm_base_dir;
pub use segment::ShmSegment;
