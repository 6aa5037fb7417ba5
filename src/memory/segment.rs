//! Named shared memory segments, word-addressed.
//!
//! A coordinator calls [`ShmSegment::create`] before any worker exists;
//! workers call [`ShmSegment::attach`] with the same name. The creator owns
//! the segment and unlinks it on drop (a leaked segment is a leaked kernel
//! resource). Content is addressed as 32-bit words through [`ShmSegment::word`],
//! which hands out `&AtomicU32` so every cross-process access is atomic.

use std::sync::atomic::AtomicU32;

use crate::error::{WallError, WallResult};

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
use crate::memory::platform::shm_base_dir;
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
use memmap2::{MmapMut, MmapOptions};
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
use std::fs::{File, OpenOptions};
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
use std::path::PathBuf;

const WORD_BYTES: usize = std::mem::size_of::<u32>();

/// Cross-process shared memory region sized in 32-bit words.
///
/// Uses the optimal shared memory mechanism for each platform:
/// - Linux and fallback platforms: file-backed mmap (tmpfs on Linux)
/// - macOS: POSIX shm_open() (Mach shared memory, RAM)
/// - Windows: CreateFileMappingW with page file backing
#[derive(Debug)]
pub struct ShmSegment {
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    mmap: MmapMut,
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    _file: File,
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    path: PathBuf,

    #[cfg(target_os = "macos")]
    ptr: *mut u8,
    #[cfg(target_os = "macos")]
    fd: i32,
    #[cfg(target_os = "macos")]
    shm_name: String,

    #[cfg(target_os = "windows")]
    ptr: *mut u8,
    #[cfg(target_os = "windows")]
    handle: isize, // HANDLE

    name: String,
    words: usize,
    owner: bool,
}

impl ShmSegment {
    /// Create a new segment of `words` zero-filled 32-bit words.
    ///
    /// Fails with [`WallError::Memory`] if a segment with this name already
    /// exists or the kernel cannot reserve and map the region. Callers treat
    /// this as fatal: it happens before any worker is spawned, so there is
    /// no meaningful recovery short of restarting the run.
    pub fn create(name: &str, words: usize) -> WallResult<Self> {
        Self::validate_request(name, words)?;
        let segment = Self::map_new(name, words)?;
        log::debug!("created shm segment '{}' ({} words)", name, words);
        Ok(segment)
    }

    /// Attach to a segment previously created under `name`.
    ///
    /// Fails with [`WallError::Memory`] if no such segment exists or it is
    /// smaller than `words`.
    pub fn attach(name: &str, words: usize) -> WallResult<Self> {
        Self::validate_request(name, words)?;
        let segment = Self::map_existing(name, words)?;
        log::debug!("attached shm segment '{}' ({} words)", name, words);
        Ok(segment)
    }

    fn validate_request(name: &str, words: usize) -> WallResult<()> {
        if words == 0 {
            return Err(WallError::invalid_input(
                "segment size must be at least one word",
            ));
        }
        if name.is_empty() || name.contains(['/', '\\', '\0']) {
            return Err(WallError::invalid_input(format!(
                "invalid segment name '{}'",
                name
            )));
        }
        Ok(())
    }

    /// Access word `index` of the segment as an atomic.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range. An out-of-range word is a
    /// programming error, not a runtime condition.
    #[inline]
    pub fn word(&self, index: usize) -> &AtomicU32 {
        assert!(
            index < self.words,
            "word index {} out of range ({} words)",
            index,
            self.words
        );
        // SAFETY: the base pointer is page-aligned and valid for
        // `words * WORD_BYTES` bytes for the lifetime of the mapping;
        // AtomicU32 has the same size and alignment as u32, and every
        // access to the region goes through atomic operations.
        unsafe { &*(self.base_ptr().add(index * WORD_BYTES) as *const AtomicU32) }
    }

    /// Segment size in 32-bit words.
    pub fn words(&self) -> usize {
        self.words
    }

    /// Whether this handle is the original creator (responsible for
    /// unlinking the segment on drop).
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Name the segment was created under.
    pub fn name(&self) -> &str {
        &self.name
    }
}

// Thread safety: segments are OS shared memory with no thread-local state;
// concurrent access goes through the atomic word accessors.
// SAFETY: see above.
unsafe impl Send for ShmSegment {}
// SAFETY: see above.
unsafe impl Sync for ShmSegment {}

// ============================================================================
// Linux and fallback implementation - file-backed mmap
// (tmpfs under /dev/shm on Linux, plain file under /tmp elsewhere)
// ============================================================================

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
impl ShmSegment {
    fn segment_path(name: &str) -> PathBuf {
        shm_base_dir().join(format!("wall_{}", name))
    }

    fn map_new(name: &str, words: usize) -> WallResult<Self> {
        std::fs::create_dir_all(shm_base_dir())?;
        let path = Self::segment_path(name);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                WallError::memory(format!("cannot create segment '{}': {}", name, e))
            })?;
        let bytes = words * WORD_BYTES;
        file.set_len(bytes as u64)?;

        // SAFETY: file is open read/write with its length set to `bytes` above.
        let mut mmap = unsafe { MmapOptions::new().len(bytes).map_mut(&file) }
            .map_err(|e| WallError::memory(format!("cannot map segment '{}': {}", name, e)))?;
        mmap.fill(0);

        Ok(Self {
            mmap,
            _file: file,
            path,
            name: name.to_owned(),
            words,
            owner: true,
        })
    }

    fn map_existing(name: &str, words: usize) -> WallResult<Self> {
        let path = Self::segment_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                WallError::memory(format!("cannot open segment '{}': {}", name, e))
            })?;

        let bytes = words * WORD_BYTES;
        let len = file.metadata()?.len();
        if len < bytes as u64 {
            return Err(WallError::memory(format!(
                "segment '{}' is {} bytes, need {}",
                name, len, bytes
            )));
        }

        // SAFETY: file is open read/write and at least `bytes` long (checked above).
        let mmap = unsafe { MmapOptions::new().len(bytes).map_mut(&file) }
            .map_err(|e| WallError::memory(format!("cannot map segment '{}': {}", name, e)))?;

        Ok(Self {
            mmap,
            _file: file,
            path,
            name: name.to_owned(),
            words,
            owner: false,
        })
    }

    fn base_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
impl Drop for ShmSegment {
    fn drop(&mut self) {
        if self.owner && self.path.exists() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

// ============================================================================
// macOS implementation - POSIX shm_open() (Mach shared memory, RAM-backed)
// ============================================================================

#[cfg(target_os = "macos")]
impl ShmSegment {
    fn shm_name(name: &str) -> String {
        format!("/wall_{}", name)
    }

    fn map_new(name: &str, words: usize) -> WallResult<Self> {
        use std::ffi::CString;

        let shm_name = Self::shm_name(name);
        // Names are validated against embedded NULs before this point.
        let c_name = CString::new(shm_name.clone())
            .map_err(|_| WallError::invalid_input(format!("invalid segment name '{}'", name)))?;

        // SAFETY: c_name is a valid null-terminated CString; O_CREAT|O_RDWR|O_EXCL
        // are valid POSIX flags.
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o666,
            )
        };
        if fd < 0 {
            return Err(WallError::memory(format!(
                "cannot create segment '{}': {}",
                name,
                std::io::Error::last_os_error()
            )));
        }

        let bytes = words * WORD_BYTES;
        // SAFETY: fd is a valid open descriptor from shm_open above.
        if unsafe { libc::ftruncate(fd, bytes as libc::off_t) } != 0 {
            let err = std::io::Error::last_os_error();
            // SAFETY: fd is a valid open descriptor; c_name is a valid CString.
            unsafe {
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
            }
            return Err(WallError::memory(format!(
                "cannot size segment '{}' to {} bytes: {}",
                name, bytes, err
            )));
        }

        let ptr = Self::map_fd(fd, bytes).inspect_err(|_| {
            // SAFETY: fd is a valid open descriptor; c_name is a valid CString.
            unsafe {
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
            }
        })?;

        // SAFETY: ptr is valid for `bytes` (map_fd checked MAP_FAILED).
        unsafe { std::ptr::write_bytes(ptr, 0, bytes) };

        Ok(Self {
            ptr,
            fd,
            shm_name,
            name: name.to_owned(),
            words,
            owner: true,
        })
    }

    fn map_existing(name: &str, words: usize) -> WallResult<Self> {
        use std::ffi::CString;

        let shm_name = Self::shm_name(name);
        let c_name = CString::new(shm_name.clone())
            .map_err(|_| WallError::invalid_input(format!("invalid segment name '{}'", name)))?;

        // SAFETY: c_name is a valid null-terminated CString.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0o666) };
        if fd < 0 {
            return Err(WallError::memory(format!(
                "cannot open segment '{}': {}",
                name,
                std::io::Error::last_os_error()
            )));
        }

        let bytes = words * WORD_BYTES;
        // SAFETY: fd is a valid open descriptor; stat is a zeroed out-param.
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        // SAFETY: fd is a valid open descriptor.
        if unsafe { libc::fstat(fd, &mut stat) } != 0 {
            let err = std::io::Error::last_os_error();
            // SAFETY: fd is a valid open descriptor.
            unsafe { libc::close(fd) };
            return Err(WallError::memory(format!(
                "cannot stat segment '{}': {}",
                name, err
            )));
        }
        if (stat.st_size as u64) < bytes as u64 {
            // SAFETY: fd is a valid open descriptor.
            unsafe { libc::close(fd) };
            return Err(WallError::memory(format!(
                "segment '{}' is {} bytes, need {}",
                name, stat.st_size, bytes
            )));
        }

        let ptr = Self::map_fd(fd, bytes).inspect_err(|_| {
            // SAFETY: fd is a valid open descriptor.
            unsafe {
                libc::close(fd);
            }
        })?;

        Ok(Self {
            ptr,
            fd,
            shm_name,
            name: name.to_owned(),
            words,
            owner: false,
        })
    }

    fn map_fd(fd: i32, bytes: usize) -> WallResult<*mut u8> {
        // SAFETY: fd is valid, bytes > 0, and the flags are valid POSIX mmap
        // constants.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                bytes,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(WallError::memory(format!(
                "cannot map segment: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(ptr as *mut u8)
    }

    fn base_ptr(&self) -> *const u8 {
        self.ptr
    }
}

#[cfg(target_os = "macos")]
impl Drop for ShmSegment {
    fn drop(&mut self) {
        // SAFETY: self.ptr and self.fd come from a successful mmap/shm_open
        // pair and the mapped length is words * WORD_BYTES.
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.words * WORD_BYTES);
            libc::close(self.fd);
        }
        if self.owner {
            if let Ok(c_name) = std::ffi::CString::new(self.shm_name.clone()) {
                // SAFETY: c_name is a valid null-terminated CString.
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
            }
        }
    }
}

// ============================================================================
// Windows implementation - CreateFileMappingW with pagefile backing
// ============================================================================

#[cfg(target_os = "windows")]
impl ShmSegment {
    fn wide_name(name: &str) -> Vec<u16> {
        format!("Local\\wall_{}", name)
            .encode_utf16()
            .chain(std::iter::once(0))
            .collect()
    }

    fn map_new(name: &str, words: usize) -> WallResult<Self> {
        use windows_sys::Win32::Foundation::{
            CloseHandle, GetLastError, ERROR_ALREADY_EXISTS, INVALID_HANDLE_VALUE,
        };
        use windows_sys::Win32::System::Memory::{CreateFileMappingW, PAGE_READWRITE};

        let wide_name = Self::wide_name(name);
        let bytes = words * WORD_BYTES;

        // SAFETY: INVALID_HANDLE_VALUE requests a pagefile-backed mapping;
        // wide_name is a valid null-terminated wide string.
        let handle = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                std::ptr::null(),
                PAGE_READWRITE,
                (bytes as u64 >> 32) as u32,
                bytes as u32,
                wide_name.as_ptr(),
            )
        };
        if handle == 0 {
            return Err(WallError::memory(format!(
                "cannot create segment '{}': error {}",
                name,
                // SAFETY: GetLastError is always safe to call after a Windows
                // API failure.
                unsafe { GetLastError() }
            )));
        }
        // SAFETY: GetLastError is always safe to call; detects a lost
        // exclusive-creation race.
        if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
            // SAFETY: handle is a valid file mapping handle.
            unsafe { CloseHandle(handle) };
            return Err(WallError::memory(format!(
                "segment '{}' already exists",
                name
            )));
        }

        let ptr = Self::map_view(handle, bytes).inspect_err(|_| {
            // SAFETY: handle is a valid file mapping handle.
            unsafe {
                CloseHandle(handle);
            }
        })?;

        // SAFETY: ptr is valid for `bytes` (map_view checked for null).
        unsafe { std::ptr::write_bytes(ptr, 0, bytes) };

        Ok(Self {
            ptr,
            handle,
            name: name.to_owned(),
            words,
            owner: true,
        })
    }

    fn map_existing(name: &str, words: usize) -> WallResult<Self> {
        use windows_sys::Win32::Foundation::GetLastError;
        use windows_sys::Win32::System::Memory::{OpenFileMappingW, FILE_MAP_ALL_ACCESS};

        let wide_name = Self::wide_name(name);
        let bytes = words * WORD_BYTES;

        // SAFETY: wide_name is a valid null-terminated wide string.
        let handle = unsafe { OpenFileMappingW(FILE_MAP_ALL_ACCESS, 0, wide_name.as_ptr()) };
        if handle == 0 {
            return Err(WallError::memory(format!(
                "cannot open segment '{}': error {}",
                name,
                // SAFETY: GetLastError is always safe to call after a Windows
                // API failure.
                unsafe { GetLastError() }
            )));
        }

        let ptr = Self::map_view(handle, bytes).inspect_err(|_| {
            use windows_sys::Win32::Foundation::CloseHandle;
            // SAFETY: handle is a valid file mapping handle.
            unsafe {
                CloseHandle(handle);
            }
        })?;

        Ok(Self {
            ptr,
            handle,
            name: name.to_owned(),
            words,
            owner: false,
        })
    }

    fn map_view(handle: isize, bytes: usize) -> WallResult<*mut u8> {
        use windows_sys::Win32::Foundation::GetLastError;
        use windows_sys::Win32::System::Memory::{MapViewOfFile, FILE_MAP_ALL_ACCESS};

        // SAFETY: handle is a valid file mapping handle (checked non-zero by
        // the caller). A view larger than the mapping fails cleanly.
        let ptr = unsafe { MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, bytes) };
        if ptr.is_null() {
            return Err(WallError::memory(format!(
                "cannot map segment view: error {}",
                // SAFETY: GetLastError is always safe to call after a Windows
                // API failure.
                unsafe { GetLastError() }
            )));
        }
        Ok(ptr as *mut u8)
    }

    fn base_ptr(&self) -> *const u8 {
        self.ptr
    }
}

#[cfg(target_os = "windows")]
impl Drop for ShmSegment {
    fn drop(&mut self) {
        use windows_sys::Win32::Foundation::CloseHandle;
        use windows_sys::Win32::System::Memory::UnmapViewOfFile;

        // SAFETY: self.ptr is a valid mapped view and self.handle a valid
        // file mapping handle. Windows frees the named mapping once the last
        // handle closes; there is no explicit unlink.
        unsafe {
            UnmapViewOfFile(self.ptr as *const std::ffi::c_void);
            CloseHandle(self.handle);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
