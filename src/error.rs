//! Unified error handling for shmwall.
//!
//! A single error type covers segment setup, input validation, and the I/O
//! around driver programs, keeping error handling consistent across the
//! crate. Segment setup failures are fatal by design: they occur before any
//! coordination invariant exists, so callers surface them and stop rather
//! than retry.

use thiserror::Error;

/// Main error type for shmwall operations.
#[derive(Debug, Error)]
pub enum WallError {
    /// I/O related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Shared memory allocation, mapping, or attachment errors
    #[error("Memory error: {0}")]
    Memory(String),

    /// Invalid input/argument errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Parse errors
    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<std::num::ParseIntError> for WallError {
    fn from(err: std::num::ParseIntError) -> Self {
        WallError::Parse(format!("Integer parse error: {}", err))
    }
}

/// Convenience type alias for Results using WallError
pub type WallResult<T> = std::result::Result<T, WallError>;

/// Short alias - `Result<T>` is equivalent to `WallResult<T>`
pub type Result<T> = WallResult<T>;

// Helper methods
impl WallError {
    /// Create a memory error with a custom message
    pub fn memory<S: Into<String>>(msg: S) -> Self {
        WallError::Memory(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        WallError::InvalidInput(msg.into())
    }
}
