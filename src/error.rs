//! Error types for the VersaDB storage engine.

use std::io;
use std::sync::Arc;

/// The result type used throughout VersaDB.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for VersaDB operations.
///
/// `Error` is `Clone` so that a background error recorded once can be
/// returned, unchanged, from every later write and `close` call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(Arc<io::Error>),

    /// Data corruption was detected.
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// The requested entity was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An invalid argument was provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not supported in the current mode.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// A deadline or per-I/O timeout expired.
    #[error("Timed out: {0}")]
    TimedOut(String),

    /// The operation was aborted before completion.
    #[error("Aborted: {0}")]
    Aborted(String),

    /// The database is in an invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A checksum mismatch was detected.
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// The expected checksum value.
        expected: u32,
        /// The actual checksum value.
        actual: u32,
    },

    /// The database or file already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new not supported error.
    pub fn not_supported(msg: impl Into<String>) -> Self {
        Error::NotSupported(msg.into())
    }

    /// Creates a new timed out error.
    pub fn timed_out(msg: impl Into<String>) -> Self {
        Error::TimedOut(msg.into())
    }

    /// Creates a new aborted error.
    pub fn aborted(msg: impl Into<String>) -> Self {
        Error::Aborted(msg.into())
    }

    /// Creates a new invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Creates a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Returns true for any flavour of on-disk corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_) | Error::ChecksumMismatch { .. })
    }

    /// Returns true if this is a timeout.
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Error::TimedOut(_))
    }

    /// Returns true if this is an abort.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Aborted(_))
    }

    /// Returns true if the underlying I/O error means "file not found".
    pub fn is_file_not_found(&self) -> bool {
        match self {
            Error::Io(e) => e.kind() == io::ErrorKind::NotFound,
            Error::NotFound(_) => true,
            _ => false,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::TimedOut {
            return Error::TimedOut(err.to_string());
        }
        Error::Io(Arc::new(err))
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
