//! Reputation Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Nothing here escapes the public scan
//! entry points: every [`ErrorKind`] is folded into a [`ScanResult`] by
//! [`ScanResult::failed`], which is why each variant's `Display` doubles as
//! the user-facing message.
//!
//! [`ScanResult`]: crate::ScanResult
//! [`ScanResult::failed`]: crate::ScanResult::failed

use crate::models::ScanStatus;
use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A reputation client error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for reputation client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// No credential configured; nothing was sent.
    #[display("API key required")]
    MissingApiKey,
    /// File does not exist
    #[display("file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Path exists but is a directory (or something else that isn't a file)
    #[display("not a file: {}", _0.display())]
    NotAFile(#[error(not(source))] PathBuf),
    /// Zero-byte file; the service rejects these outright.
    #[display("file is empty: {}", _0.display())]
    EmptyFile(#[error(not(source))] PathBuf),
    /// File exceeds the service's upload limit.
    #[display("file too large: {size} bytes exceeds the {limit} byte limit")]
    FileTooLarge { size: u64, limit: u64 },
    /// File exists but could not be read
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Not a 64 character hexadecimal SHA-256 digest.
    #[display("invalid SHA-256 digest: {_0}")]
    InvalidDigest(#[error(not(source))] String),
    /// Cancellation flag was observed.
    #[display("cancelled")]
    Cancelled,
    /// HTTP 401
    #[display("invalid API key")]
    InvalidCredential,
    /// HTTP 403
    #[display("insufficient permission for this API key")]
    InsufficientPermission,
    /// Every attempt timed out.
    #[display("request timed out")]
    Timeout,
    /// Every attempt failed to connect.
    #[display("connection failed")]
    Connection,
    /// Transport failure that retrying won't fix.
    #[display("request failed: {_0}")]
    Request(#[error(not(source))] String),
    /// HTTP 429
    #[display("rate limit exceeded")]
    RateLimited,
    #[display("no response from service")]
    NoResponse,
    #[display("unexpected HTTP status {_0}")]
    UnexpectedStatus(#[error(not(source))] u16),
    /// Response body was missing something we can't substitute a default for.
    #[display("invalid response: {_0}")]
    InvalidResponse(#[error(not(source))] String),
    /// Analysis never reached `completed` within the polling ceiling.
    #[display("analysis timed out")]
    AnalysisTimeout,
    /// No async runtime to run the scan on.
    #[display("no async runtime available")]
    Runtime,
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Connection)
    }

    /// Which [`ScanStatus`] family this error is reported as.
    pub fn status(&self) -> ScanStatus {
        match self {
            Self::FileTooLarge { .. } => ScanStatus::FileTooLarge,
            Self::RateLimited => ScanStatus::RateLimited,
            _ => ScanStatus::Error,
        }
    }

    /// Map an I/O error against the path that produced it.
    pub(crate) fn from_io(err: IoError, path: impl Into<PathBuf>) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.into()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.into()),
            _ => Self::Io(err),
        }
    }
}
