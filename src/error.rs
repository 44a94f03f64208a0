//! Error types for drpg
//!
//! The error taxonomy follows the layers of a sync run:
//! - [`CatalogError`] - failures reported by the remote catalog collaborator
//! - [`PlanningError`] - per-entry problems found while building the plan
//! - [`TaskError`] - failures inside a single download worker
//! - [`Error`] - top-level errors that abort a run or its setup

use std::path::PathBuf;
use thiserror::Error;

use crate::types::FailureKind;

/// Result type alias for drpg operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for drpg
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "threads")
        key: Option<String>,
    },

    /// Remote catalog error that could not be recovered from
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// The library root cannot be created or written to
    #[error("library path {path} is not accessible: {source}")]
    LibraryInaccessible {
        /// The configured library root
        path: PathBuf,
        /// Underlying filesystem error
        #[source]
        source: std::io::Error,
    },

    /// The HTTP client could not be set up
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl Error {
    /// Whether this error must stop the whole run rather than a single task
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Catalog(e) => e.is_fatal(),
            Error::LibraryInaccessible { .. } | Error::Config { .. } => true,
            _ => false,
        }
    }
}

/// Errors surfaced by the remote catalog collaborator
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    /// The token was rejected or access was revoked
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The requested product, file or URL does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The remote service asked us to slow down
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Network failure, remote 5xx or timeout
    #[error("transient network error: {0}")]
    Transient(String),

    /// The response did not have the expected shape
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl CatalogError {
    /// Authentication and authorization failures abort the run
    pub fn is_fatal(&self) -> bool {
        matches!(self, CatalogError::Unauthorized(_))
    }

    /// Build a catalog error from a non-success HTTP status
    pub fn from_status(status: reqwest::StatusCode, context: &str) -> Self {
        let message = format!("{context}: HTTP {status}");
        match status.as_u16() {
            401 | 403 => CatalogError::Unauthorized(message),
            404 | 410 => CatalogError::NotFound(message),
            429 => CatalogError::RateLimited(message),
            500..=599 | 408 => CatalogError::Transient(message),
            _ => CatalogError::Malformed(message),
        }
    }
}

impl From<reqwest::Error> for CatalogError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return CatalogError::from_status(status, "request failed");
        }
        if e.is_decode() {
            CatalogError::Malformed(e.to_string())
        } else {
            CatalogError::Transient(e.to_string())
        }
    }
}

/// Per-entry problems found while planning; the entry is excluded from the plan
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanningError {
    /// A catalog file entry is missing required metadata
    #[error("malformed catalog entry in product {product}: {reason}")]
    MalformedEntry {
        /// Product name the entry belongs to
        product: String,
        /// What is wrong with the entry
        reason: String,
    },

    /// Normalization produced a path segment that cannot be used
    #[error("cannot build a path for {product} / {filename}: {reason}")]
    UnresolvablePath {
        /// Product name
        product: String,
        /// Remote filename
        filename: String,
        /// Why the path is rejected
        reason: String,
    },

    /// The local file exists but could not be inspected
    #[error("cannot inspect {path}: {reason}")]
    LocalInspection {
        /// Local path that failed
        path: PathBuf,
        /// Underlying error message
        reason: String,
    },
}

/// Failure of a single download task
#[derive(Debug, Error)]
pub enum TaskError {
    /// Catalog collaborator error (URL acquisition or download)
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Filesystem error while writing the file
    #[error("filesystem error at {path}: {source}")]
    Io {
        /// Path being written
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Downloaded bytes do not match the catalog checksum
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Digest published by the catalog
        expected: String,
        /// Digest of the downloaded bytes
        actual: String,
    },

    /// Fewer or more bytes than the server declared
    #[error("size mismatch: declared {declared} bytes, received {received} bytes")]
    SizeMismatch {
        /// Size declared by the server
        declared: u64,
        /// Bytes actually received
        received: u64,
    },

    /// A network operation timed out
    #[error("timed out while {0}")]
    Timeout(&'static str),

    /// The run was cancelled before the task could finish
    #[error("cancelled")]
    Cancelled,
}

impl TaskError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TaskError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this failure aborts the whole pool
    pub fn is_fatal(&self) -> bool {
        matches!(self, TaskError::Catalog(e) if e.is_fatal())
    }

    /// Classification recorded in the sync result
    pub fn kind(&self) -> FailureKind {
        match self {
            TaskError::Catalog(CatalogError::Unauthorized(_)) => FailureKind::Fatal,
            TaskError::Catalog(CatalogError::NotFound(_)) => FailureKind::NotFound,
            TaskError::Catalog(CatalogError::RateLimited(_)) => FailureKind::RateLimited,
            TaskError::Catalog(CatalogError::Transient(_)) | TaskError::Timeout(_) => {
                FailureKind::Network
            }
            TaskError::Catalog(CatalogError::Malformed(_)) => FailureKind::Malformed,
            TaskError::Io { .. } => FailureKind::Filesystem,
            TaskError::ChecksumMismatch { .. } | TaskError::SizeMismatch { .. } => {
                FailureKind::Integrity
            }
            TaskError::Cancelled => FailureKind::Cancelled,
        }
    }
}
