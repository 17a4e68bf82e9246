//! Error types for the OCI packaging engine.
//!
//! A single sealed enum at the API boundary, one variant per error kind
//! in the design (see SPEC_FULL.md §7). Callers match on kind, not on
//! message text.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OciPkgError>;

#[derive(Error, Debug)]
pub enum OciPkgError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("ambiguous version: {0}")]
    AmbiguousVersion(String),

    #[error("authentication required: {0}")]
    AuthRequired(String),

    #[error("authentication denied: {0}")]
    AuthDenied(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("corrupt object at {0}")]
    Corrupt(String),

    #[error("conflict exists: {0}")]
    ConflictExists(String),

    #[error("no platform in index matched the selector: {0}")]
    PlatformUnmatched(String),

    #[error("media type not acceptable: {0}")]
    NotAcceptable(String),

    #[error("manifest media type unsupported: {0}")]
    ManifestUnsupported(String),

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<std::io::Error> for OciPkgError {
    fn from(source: std::io::Error) -> Self {
        OciPkgError::Io { path: None, source }
    }
}

impl From<serde_json::Error> for OciPkgError {
    fn from(err: serde_json::Error) -> Self {
        OciPkgError::Corrupt(err.to_string())
    }
}

impl From<reqwest::Error> for OciPkgError {
    fn from(err: reqwest::Error) -> Self {
        OciPkgError::NetworkError(err.to_string())
    }
}

impl From<url::ParseError> for OciPkgError {
    fn from(err: url::ParseError) -> Self {
        OciPkgError::Validation(format!("invalid URL: {err}"))
    }
}

impl OciPkgError {
    pub fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        OciPkgError::Io {
            path: Some(path.into()),
            source,
        }
    }
}
