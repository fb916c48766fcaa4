//! Sync engine error types.

use bouncer_core::DurationError;
use bouncer_storage::StorageError;
use thiserror::Error;

/// Errors raised while talking to the decision source or applying its answer.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The decision source could not be reached.
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The decision source answered with an unexpected status.
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    /// Login was rejected or the renewed token was refused.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A response body could not be decoded.
    #[error("failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A decision carried an unparseable duration.
    #[error("invalid decision duration: {0}")]
    Duration(#[from] DurationError),

    /// The decision cache failed.
    #[error("cache error: {0}")]
    Storage(#[from] StorageError),

    /// The HTTP client could not be built.
    #[error("client setup failed: {0}")]
    Setup(String),
}

/// Coarse classification of a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Auth,
    Decode,
    Storage,
    Config,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Transport { .. } | SyncError::Status { .. } => ErrorKind::Transport,
            SyncError::Auth(_) => ErrorKind::Auth,
            SyncError::Decode { .. } | SyncError::Duration(_) => ErrorKind::Decode,
            SyncError::Storage(_) => ErrorKind::Storage,
            SyncError::Setup(_) => ErrorKind::Config,
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
