//! Error types for the request path.

use std::path::PathBuf;

use bouncer_core::TrustError;
use bouncer_storage::StorageError;
use bouncer_sync::SyncError;
use thiserror::Error;

/// Failures while evaluating a request. Every one of them denies the request.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Client identity could not be established.
    #[error("trust resolution failed: {0}")]
    Trust(#[from] TrustError),

    /// The decision cache failed with something other than a miss.
    #[error("cache error: {0}")]
    Storage(#[from] StorageError),

    /// The per-request lookup failed.
    #[error("decision lookup failed: {0}")]
    Sync(#[from] SyncError),
}

/// Challenge subsystem error type.
#[derive(Debug, Error)]
pub enum ChallengeError {
    /// Custom template could not be read.
    #[error("failed to read challenge template {path}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Provider could not be reached.
    #[error("challenge provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    /// Provider answered with an unexpected status.
    #[error("challenge provider returned status {0}")]
    Status(u16),

    /// Provider answer could not be decoded.
    #[error("invalid challenge provider response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Challenge settings are incomplete.
    #[error("challenge misconfigured: {0}")]
    Config(String),
}

/// Result type for request evaluation.
pub type Result<T> = std::result::Result<T, ProxyError>;
