//! Server error types.

use std::net::SocketAddr;

use thiserror::Error;

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("failed to bind to {0}: {1}")]
    BindError(SocketAddr, std::io::Error),

    /// Listen address or upstream URL is unusable.
    #[error("invalid server settings: {0}")]
    InvalidSettings(String),

    /// HTTP client for the upstream could not be built.
    #[error("upstream client error: {0}")]
    Client(#[from] reqwest::Error),

    /// Server runtime error.
    #[error("server error: {0}")]
    Runtime(String),
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
