//! Crate-wide error type and result alias.

use thiserror::Error;

/// Errors surfaced by the offline gateway.
#[derive(Error, Debug)]
pub enum OfflineError {
    /// Configuration could not be loaded or parsed.
    #[error("Config error: {0}")]
    Config(String),

    /// Cache store failure (persistence, lookup bookkeeping).
    #[error("Cache error: {0}")]
    Cache(String),

    /// A live fetch against the origin failed at the transport level.
    /// A non-2xx status is NOT a fetch error — the response is returned
    /// verbatim.
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Precache installation failed. Nothing from the batch was stored.
    #[error("Install error: {0}")]
    Install(String),

    /// Request/response conversion failed at the gateway boundary.
    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, OfflineError>;
