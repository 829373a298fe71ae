//! Error types for vidra-engine
//!
//! Module-specific errors using thiserror. Most of the engine's failure
//! modes are absorbed locally (transport retries, transition fallbacks);
//! these types cover the ones that cross an API boundary.

use thiserror::Error;

/// Main error type for the vidra-engine crate
#[derive(Error, Debug)]
pub enum Error {
    /// Real-time channel errors (connect failure, send on closed socket)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Emit attempted while the channel is down
    #[error("Not connected")]
    NotConnected,

    /// Host page port errors (missing element, missing poster image)
    #[error("Page error: {0}")]
    Page(String),

    /// Local persistence errors (offline queue, session id)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Wire payload encode/decode errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// Errors propagated from vidra-common
    #[error("Common error: {0}")]
    Common(#[from] vidra_common::Error),
}

/// Convenience Result type using the vidra-engine Error
pub type Result<T> = std::result::Result<T, Error>;
