//! Error types for pvedns.

use thiserror::Error;

/// Errors that can occur across the middleware chain and its stores.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error from the inventory client.
    #[error("inventory HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// DNS protocol error.
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::error::ProtoError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The inventory API answered, but not with what we needed.
    #[error("inventory error: {0}")]
    Upstream(String),

    /// Lookup key absent from the block table.
    #[error("block not found")]
    NotFound,
}
