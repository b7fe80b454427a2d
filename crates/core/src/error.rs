//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid block id: {0}")]
    InvalidBlockId(String),

    #[error("invalid chunk size: {size} (must be between 1 and {max})")]
    InvalidChunkSize { size: u64, max: u64 },

    #[error("incomplete upload: {0}")]
    IncompleteUpload(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
