//! Core domain types for the ferry chunked upload coordinator.
//!
//! This crate defines the data model shared by every other crate:
//! - Upload names and sequence keys
//! - Content hashes and deterministic block identifiers
//! - Chunk records and the completeness check run before commit
//! - Committed object descriptors
//! - Service configuration

pub mod chunk;
pub mod config;
pub mod error;
pub mod hash;
pub mod upload;

pub use chunk::{BlockId, ChunkRecord, missing_keys, order_for_commit};
pub use error::{Error, Result};
pub use hash::{ContentHash, ContentHasher};
pub use upload::{CommitTarget, CommittedObject, ObjectName, SequenceKey, UploadName};

/// Default maximum chunk payload: 32 MiB
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 32 * 1024 * 1024;

/// Content type used when neither the request nor the config names one.
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";
