//! Durable upload metadata for ferry.
//!
//! This crate provides:
//! - Chunk records keyed by `(upload, sequence key)`
//! - Per-upload commit leases and commit markers
//! - A SQLite implementation of both

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use repos::{ChunkRepo, CommitRepo, CommitStatus, LeaseOutcome, PutOutcome};
pub use store::{MetadataStore, SqliteStore};

use ferry_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    config.validate().map_err(MetadataError::Config)?;

    match config {
        MetadataConfig::Sqlite {
            path,
            busy_timeout_secs,
        } => {
            let store = SqliteStore::new(path, *busy_timeout_secs).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
