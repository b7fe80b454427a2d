//! Object storage and block staging for ferry.
//!
//! This crate provides:
//! - [`ObjectStore`], a minimal key/value object store with atomic writes
//! - A local filesystem backend
//! - [`BlockStore`], which stages chunk payloads invisibly and commits an
//!   ordered block list into one object

pub mod backends;
pub mod block;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use block::{BlockStore, ObjectBlockStore};
pub use error::{StorageError, StorageResult};
pub use traits::{ByteStream, ObjectMeta, ObjectStore, PutOptions, StreamingUpload};

use ferry_core::config::StorageConfig;
use std::sync::Arc;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
    }
}

/// Create the block stager for the configured object store.
pub async fn block_store_from_config(config: &StorageConfig) -> StorageResult<Arc<dyn BlockStore>> {
    let store = from_config(config).await?;
    Ok(Arc::new(ObjectBlockStore::new(store)))
}
