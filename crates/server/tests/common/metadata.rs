//! Metadata store test utilities.

use ferry_metadata::{MetadataStore, SqliteStore};
use std::sync::Arc;
use tempfile::TempDir;

/// A SQLite metadata store in a temporary directory.
#[allow(dead_code)]
pub struct TestMetadata {
    pub store: Arc<dyn MetadataStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestMetadata {
    pub async fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let store = SqliteStore::new(temp_dir.path().join("metadata.db"), 1)
            .await
            .expect("Failed to create metadata store");

        Self {
            store: Arc::new(store),
            _temp_dir: temp_dir,
        }
    }
}
