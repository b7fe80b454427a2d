//! Server test utilities.

use super::storage::FaultyStore;
use ferry_core::config::{AppConfig, MetadataConfig, StorageConfig};
use ferry_metadata::{MetadataStore, SqliteStore};
use ferry_server::{AppState, create_router};
use ferry_storage::{BlockStore, FilesystemBackend, ObjectBlockStore, ObjectStore};
use std::sync::Arc;
use tempfile::TempDir;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    /// Object store under the block stager, for fault injection.
    pub faults: Arc<FaultyStore>,
    /// The raw filesystem store, bypassing fault injection.
    pub store: Arc<dyn ObjectStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let storage_path = temp_dir.path().join("storage");
        let db_path = temp_dir.path().join("metadata.db");

        let mut config = AppConfig::for_testing();
        config.storage = StorageConfig::Filesystem {
            path: storage_path.clone(),
        };
        config.metadata = MetadataConfig::Sqlite {
            path: db_path.clone(),
            busy_timeout_secs: 1,
        };
        modifier(&mut config);

        let store: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );
        let faults = FaultyStore::new(store.clone());
        let blocks: Arc<dyn BlockStore> = Arc::new(ObjectBlockStore::new(faults.clone()));

        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path, 1)
                .await
                .expect("Failed to create metadata store"),
        );

        let state = AppState::new(config, blocks, metadata);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            faults,
            store,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }
}
