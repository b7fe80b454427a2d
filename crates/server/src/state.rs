//! Application state shared across handlers.

use crate::upload::UploadCoordinator;
use ferry_core::config::AppConfig;
use ferry_metadata::MetadataStore;
use ferry_storage::BlockStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Block stager and committed object reader.
    pub blocks: Arc<dyn BlockStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Chunk receipt and commit orchestration.
    pub coordinator: Arc<UploadCoordinator>,
}

impl AppState {
    /// Create a new application state around injected stores.
    pub fn new(
        config: AppConfig,
        blocks: Arc<dyn BlockStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let coordinator = Arc::new(UploadCoordinator::new(
            &config,
            Arc::clone(&blocks),
            Arc::clone(&metadata),
        ));
        Self::with_coordinator(config, blocks, metadata, coordinator)
    }

    /// Create state around an already built coordinator.
    pub fn with_coordinator(
        config: AppConfig,
        blocks: Arc<dyn BlockStore>,
        metadata: Arc<dyn MetadataStore>,
        coordinator: Arc<UploadCoordinator>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            blocks,
            metadata,
            coordinator,
        }
    }

    /// Interval of the stale-upload janitor, if enabled.
    pub fn janitor_interval(&self) -> Option<std::time::Duration> {
        self.config.upload.janitor_interval()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_metadata::SqliteStore;
    use ferry_storage::{FilesystemBackend, ObjectBlockStore};
    use std::time::Duration;
    use tempfile::tempdir;

    async fn build_state(config: AppConfig) -> (tempfile::TempDir, AppState) {
        let temp = tempdir().unwrap();
        let store = Arc::new(FilesystemBackend::new(temp.path().join("store")).await.unwrap());
        let blocks: Arc<dyn BlockStore> = Arc::new(ObjectBlockStore::new(store));
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(temp.path().join("metadata.db"), 1)
                .await
                .unwrap(),
        );
        (temp, AppState::new(config, blocks, metadata))
    }

    #[tokio::test]
    async fn janitor_interval_none_when_disabled() {
        let (_temp, state) = build_state(AppConfig::for_testing()).await;
        assert!(state.janitor_interval().is_none());
    }

    #[tokio::test]
    async fn janitor_interval_respects_config() {
        let mut config = AppConfig::for_testing();
        config.upload.janitor_interval_secs = 12;

        let (_temp, state) = build_state(config).await;
        assert_eq!(state.janitor_interval(), Some(Duration::from_secs(12)));
    }
}
