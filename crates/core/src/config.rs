//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum accepted chunk payload in bytes.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,
    /// Enable the /metrics endpoint for Prometheus scraping.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_chunk_size() -> u64 {
    crate::DEFAULT_MAX_CHUNK_SIZE
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_chunk_size: default_max_chunk_size(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_chunk_size == 0 {
            return Err("server.max_chunk_size must be greater than 0".to_string());
        }
        if usize::try_from(self.max_chunk_size).is_err() {
            return Err(format!(
                "server.max_chunk_size {} exceeds platform limits",
                self.max_chunk_size
            ));
        }
        Ok(())
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for staged blocks and committed objects.
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::Filesystem { path } if path.as_os_str().is_empty() => {
                Err("storage.path cannot be empty".to_string())
            }
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// How long a writer waits on a locked database before failing.
        #[serde(default = "default_sqlite_busy_timeout_secs")]
        busy_timeout_secs: u64,
    },
}

fn default_sqlite_busy_timeout_secs() -> u64 {
    5
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            busy_timeout_secs: default_sqlite_busy_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { path, .. } if path.as_os_str().is_empty() => {
                Err("metadata.path cannot be empty".to_string())
            }
            MetadataConfig::Sqlite { .. } => Ok(()),
        }
    }
}

/// When the commit triggered by a final chunk runs.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommitMode {
    /// Commit before acknowledging the final chunk.
    #[default]
    Inline,
    /// Acknowledge the final chunk and commit in a background task.
    Deferred,
}

/// Upload coordination settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Content type used when a commit request does not name one.
    #[serde(default = "default_content_type")]
    pub default_content_type: String,
    /// When the final chunk's commit runs.
    #[serde(default)]
    pub commit_mode: CommitMode,
    /// Upper bound on any single object or metadata store call.
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,
    /// How long a commit lease stays valid before another node may take it over.
    #[serde(default = "default_commit_lease_secs")]
    pub commit_lease_secs: u64,
    /// Delete chunk records and staged blocks once the object is committed.
    #[serde(default = "default_purge_on_commit")]
    pub purge_on_commit: bool,
    /// Uncommitted uploads idle for longer than this are abandoned by the janitor.
    #[serde(default = "default_abandon_after_secs")]
    pub abandon_after_secs: u64,
    /// Interval between janitor sweeps. Zero disables the janitor.
    #[serde(default = "default_janitor_interval_secs")]
    pub janitor_interval_secs: u64,
    /// Maximum uploads abandoned per janitor sweep.
    #[serde(default = "default_janitor_batch_size")]
    pub janitor_batch_size: u32,
}

fn default_content_type() -> String {
    crate::FALLBACK_CONTENT_TYPE.to_string()
}

fn default_store_timeout_secs() -> u64 {
    30
}

fn default_commit_lease_secs() -> u64 {
    300 // 5 minutes
}

fn default_purge_on_commit() -> bool {
    true
}

fn default_abandon_after_secs() -> u64 {
    86400 // 24 hours
}

fn default_janitor_interval_secs() -> u64 {
    3600
}

fn default_janitor_batch_size() -> u32 {
    100
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            default_content_type: default_content_type(),
            commit_mode: CommitMode::default(),
            store_timeout_secs: default_store_timeout_secs(),
            commit_lease_secs: default_commit_lease_secs(),
            purge_on_commit: default_purge_on_commit(),
            abandon_after_secs: default_abandon_after_secs(),
            janitor_interval_secs: default_janitor_interval_secs(),
            janitor_batch_size: default_janitor_batch_size(),
        }
    }
}

impl UploadConfig {
    pub fn store_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.store_timeout_secs)
    }

    pub fn commit_lease(&self) -> time::Duration {
        time::Duration::seconds(i64::try_from(self.commit_lease_secs).unwrap_or(i64::MAX))
    }

    pub fn abandon_after(&self) -> time::Duration {
        time::Duration::seconds(i64::try_from(self.abandon_after_secs).unwrap_or(i64::MAX))
    }

    /// `None` when the janitor is disabled.
    pub fn janitor_interval(&self) -> Option<std::time::Duration> {
        (self.janitor_interval_secs > 0)
            .then(|| std::time::Duration::from_secs(self.janitor_interval_secs))
    }

    /// Validate upload settings that would otherwise fail at runtime.
    pub fn validate(&self) -> Result<(), String> {
        if self.default_content_type.trim().is_empty() {
            return Err("upload.default_content_type cannot be empty".to_string());
        }
        if self.store_timeout_secs == 0 {
            return Err("upload.store_timeout_secs must be at least 1".to_string());
        }
        if self.commit_lease_secs == 0 {
            return Err("upload.commit_lease_secs must be at least 1".to_string());
        }
        // A lease shorter than one store call could expire mid-commit.
        if self.commit_lease_secs < self.store_timeout_secs {
            return Err(format!(
                "upload.commit_lease_secs ({}) must not be shorter than upload.store_timeout_secs ({})",
                self.commit_lease_secs, self.store_timeout_secs
            ));
        }
        if i64::try_from(self.abandon_after_secs).is_err() {
            return Err(format!(
                "upload.abandon_after_secs {} exceeds maximum value {}",
                self.abandon_after_secs,
                i64::MAX
            ));
        }
        if self.janitor_batch_size == 0 {
            return Err("upload.janitor_batch_size must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Callers are expected to point storage and
    /// metadata at scratch locations.
    pub fn for_testing() -> Self {
        Self {
            upload: UploadConfig {
                store_timeout_secs: 5,
                commit_lease_secs: 30,
                janitor_interval_secs: 0,
                ..UploadConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate every section, returning the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.storage.validate()?;
        self.metadata.validate()?;
        self.upload.validate()
    }
}
