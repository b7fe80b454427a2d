//! Storage error types.

use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("staged block missing: {0}")]
    MissingBlock(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::NotFound
                    | std::io::ErrorKind::PermissionDenied
                    | std::io::ErrorKind::InvalidInput
            ),
            Self::Unavailable(_) => true,
            Self::NotFound(_) | Self::MissingBlock(_) | Self::InvalidKey(_) | Self::Config(_) => {
                false
            }
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StorageError::Unavailable("down".into()).is_transient());
        assert!(StorageError::Io(std::io::Error::other("disk hiccup")).is_transient());
        assert!(!StorageError::NotFound("k".into()).is_transient());
        assert!(!StorageError::InvalidKey("../x".into()).is_transient());
        assert!(
            !StorageError::Io(std::io::Error::from(std::io::ErrorKind::PermissionDenied))
                .is_transient()
        );
    }
}
