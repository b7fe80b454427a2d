//! Metadata store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl MetadataError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Io(_)
                    | sqlx::Error::WorkerCrashed
            ) || e
                .as_database_error()
                .is_some_and(|db| db.message().contains("database is locked")),
            Self::NotFound(_) | Self::Config(_) | Self::Constraint(_) | Self::Corrupt(_) => false,
        }
    }
}

impl From<ferry_core::Error> for MetadataError {
    fn from(e: ferry_core::Error) -> Self {
        MetadataError::Corrupt(e.to_string())
    }
}

impl From<std::io::Error> for MetadataError {
    fn from(e: std::io::Error) -> Self {
        MetadataError::Config(e.to_string())
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(MetadataError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!MetadataError::Database(sqlx::Error::RowNotFound).is_transient());
        assert!(!MetadataError::Constraint("dup".into()).is_transient());
    }
}
