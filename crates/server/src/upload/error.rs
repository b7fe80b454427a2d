//! Upload coordination errors.

use ferry_core::{CommittedObject, ObjectName, SequenceKey, UploadName};
use ferry_metadata::MetadataError;
use ferry_storage::StorageError;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Failure of a coordinator or assembler operation.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("sequence key {sequence} of upload {upload} was already received with different content")]
    DuplicateSequence {
        upload: UploadName,
        sequence: SequenceKey,
    },

    #[error("final chunk conflict in upload {upload}: {reason}")]
    FinalChunkConflict { upload: UploadName, reason: String },

    #[error("incomplete upload {upload}: {reason}")]
    IncompleteUpload { upload: UploadName, reason: String },

    #[error("upload {upload} is committed; sequence key {sequence} follows its final chunk {final_sequence}")]
    UploadClosed {
        upload: UploadName,
        sequence: SequenceKey,
        final_sequence: SequenceKey,
    },

    #[error("upload {upload} is committed and cannot be abandoned")]
    AbandonCommitted { upload: UploadName },

    #[error("object {object} belongs to upload {holder}, not {upload}")]
    ObjectNameTaken {
        upload: UploadName,
        object: ObjectName,
        holder: UploadName,
    },

    #[error("commit of upload {upload} is in progress on {owner}")]
    CommitInProgress { upload: UploadName, owner: String },

    #[error("transient store failure: {0}")]
    TransientStoreFailure(String),

    /// Internal signal that the commit marker already exists. Callers turn
    /// it into a successful response.
    #[error("upload {upload} is already committed as {}", object.name)]
    AlreadyCommitted {
        upload: UploadName,
        object: Box<CommittedObject>,
    },

    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("upload not found: {0}")]
    NotFound(UploadName),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("metadata error: {0}")]
    Metadata(MetadataError),
}

impl UploadError {
    /// Whether the same request may succeed if retried unchanged.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::TransientStoreFailure(_) | Self::CommitInProgress { .. }
        )
    }

    /// Short label used in metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateSequence { .. } => "duplicate_sequence",
            Self::FinalChunkConflict { .. } => "final_chunk_conflict",
            Self::IncompleteUpload { .. } => "incomplete_upload",
            Self::UploadClosed { .. } => "upload_closed",
            Self::AbandonCommitted { .. } => "upload_committed",
            Self::ObjectNameTaken { .. } => "object_name_taken",
            Self::CommitInProgress { .. } => "commit_in_progress",
            Self::TransientStoreFailure(_) => "transient_store_failure",
            Self::AlreadyCommitted { .. } => "already_committed",
            Self::InvalidChunk(_) => "invalid_chunk",
            Self::NotFound(_) => "not_found",
            Self::Storage(_) => "storage_error",
            Self::Metadata(_) => "metadata_error",
        }
    }
}

impl From<StorageError> for UploadError {
    fn from(e: StorageError) -> Self {
        if e.is_transient() {
            Self::TransientStoreFailure(e.to_string())
        } else {
            Self::Storage(e)
        }
    }
}

impl From<MetadataError> for UploadError {
    fn from(e: MetadataError) -> Self {
        if e.is_transient() {
            Self::TransientStoreFailure(e.to_string())
        } else {
            Self::Metadata(e)
        }
    }
}

impl From<ferry_core::Error> for UploadError {
    fn from(e: ferry_core::Error) -> Self {
        Self::InvalidChunk(e.to_string())
    }
}

/// Result type for upload operations.
pub type UploadResult<T> = std::result::Result<T, UploadError>;

/// Run one store call under `limit`. Expiry is a transient failure.
pub(crate) async fn bounded<T, E, F>(limit: Duration, op: &'static str, fut: F) -> UploadResult<T>
where
    F: Future<Output = Result<T, E>>,
    UploadError: From<E>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(UploadError::from),
        Err(_) => {
            tracing::warn!(op, timeout_ms = limit.as_millis() as u64, "store call timed out");
            Err(UploadError::TransientStoreFailure(format!(
                "{op} timed out after {}ms",
                limit.as_millis()
            )))
        }
    }
}
