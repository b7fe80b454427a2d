//! Chunk record repository.

use crate::error::MetadataResult;
use async_trait::async_trait;
use ferry_core::{ChunkRecord, SequenceKey, UploadName};
use time::OffsetDateTime;

/// Result of a conditional chunk insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// The record was written.
    Inserted,
    /// A record already exists for this `(upload, sequence)` pair.
    Existing(ChunkRecord),
    /// The record is final but the upload already has a final chunk at another key.
    FinalConflict(ChunkRecord),
}

/// Repository for chunk records.
///
/// Records are write-once: a key is never overwritten, only deleted together
/// with the rest of its upload.
#[async_trait]
pub trait ChunkRepo: Send + Sync {
    /// Insert a record unless its `(upload, sequence)` key is taken.
    async fn put_chunk(&self, record: &ChunkRecord) -> MetadataResult<PutOutcome>;

    /// Get a single record.
    async fn get_chunk(
        &self,
        upload: &UploadName,
        sequence: SequenceKey,
    ) -> MetadataResult<Option<ChunkRecord>>;

    /// All records of an upload, ascending by sequence key. Never truncated.
    async fn list_by_upload(&self, upload: &UploadName) -> MetadataResult<Vec<ChunkRecord>>;

    /// The upload's final record, if one has been received.
    async fn final_chunk(&self, upload: &UploadName) -> MetadataResult<Option<ChunkRecord>>;

    /// Delete every record of an upload. Returns the number removed.
    async fn delete_upload_chunks(&self, upload: &UploadName) -> MetadataResult<u64>;

    /// Uncommitted uploads whose newest chunk arrived before `older_than`,
    /// oldest first.
    async fn list_stale_uploads(
        &self,
        older_than: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<UploadName>>;
}
