//! Database models mapping to the metadata schema.

use crate::error::{MetadataError, MetadataResult};
use ferry_core::{
    BlockId, ChunkRecord, CommitTarget, CommittedObject, ContentHash, ObjectName, SequenceKey,
    UploadName,
};
use sqlx::FromRow;
use time::OffsetDateTime;

pub(crate) fn sequence_to_db(sequence: SequenceKey) -> MetadataResult<i64> {
    i64::try_from(sequence.get()).map_err(|_| {
        MetadataError::Constraint(format!("sequence key {sequence} exceeds storable range"))
    })
}

fn sequence_from_db(value: i64) -> MetadataResult<SequenceKey> {
    u64::try_from(value)
        .map(SequenceKey::new)
        .map_err(|_| MetadataError::Corrupt(format!("negative sequence key {value}")))
}

fn size_from_db(column: &str, value: i64) -> MetadataResult<u64> {
    u64::try_from(value).map_err(|_| MetadataError::Corrupt(format!("negative {column} {value}")))
}

/// One received chunk.
#[derive(Debug, Clone, FromRow)]
pub struct ChunkRow {
    pub upload_id: String,
    pub sequence_key: i64,
    pub block_id: String,
    pub content_hash: String,
    pub size_bytes: i64,
    pub is_final: bool,
    pub created_at: OffsetDateTime,
    /// Requested object name, final chunk only.
    pub object_name: Option<String>,
    /// Requested content type, final chunk only.
    pub content_type: Option<String>,
}

impl ChunkRow {
    pub fn from_record(record: &ChunkRecord) -> MetadataResult<Self> {
        Ok(Self {
            upload_id: record.upload.to_string(),
            sequence_key: sequence_to_db(record.sequence)?,
            block_id: record.block_id.to_string(),
            content_hash: record.content_hash.to_hex(),
            size_bytes: i64::try_from(record.size_bytes).map_err(|_| {
                MetadataError::Constraint(format!("chunk size {} too large", record.size_bytes))
            })?,
            is_final: record.is_final,
            created_at: record.created_at,
            object_name: record.target.object_name.as_ref().map(ToString::to_string),
            content_type: record.target.content_type.clone(),
        })
    }

    pub fn into_record(self) -> MetadataResult<ChunkRecord> {
        Ok(ChunkRecord {
            upload: UploadName::parse(&self.upload_id)?,
            sequence: sequence_from_db(self.sequence_key)?,
            block_id: BlockId::parse(&self.block_id)?,
            content_hash: ContentHash::from_hex(&self.content_hash)?,
            size_bytes: size_from_db("size_bytes", self.size_bytes)?,
            is_final: self.is_final,
            created_at: self.created_at,
            target: CommitTarget {
                object_name: self
                    .object_name
                    .as_deref()
                    .map(ObjectName::parse)
                    .transpose()?,
                content_type: self.content_type,
            },
        })
    }
}

/// Commit lease and, once committed, the commit marker of an upload.
#[derive(Debug, Clone, FromRow)]
pub struct CommitRow {
    pub upload_id: String,
    pub object_name: String,
    pub content_type: String,
    /// 'committing' or 'committed'
    pub state: String,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<OffsetDateTime>,
    pub final_sequence: Option<i64>,
    pub block_count: Option<i64>,
    pub total_size: Option<i64>,
    pub committed_at: Option<OffsetDateTime>,
    pub updated_at: OffsetDateTime,
}

pub(crate) const STATE_COMMITTING: &str = "committing";
pub(crate) const STATE_COMMITTED: &str = "committed";

impl CommitRow {
    /// The committed object, or `None` while the row is still a lease.
    pub fn committed_object(&self) -> MetadataResult<Option<CommittedObject>> {
        if self.state != STATE_COMMITTED {
            return Ok(None);
        }
        let missing = |column: &str| {
            MetadataError::Corrupt(format!(
                "committed upload {} has no {column}",
                self.upload_id
            ))
        };
        Ok(Some(CommittedObject {
            name: ObjectName::parse(&self.object_name)?,
            content_type: self.content_type.clone(),
            size_bytes: size_from_db(
                "total_size",
                self.total_size.ok_or_else(|| missing("total_size"))?,
            )?,
            block_count: size_from_db(
                "block_count",
                self.block_count.ok_or_else(|| missing("block_count"))?,
            )?,
            final_sequence: sequence_from_db(
                self.final_sequence.ok_or_else(|| missing("final_sequence"))?,
            )?,
            committed_at: self.committed_at.ok_or_else(|| missing("committed_at"))?,
        }))
    }
}
