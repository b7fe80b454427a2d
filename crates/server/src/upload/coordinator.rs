//! Chunk receipt and upload lifecycle.
//!
//! [`UploadCoordinator::receive_chunk`] stages a payload, records it and, once
//! the upload has its final chunk, hands it to the [`CommitAssembler`].
//! Uploads are implicit: the first chunk under a name opens one.

use crate::metrics::{
    BYTES_STAGED, CHUNK_RECEIVE_DURATION, CHUNKS_DUPLICATED, CHUNKS_RECEIVED, UPLOADS_ABANDONED,
};
use crate::upload::assembler::{CommitAssembler, CommitOutcome};
use crate::upload::error::{UploadError, UploadResult, bounded};
use crate::upload::locks::CommitLocks;
use bytes::Bytes;
use ferry_core::config::{AppConfig, CommitMode, UploadConfig};
use ferry_core::{
    BlockId, ChunkRecord, CommittedObject, ContentHash, ObjectName, SequenceKey, UploadName,
    missing_keys,
};

pub use ferry_core::CommitTarget;
use ferry_metadata::{ChunkRepo, CommitRepo, CommitStatus, MetadataStore, PutOutcome};
use ferry_storage::BlockStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Most missing keys reported by [`UploadCoordinator::status`].
pub const MISSING_KEYS_LIMIT: usize = 100;

/// Longest accepted content type.
const MAX_CONTENT_TYPE_LEN: usize = 255;

/// One received chunk.
#[derive(Debug, Clone)]
pub struct IncomingChunk {
    pub upload: UploadName,
    pub sequence: SequenceKey,
    pub payload: Bytes,
    pub is_final: bool,
    pub target: CommitTarget,
}

/// How a chunk request was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    /// Newly staged and recorded.
    Staged,
    /// Same key and content as an earlier request; nothing new written.
    Duplicate,
    /// The upload is committed; `object` describes it.
    Committed,
    /// Final chunk recorded; the commit runs in the background.
    CommitPending,
}

/// Acknowledgement returned for every accepted chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkAck {
    pub upload_id: UploadName,
    pub sequence_key: SequenceKey,
    pub block_id: BlockId,
    pub status: AckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<CommittedObject>,
}

impl ChunkAck {
    fn new(record: &ChunkRecord, status: AckStatus, object: Option<CommittedObject>) -> Self {
        Self {
            upload_id: record.upload.clone(),
            sequence_key: record.sequence,
            block_id: record.block_id.clone(),
            status,
            object,
        }
    }
}

/// Lifecycle position of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Open,
    Committing,
    Committed,
}

/// Progress report for one upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadStatus {
    pub upload_id: UploadName,
    pub state: UploadState,
    pub chunks_received: u64,
    pub bytes_received: u64,
    pub final_sequence: Option<SequenceKey>,
    /// Absent keys below the final key (or the highest key seen), capped.
    pub missing_keys: Vec<SequenceKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<CommittedObject>,
}

/// What an abandon removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbandonReport {
    pub upload_id: UploadName,
    pub chunks_deleted: u64,
    pub blocks_deleted: u64,
}

/// Coordinates chunk receipt, commits and abandons across uploads.
pub struct UploadCoordinator {
    blocks: Arc<dyn BlockStore>,
    metadata: Arc<dyn MetadataStore>,
    assembler: Arc<CommitAssembler>,
    locks: Arc<CommitLocks>,
    config: UploadConfig,
    max_chunk_size: u64,
}

impl UploadCoordinator {
    /// Build a coordinator with a fresh lease owner identity.
    pub fn new(
        config: &AppConfig,
        blocks: Arc<dyn BlockStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let node_id = format!("ferryd-{}", uuid::Uuid::new_v4().simple());
        Self::with_node_id(config, blocks, metadata, node_id)
    }

    /// Build a coordinator that takes commit leases as `node_id`.
    pub fn with_node_id(
        config: &AppConfig,
        blocks: Arc<dyn BlockStore>,
        metadata: Arc<dyn MetadataStore>,
        node_id: impl Into<String>,
    ) -> Self {
        let locks = Arc::new(CommitLocks::new());
        let assembler = Arc::new(CommitAssembler::new(
            Arc::clone(&blocks),
            Arc::clone(&metadata),
            Arc::clone(&locks),
            &config.upload,
            node_id,
        ));
        Self {
            blocks,
            metadata,
            assembler,
            locks,
            config: config.upload.clone(),
            max_chunk_size: config.server.max_chunk_size,
        }
    }

    pub fn assembler(&self) -> &Arc<CommitAssembler> {
        &self.assembler
    }

    fn store_timeout(&self) -> Duration {
        self.config.store_timeout()
    }

    /// Stage and record one chunk, committing the upload once it is complete.
    #[tracing::instrument(
        skip_all,
        fields(upload_id = %chunk.upload, sequence_key = %chunk.sequence, is_final = chunk.is_final)
    )]
    pub async fn receive_chunk(&self, chunk: IncomingChunk) -> UploadResult<ChunkAck> {
        let start = Instant::now();
        self.validate_payload(&chunk)?;
        let IncomingChunk {
            upload,
            sequence,
            payload,
            is_final,
            target,
        } = chunk;
        let target = validate_target(target)?;

        let commit = bounded(
            self.store_timeout(),
            "get_commit",
            self.metadata.get_commit(&upload),
        )
        .await?;
        if let Some(CommitStatus::Committed(committed)) = commit {
            return self
                .answer_committed(upload, sequence, &payload, is_final, committed)
                .await;
        }

        let record = ChunkRecord::new(upload.clone(), sequence, &payload, is_final)
            .with_target(target.clone());

        let existing = bounded(
            self.store_timeout(),
            "get_chunk",
            self.metadata.get_chunk(&upload, sequence),
        )
        .await?;
        if let Some(existing) = existing {
            return self.resend(existing, &record, target).await;
        }

        self.check_final_invariants(&record).await?;

        bounded(
            self.store_timeout(),
            "stage_block",
            self.blocks.stage_block(&upload, &record.block_id, payload),
        )
        .await?;

        match bounded(
            self.store_timeout(),
            "put_chunk",
            self.metadata.put_chunk(&record),
        )
        .await?
        {
            PutOutcome::Inserted => {}
            PutOutcome::Existing(existing) => {
                // Lost a race with a concurrent request for the same key.
                return self.resend(existing, &record, target).await;
            }
            PutOutcome::FinalConflict(existing) if existing.sequence == record.sequence => {
                return self.resend(existing, &record, target).await;
            }
            PutOutcome::FinalConflict(existing) => {
                return Err(UploadError::FinalChunkConflict {
                    upload,
                    reason: format!("final chunk already received at key {}", existing.sequence),
                });
            }
        }

        CHUNKS_RECEIVED.inc();
        BYTES_STAGED.inc_by(record.size_bytes);
        CHUNK_RECEIVE_DURATION.observe(start.elapsed().as_secs_f64());
        debug!(block_id = %record.block_id, size_bytes = record.size_bytes, "chunk staged");

        // Read the final record after the insert: whichever chunk of a racing
        // group lands last is then guaranteed to see the complete set.
        let final_record = if record.is_final {
            Some(record.clone())
        } else {
            self.recorded_final(&upload).await?
        };
        self.after_record(record, final_record, AckStatus::Staged, target)
            .await
    }

    /// Re-drive the commit of `upload` on request.
    ///
    /// Always runs inline, whatever the configured commit mode. Fields set in
    /// `target` override the target recorded with the final chunk.
    pub async fn commit(
        &self,
        upload: &UploadName,
        target: CommitTarget,
    ) -> UploadResult<CommitOutcome> {
        let requested = validate_target(target)?;
        let target = match self.recorded_final(upload).await? {
            Some(final_record) => requested.or(&final_record.target),
            None => requested,
        };
        let (object, content_type) = self.resolve_target(upload, target);
        self.assembler.commit(upload, &object, &content_type).await
    }

    /// Report what has been received for `upload`.
    pub async fn status(&self, upload: &UploadName) -> UploadResult<UploadStatus> {
        let commit = bounded(
            self.store_timeout(),
            "get_commit",
            self.metadata.get_commit(upload),
        )
        .await?;
        let records = bounded(
            self.store_timeout(),
            "list_chunks",
            self.metadata.list_by_upload(upload),
        )
        .await?;

        if records.is_empty() && commit.is_none() {
            return Err(UploadError::NotFound(upload.clone()));
        }

        let chunks_received = records.len() as u64;
        let bytes_received = records.iter().map(|r| r.size_bytes).sum();
        let recorded_final = records.iter().find(|r| r.is_final).map(|r| r.sequence);
        let present: Vec<SequenceKey> = records.iter().map(|r| r.sequence).collect();

        let (state, object) = match commit {
            Some(CommitStatus::Committed(object)) => (UploadState::Committed, Some(object)),
            Some(CommitStatus::Committing { .. }) => (UploadState::Committing, None),
            None => (UploadState::Open, None),
        };

        let (final_sequence, missing) = match &object {
            Some(object) => (Some(object.final_sequence), Vec::new()),
            None => {
                let last = recorded_final.or_else(|| present.last().copied());
                let missing = last
                    .map(|last| missing_keys(&present, last, MISSING_KEYS_LIMIT))
                    .unwrap_or_default();
                (recorded_final, missing)
            }
        };

        Ok(UploadStatus {
            upload_id: upload.clone(),
            state,
            chunks_received,
            bytes_received,
            final_sequence,
            missing_keys: missing,
            object,
        })
    }

    /// Discard an uncommitted upload: its chunk records, staged blocks and
    /// any expired commit lease.
    #[tracing::instrument(skip_all, fields(upload_id = %upload))]
    pub async fn abandon(&self, upload: &UploadName) -> UploadResult<AbandonReport> {
        let _guard = self.locks.acquire(upload).await;
        self.abandon_locked(upload).await
    }

    async fn abandon_locked(&self, upload: &UploadName) -> UploadResult<AbandonReport> {
        let now = OffsetDateTime::now_utc();
        let mut lease_cleared = false;

        match bounded(
            self.store_timeout(),
            "get_commit",
            self.metadata.get_commit(upload),
        )
        .await?
        {
            Some(CommitStatus::Committed(_)) => {
                return Err(UploadError::AbandonCommitted {
                    upload: upload.clone(),
                });
            }
            Some(CommitStatus::Committing {
                owner,
                lease_expires_at,
            }) if lease_expires_at > now => {
                return Err(UploadError::CommitInProgress {
                    upload: upload.clone(),
                    owner,
                });
            }
            Some(CommitStatus::Committing { .. }) => {
                lease_cleared = bounded(
                    self.store_timeout(),
                    "clear_expired_lease",
                    self.metadata.clear_expired_lease(upload, now),
                )
                .await?;
            }
            None => {}
        }

        // Blocks first: a record left behind still lets the janitor find them.
        let blocks_deleted = bounded(
            self.store_timeout(),
            "discard_blocks",
            self.blocks.discard_blocks(upload),
        )
        .await?;
        let chunks_deleted = bounded(
            self.store_timeout(),
            "delete_upload_chunks",
            self.metadata.delete_upload_chunks(upload),
        )
        .await?;

        if chunks_deleted == 0 && blocks_deleted == 0 && !lease_cleared {
            return Err(UploadError::NotFound(upload.clone()));
        }

        UPLOADS_ABANDONED.inc();
        info!(chunks_deleted, blocks_deleted, "upload abandoned");

        Ok(AbandonReport {
            upload_id: upload.clone(),
            chunks_deleted,
            blocks_deleted,
        })
    }

    /// Abandon one batch of uncommitted uploads idle since before `now - abandon_after`.
    /// Returns how many were abandoned.
    pub async fn abandon_stale(&self, now: OffsetDateTime) -> UploadResult<usize> {
        let cutoff = now - self.config.abandon_after();
        let stale = bounded(
            self.store_timeout(),
            "list_stale_uploads",
            self.metadata
                .list_stale_uploads(cutoff, self.config.janitor_batch_size),
        )
        .await?;

        let mut abandoned = 0;
        for upload in stale {
            match self.abandon(&upload).await {
                Ok(_) => abandoned += 1,
                Err(UploadError::NotFound(_)) => {}
                Err(e) => warn!(upload_id = %upload, error = %e, "failed to abandon stale upload"),
            }
        }
        Ok(abandoned)
    }

    /// A request for a key that is already recorded.
    async fn resend(
        &self,
        existing: ChunkRecord,
        incoming: &ChunkRecord,
        request_target: CommitTarget,
    ) -> UploadResult<ChunkAck> {
        if !existing.same_chunk(incoming) {
            return Err(UploadError::DuplicateSequence {
                upload: existing.upload,
                sequence: existing.sequence,
            });
        }

        CHUNKS_DUPLICATED.inc();
        debug!(block_id = %existing.block_id, "idempotent chunk resend");

        let final_record = if existing.is_final {
            Some(existing.clone())
        } else {
            self.recorded_final(&existing.upload).await?
        };

        self.after_record(existing, final_record, AckStatus::Duplicate, request_target)
            .await
    }

    async fn recorded_final(&self, upload: &UploadName) -> UploadResult<Option<ChunkRecord>> {
        bounded(
            self.store_timeout(),
            "final_chunk",
            self.metadata.final_chunk(upload),
        )
        .await
    }

    /// Reject a final chunk that conflicts with what is recorded, and a
    /// chunk beyond the recorded final.
    async fn check_final_invariants(&self, record: &ChunkRecord) -> UploadResult<()> {
        let recorded_final = bounded(
            self.store_timeout(),
            "final_chunk",
            self.metadata.final_chunk(&record.upload),
        )
        .await?;

        match recorded_final {
            Some(existing) if record.is_final && existing.sequence != record.sequence => {
                Err(UploadError::FinalChunkConflict {
                    upload: record.upload.clone(),
                    reason: format!("final chunk already received at key {}", existing.sequence),
                })
            }
            Some(existing) if record.sequence > existing.sequence => {
                Err(UploadError::FinalChunkConflict {
                    upload: record.upload.clone(),
                    reason: format!(
                        "chunk {} follows final chunk {}",
                        record.sequence, existing.sequence
                    ),
                })
            }
            Some(_) => Ok(()),
            None if record.is_final => {
                let records = bounded(
                    self.store_timeout(),
                    "list_chunks",
                    self.metadata.list_by_upload(&record.upload),
                )
                .await?;
                if let Some(last) = records.last()
                    && last.sequence > record.sequence
                {
                    return Err(UploadError::FinalChunkConflict {
                        upload: record.upload.clone(),
                        reason: format!(
                            "chunk {} already received beyond final key {}",
                            last.sequence, record.sequence
                        ),
                    });
                }
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Commit once the upload has a final chunk and no gaps; otherwise
    /// acknowledge with `status`.
    ///
    /// The commit goes to the target recorded with the final chunk; fields it
    /// leaves unset come from `request_target`.
    async fn after_record(
        &self,
        record: ChunkRecord,
        final_record: Option<ChunkRecord>,
        status: AckStatus,
        request_target: CommitTarget,
    ) -> UploadResult<ChunkAck> {
        let Some(final_record) = final_record else {
            return Ok(ChunkAck::new(&record, status, None));
        };
        let final_sequence = final_record.sequence;
        if !self.is_complete(&record.upload, final_sequence).await? {
            debug!(final_sequence = %final_sequence, "upload incomplete, commit waits for missing chunks");
            return Ok(ChunkAck::new(&record, status, None));
        }
        let (object, content_type) =
            self.resolve_target(&record.upload, final_record.target.or(&request_target));

        match self.config.commit_mode {
            CommitMode::Inline => {
                match self
                    .assembler
                    .commit(&record.upload, &object, &content_type)
                    .await
                {
                    Ok(outcome) => Ok(ChunkAck::new(
                        &record,
                        AckStatus::Committed,
                        Some(outcome.into_object()),
                    )),
                    // A concurrent abandon or racing key may have changed the set.
                    Err(UploadError::IncompleteUpload { reason, .. }) => {
                        debug!(reason = %reason, "commit deferred until upload is complete");
                        Ok(ChunkAck::new(&record, status, None))
                    }
                    Err(e) => Err(e),
                }
            }
            CommitMode::Deferred => {
                let assembler = Arc::clone(&self.assembler);
                let upload = record.upload.clone();
                tokio::spawn(async move {
                    if let Err(e) = assembler.commit(&upload, &object, &content_type).await {
                        warn!(
                            upload_id = %upload,
                            error = %e,
                            retriable = e.is_retriable(),
                            "deferred commit failed"
                        );
                    }
                });
                Ok(ChunkAck::new(&record, AckStatus::CommitPending, None))
            }
        }
    }

    /// Whether every key in `0..=final_sequence` is recorded.
    async fn is_complete(
        &self,
        upload: &UploadName,
        final_sequence: SequenceKey,
    ) -> UploadResult<bool> {
        let records = bounded(
            self.store_timeout(),
            "list_chunks",
            self.metadata.list_by_upload(upload),
        )
        .await?;
        Ok(records.len() as u64 == final_sequence.get().saturating_add(1))
    }

    fn validate_payload(&self, chunk: &IncomingChunk) -> UploadResult<()> {
        let size = chunk.payload.len() as u64;
        if size == 0 || size > self.max_chunk_size {
            return Err(ferry_core::Error::InvalidChunkSize {
                size,
                max: self.max_chunk_size,
            }
            .into());
        }
        if chunk.sequence > SequenceKey::MAX {
            return Err(UploadError::InvalidChunk(format!(
                "sequence key {} exceeds maximum {}",
                chunk.sequence,
                SequenceKey::MAX
            )));
        }
        Ok(())
    }

    fn resolve_target(&self, upload: &UploadName, target: CommitTarget) -> (ObjectName, String) {
        let object = target
            .object_name
            .unwrap_or_else(|| ObjectName::from(upload));
        let content_type = target
            .content_type
            .unwrap_or_else(|| self.config.default_content_type.clone());
        (object, content_type)
    }

    /// Answer a chunk for an upload that already has a commit marker.
    async fn answer_committed(
        &self,
        upload: UploadName,
        sequence: SequenceKey,
        payload: &[u8],
        is_final: bool,
        committed: CommittedObject,
    ) -> UploadResult<ChunkAck> {
        let recorded = if sequence <= committed.final_sequence {
            bounded(
                self.store_timeout(),
                "committed_block",
                self.metadata.committed_block(&upload, sequence),
            )
            .await?
        } else {
            None
        };
        committed_resend(upload, sequence, payload, is_final, recorded, committed)
    }
}

/// Settle a resend against a committed upload: keys past the final chunk are
/// closed, and a key must match the committed block and finality.
fn committed_resend(
    upload: UploadName,
    sequence: SequenceKey,
    payload: &[u8],
    is_final: bool,
    recorded: Option<BlockId>,
    committed: CommittedObject,
) -> UploadResult<ChunkAck> {
    if sequence > committed.final_sequence {
        return Err(UploadError::UploadClosed {
            upload,
            sequence,
            final_sequence: committed.final_sequence,
        });
    }

    let block_id = BlockId::derive(sequence, &ContentHash::compute(payload));
    let finality_matches = is_final == (sequence == committed.final_sequence);
    if !finality_matches || recorded.as_ref().is_some_and(|r| *r != block_id) {
        return Err(UploadError::DuplicateSequence { upload, sequence });
    }

    CHUNKS_DUPLICATED.inc();
    Ok(ChunkAck {
        upload_id: upload,
        sequence_key: sequence,
        block_id: recorded.unwrap_or(block_id),
        status: AckStatus::Committed,
        object: Some(committed),
    })
}

/// Normalize the content type of a requested target.
fn validate_target(target: CommitTarget) -> UploadResult<CommitTarget> {
    Ok(CommitTarget {
        object_name: target.object_name,
        content_type: target.content_type.map(validate_content_type).transpose()?,
    })
}

fn validate_content_type(content_type: String) -> UploadResult<String> {
    let trimmed = content_type.trim();
    if trimmed.is_empty()
        || trimmed.len() > MAX_CONTENT_TYPE_LEN
        || !trimmed.contains('/')
        || trimmed.chars().any(|c| c.is_control())
    {
        return Err(UploadError::InvalidChunk(format!(
            "invalid content type: {content_type:?}"
        )));
    }
    Ok(trimmed.to_string())
}
