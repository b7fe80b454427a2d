//! Commit assembly: turn an upload's recorded chunks into one object.
//!
//! A commit runs under two guards: the in-process [`CommitLocks`] entry for
//! the upload, and a durable lease in the metadata store so that only one
//! node assembles a given upload at a time. The commit marker written at the
//! end makes every later commit of the same upload a no-op.

use crate::metrics::{COMMIT_DURATION, COMMITS, COMMITS_IN_FLIGHT, record_commit_failure};
use crate::upload::error::{UploadError, UploadResult, bounded};
use crate::upload::locks::CommitLocks;
use ferry_core::config::UploadConfig;
use ferry_core::{BlockId, CommittedObject, ObjectName, UploadName, order_for_commit};
use ferry_metadata::{ChunkRepo, CommitRepo, CommitStatus, LeaseOutcome, MetadataStore};
use ferry_storage::BlockStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Result of a successful commit request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// This call assembled and published the object.
    Committed(CommittedObject),
    /// The upload had been committed before; nothing was written.
    AlreadyCommitted(CommittedObject),
}

impl CommitOutcome {
    pub fn object(&self) -> &CommittedObject {
        match self {
            Self::Committed(object) | Self::AlreadyCommitted(object) => object,
        }
    }

    pub fn into_object(self) -> CommittedObject {
        match self {
            Self::Committed(object) | Self::AlreadyCommitted(object) => object,
        }
    }
}

/// Assembles uploads into committed objects.
pub struct CommitAssembler {
    blocks: Arc<dyn BlockStore>,
    metadata: Arc<dyn MetadataStore>,
    locks: Arc<CommitLocks>,
    node_id: String,
    store_timeout: Duration,
    commit_lease: time::Duration,
    purge_on_commit: bool,
}

impl CommitAssembler {
    pub fn new(
        blocks: Arc<dyn BlockStore>,
        metadata: Arc<dyn MetadataStore>,
        locks: Arc<CommitLocks>,
        config: &UploadConfig,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            blocks,
            metadata,
            locks,
            node_id: node_id.into(),
            store_timeout: config.store_timeout(),
            commit_lease: config.commit_lease(),
            purge_on_commit: config.purge_on_commit,
        }
    }

    /// Lease owner identity of this node.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Commit `upload` as `object`.
    ///
    /// Requires a final chunk and a gap-free key range `0..=final`. Returns
    /// [`CommitOutcome::AlreadyCommitted`] with the recorded object if the
    /// upload was committed before.
    #[tracing::instrument(skip_all, fields(upload_id = %upload, object = %object))]
    pub async fn commit(
        &self,
        upload: &UploadName,
        object: &ObjectName,
        content_type: &str,
    ) -> UploadResult<CommitOutcome> {
        let result = {
            let _guard = self.locks.acquire(upload).await;
            self.commit_locked(upload, object, content_type).await
        };

        match result {
            Ok(committed) => Ok(CommitOutcome::Committed(committed)),
            Err(UploadError::AlreadyCommitted { object, .. }) => {
                debug!("upload already committed");
                Ok(CommitOutcome::AlreadyCommitted(*object))
            }
            Err(e) => Err(e),
        }
    }

    async fn commit_locked(
        &self,
        upload: &UploadName,
        object: &ObjectName,
        content_type: &str,
    ) -> UploadResult<CommittedObject> {
        let now = OffsetDateTime::now_utc();
        let lease = bounded(
            self.store_timeout,
            "acquire_commit_lease",
            self.metadata.acquire_commit_lease(
                upload,
                object,
                content_type,
                &self.node_id,
                now,
                now + self.commit_lease,
            ),
        )
        .await?;

        match lease {
            LeaseOutcome::Acquired => {}
            LeaseOutcome::Held {
                owner,
                lease_expires_at,
            } => {
                debug!(owner = %owner, lease_expires_at = %lease_expires_at, "commit lease held elsewhere");
                return Err(UploadError::CommitInProgress {
                    upload: upload.clone(),
                    owner,
                });
            }
            LeaseOutcome::Committed(existing) => {
                return Err(UploadError::AlreadyCommitted {
                    upload: upload.clone(),
                    object: Box::new(existing),
                });
            }
            LeaseOutcome::NameTaken { holder } => {
                debug!(holder = %holder, "object name claimed by another upload");
                return Err(UploadError::ObjectNameTaken {
                    upload: upload.clone(),
                    object: object.clone(),
                    holder,
                });
            }
        }

        COMMITS_IN_FLIGHT.inc();
        let start = Instant::now();
        let result = self.assemble(upload, object, content_type).await;
        COMMITS_IN_FLIGHT.dec();

        match result {
            Ok(committed) => {
                COMMITS.inc();
                COMMIT_DURATION.observe(start.elapsed().as_secs_f64());
                info!(
                    size_bytes = committed.size_bytes,
                    block_count = committed.block_count,
                    final_sequence = %committed.final_sequence,
                    content_type = %committed.content_type,
                    "upload committed"
                );
                if self.purge_on_commit {
                    self.purge(upload).await;
                }
                Ok(committed)
            }
            Err(e @ UploadError::AlreadyCommitted { .. }) => Err(e),
            Err(e) => {
                record_commit_failure(e.kind());
                warn!(error = %e, "commit failed, releasing lease");
                if let Err(release_err) = bounded(
                    self.store_timeout,
                    "release_commit_lease",
                    self.metadata.release_commit_lease(upload, &self.node_id),
                )
                .await
                {
                    // The lease still expires on its own.
                    warn!(error = %release_err, "failed to release commit lease");
                }
                Err(e)
            }
        }
    }

    /// Read, order and verify the records, then commit the block list and
    /// write the marker. Caller holds the lease.
    async fn assemble(
        &self,
        upload: &UploadName,
        object: &ObjectName,
        content_type: &str,
    ) -> UploadResult<CommittedObject> {
        let records = bounded(
            self.store_timeout,
            "list_chunks",
            self.metadata.list_by_upload(upload),
        )
        .await?;
        if records.is_empty() {
            return Err(UploadError::NotFound(upload.clone()));
        }

        let ordered = order_for_commit(records).map_err(|e| UploadError::IncompleteUpload {
            upload: upload.clone(),
            reason: match e {
                ferry_core::Error::IncompleteUpload(reason) => reason,
                other => other.to_string(),
            },
        })?;
        let final_sequence = match ordered.last() {
            Some(record) => record.sequence,
            None => return Err(UploadError::NotFound(upload.clone())),
        };
        let block_ids: Vec<BlockId> = ordered.into_iter().map(|r| r.block_id).collect();

        let meta = bounded(
            self.store_timeout,
            "commit_block_list",
            self.blocks
                .commit_block_list(object, upload, &block_ids, content_type),
        )
        .await?;

        let committed = CommittedObject {
            name: object.clone(),
            content_type: content_type.to_string(),
            size_bytes: meta.size,
            block_count: block_ids.len() as u64,
            final_sequence,
            committed_at: OffsetDateTime::now_utc(),
        };

        let marked = bounded(
            self.store_timeout,
            "mark_committed",
            self.metadata
                .mark_committed(upload, &self.node_id, &committed, &block_ids),
        )
        .await?;
        if marked {
            return Ok(committed);
        }

        // The lease expired and someone else took over. The object bytes are
        // identical either way; report whatever the store now says.
        warn!("commit lease lost before the marker was written");
        match bounded(
            self.store_timeout,
            "get_commit",
            self.metadata.get_commit(upload),
        )
        .await?
        {
            Some(CommitStatus::Committed(existing)) => Err(UploadError::AlreadyCommitted {
                upload: upload.clone(),
                object: Box::new(existing),
            }),
            Some(CommitStatus::Committing { owner, .. }) => Err(UploadError::CommitInProgress {
                upload: upload.clone(),
                owner,
            }),
            None => Err(UploadError::TransientStoreFailure(format!(
                "commit lease for {upload} vanished before the marker was written"
            ))),
        }
    }

    /// Drop staged blocks and chunk records of a committed upload.
    /// Failures are logged; the commit itself already succeeded.
    async fn purge(&self, upload: &UploadName) {
        match bounded(
            self.store_timeout,
            "discard_blocks",
            self.blocks.discard_blocks(upload),
        )
        .await
        {
            Ok(removed) => debug!(blocks = removed, "staged blocks purged"),
            Err(e) => warn!(error = %e, "failed to purge staged blocks"),
        }

        match bounded(
            self.store_timeout,
            "delete_upload_chunks",
            self.metadata.delete_upload_chunks(upload),
        )
        .await
        {
            Ok(removed) => debug!(records = removed, "chunk records purged"),
            Err(e) => warn!(error = %e, "failed to purge chunk records"),
        }
    }
}
