//! Commit lease and commit marker repository.

use crate::error::MetadataResult;
use async_trait::async_trait;
use ferry_core::{BlockId, CommittedObject, ObjectName, SequenceKey, UploadName};
use time::OffsetDateTime;

/// Durable commit state of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitStatus {
    /// A commit is running (or crashed) under a lease.
    Committing {
        owner: String,
        lease_expires_at: OffsetDateTime,
    },
    /// The upload is committed; this is the commit marker.
    Committed(CommittedObject),
}

/// Result of trying to take the commit lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// The caller now holds the lease.
    Acquired,
    /// Another owner holds a live lease.
    Held {
        owner: String,
        lease_expires_at: OffsetDateTime,
    },
    /// The upload was already committed.
    Committed(CommittedObject),
    /// Another upload holds or has committed the requested object name.
    NameTaken { holder: UploadName },
}

/// Repository for per-upload commit leases and markers.
#[async_trait]
pub trait CommitRepo: Send + Sync {
    /// Take the commit lease for `upload`.
    ///
    /// Succeeds when no lease exists, when the existing lease has expired at
    /// `now`, or when `owner` already holds it. The lease lasts until
    /// `expires_at`. Object names are exclusive: a name claimed by another
    /// upload's lease or marker is refused.
    async fn acquire_commit_lease(
        &self,
        upload: &UploadName,
        object: &ObjectName,
        content_type: &str,
        owner: &str,
        now: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> MetadataResult<LeaseOutcome>;

    /// Turn `owner`'s lease into the commit marker and record the committed
    /// block list, `block_ids[i]` being the block of sequence key `i`.
    ///
    /// Returns false if `owner` no longer holds the lease.
    async fn mark_committed(
        &self,
        upload: &UploadName,
        owner: &str,
        object: &CommittedObject,
        block_ids: &[BlockId],
    ) -> MetadataResult<bool>;

    /// Drop `owner`'s lease after a failed commit. No-op if not held.
    async fn release_commit_lease(&self, upload: &UploadName, owner: &str) -> MetadataResult<()>;

    /// Drop a lease whose expiry is before `now`, whoever holds it.
    /// Returns true if a lease was removed.
    async fn clear_expired_lease(
        &self,
        upload: &UploadName,
        now: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Current commit state, if any.
    async fn get_commit(&self, upload: &UploadName) -> MetadataResult<Option<CommitStatus>>;

    /// Block committed at `sequence` of a committed upload. Survives the
    /// purge of chunk records.
    async fn committed_block(
        &self,
        upload: &UploadName,
        sequence: SequenceKey,
    ) -> MetadataResult<Option<BlockId>>;
}
