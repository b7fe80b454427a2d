//! In-process per-upload commit locks.

use dashmap::DashMap;
use ferry_core::UploadName;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of async mutexes keyed by upload.
///
/// Entries are created on first use and dropped once nobody holds or waits
/// on them, so the map only tracks uploads with a commit or abandon running.
#[derive(Default)]
pub struct CommitLocks {
    locks: DashMap<UploadName, Arc<Mutex<()>>>,
}

impl CommitLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `upload`. Access ends when the guard drops.
    pub async fn acquire(&self, upload: &UploadName) -> CommitLockGuard<'_> {
        // Declared before the wait so a cancelled waiter still cleans up.
        let mut held = CommitLockGuard {
            locks: self,
            upload: upload.clone(),
            guard: None,
        };
        // The shard guard must be released before awaiting.
        let lock = Arc::clone(&self.locks.entry(upload.clone()).or_default());
        held.guard = Some(lock.lock_owned().await);
        held
    }

    /// Number of uploads with a live entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one upload. Dropping it, including when the owning
/// future is cancelled, frees the lock and forgets the entry if no other task
/// wants it.
pub struct CommitLockGuard<'a> {
    locks: &'a CommitLocks,
    upload: UploadName,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for CommitLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .locks
            .remove_if(&self.upload, |_, lock| Arc::strong_count(lock) == 1);
    }
}
