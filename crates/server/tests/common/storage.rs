//! A fault-injecting object store.

use async_trait::async_trait;
use bytes::Bytes;
use ferry_storage::{
    ByteStream, ObjectMeta, ObjectStore, PutOptions, StorageError,
    StorageResult, StreamingUpload,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Wraps an object store and injects delays or transient failures into
/// block staging (`put_if_not_exists`) and block reads (`get_stream`).
#[allow(dead_code)]
pub struct FaultyStore {
    inner: Arc<dyn ObjectStore>,
    stage_delay_ms: AtomicU64,
    failing_stages: AtomicUsize,
    failing_reads: AtomicUsize,
    pub stage_calls: AtomicUsize,
}

#[allow(dead_code)]
impl FaultyStore {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            stage_delay_ms: AtomicU64::new(0),
            failing_stages: AtomicUsize::new(0),
            failing_reads: AtomicUsize::new(0),
            stage_calls: AtomicUsize::new(0),
        })
    }

    /// Delay every staging call by `delay`.
    pub fn set_stage_delay(&self, delay: Duration) {
        self.stage_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Fail the next `n` staging calls with a transient error.
    pub fn fail_next_stages(&self, n: usize) {
        self.failing_stages.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` streaming reads with a transient error.
    pub fn fail_next_reads(&self, n: usize) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ObjectStore for FaultyStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.inner.head(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        if Self::take_failure(&self.failing_reads) {
            return Err(StorageError::Unavailable(format!("injected read failure: {key}")));
        }
        self.inner.get_stream(key).await
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.inner.put(key, data).await
    }

    async fn put_if_not_exists(&self, key: &str, data: Bytes) -> StorageResult<bool> {
        self.stage_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.stage_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if Self::take_failure(&self.failing_stages) {
            return Err(StorageError::Unavailable(format!("injected stage failure: {key}")));
        }
        self.inner.put_if_not_exists(key, data).await
    }

    async fn put_stream(
        &self,
        key: &str,
        options: PutOptions,
    ) -> StorageResult<Box<dyn StreamingUpload>> {
        self.inner.put_stream(key, options).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    fn backend_name(&self) -> &'static str {
        "faulty"
    }
}
