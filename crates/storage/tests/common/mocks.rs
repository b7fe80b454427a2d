use async_trait::async_trait;
use bytes::Bytes;
use ferry_storage::error::{StorageError, StorageResult};
use ferry_storage::traits::{ByteStream, ObjectMeta, ObjectStore, PutOptions, StreamingUpload};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Wraps a real store and fails streaming reads of keys containing a marker,
/// after yielding the first piece of the object.
#[allow(dead_code)]
pub struct FailingReadStore {
    inner: Arc<dyn ObjectStore>,
    fail_on: String,
    pub failed_reads: AtomicUsize,
}

#[allow(dead_code)]
impl FailingReadStore {
    pub fn new(inner: Arc<dyn ObjectStore>, fail_on: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_on: fail_on.into(),
            failed_reads: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ObjectStore for FailingReadStore {
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
        if !key.contains(&self.fail_on) {
            return self.inner.get_stream(key).await;
        }
        self.failed_reads.fetch_add(1, Ordering::SeqCst);
        let first = self.inner.get(key).await?;
        Ok(Box::pin(futures::stream::iter(vec![
            Ok(first.slice(..first.len().min(1))),
            Err(StorageError::Unavailable("injected read failure".to_string())),
        ])))
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.inner.put(key, data).await
    }

    async fn put_if_not_exists(&self, key: &str, data: Bytes) -> StorageResult<bool> {
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
        "failing-read"
    }
}
