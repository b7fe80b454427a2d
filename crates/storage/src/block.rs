//! Block staging and block-list commits.
//!
//! A [`BlockStore`] stages chunk payloads as durable but invisible blocks and
//! later commits an ordered list of them into one visible object.
//! [`ObjectBlockStore`] provides these semantics on top of any [`ObjectStore`].

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ObjectMeta, ObjectStore, PutOptions};
use async_trait::async_trait;
use bytes::Bytes;
use ferry_core::{BlockId, ObjectName, UploadName};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Staging area for blocks plus the commit primitive that makes them visible.
#[async_trait]
pub trait BlockStore: Send + Sync + 'static {
    /// Durably stage `data` under `block_id`. Staging the same id with the
    /// same bytes again is a no-op.
    async fn stage_block(
        &self,
        upload: &UploadName,
        block_id: &BlockId,
        data: Bytes,
    ) -> StorageResult<()>;

    /// Assemble the staged blocks, in the given order, into `object`.
    ///
    /// All-or-nothing: on error nothing new is visible under `object`.
    /// Committing the same list again yields the same bytes.
    async fn commit_block_list(
        &self,
        object: &ObjectName,
        upload: &UploadName,
        blocks: &[BlockId],
        content_type: &str,
    ) -> StorageResult<ObjectMeta>;

    /// Delete every block staged for `upload`. Returns how many were removed.
    async fn discard_blocks(&self, upload: &UploadName) -> StorageResult<u64>;

    /// Metadata of a committed object, if it exists.
    async fn object_meta(&self, object: &ObjectName) -> StorageResult<Option<ObjectMeta>>;

    /// Stream a committed object's bytes.
    async fn open_object(&self, object: &ObjectName) -> StorageResult<ByteStream>;

    fn backend_name(&self) -> &'static str;

    async fn health_check(&self) -> StorageResult<()>;
}

/// [`BlockStore`] that keeps blocks as individual objects under
/// `blocks/{upload}/` and commits by streaming them into `objects/{name}`.
pub struct ObjectBlockStore {
    store: Arc<dyn ObjectStore>,
}

impl ObjectBlockStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    fn blocks_prefix(upload: &UploadName) -> String {
        format!("blocks/{upload}/")
    }
}

#[async_trait]
impl BlockStore for ObjectBlockStore {
    async fn stage_block(
        &self,
        upload: &UploadName,
        block_id: &BlockId,
        data: Bytes,
    ) -> StorageResult<()> {
        let key = block_id.to_object_key(upload);
        let size = data.len();
        let written = self.store.put_if_not_exists(&key, data).await?;
        debug!(
            upload_id = %upload,
            block_id = %block_id,
            size,
            restaged = !written,
            "block staged"
        );
        Ok(())
    }

    async fn commit_block_list(
        &self,
        object: &ObjectName,
        upload: &UploadName,
        blocks: &[BlockId],
        content_type: &str,
    ) -> StorageResult<ObjectMeta> {
        // Fail before writing anything if a block is gone.
        for block_id in blocks {
            let key = block_id.to_object_key(upload);
            if !self.store.exists(&key).await? {
                return Err(StorageError::MissingBlock(key));
            }
        }

        let key = object.to_object_key();
        let mut sink = self
            .store
            .put_stream(&key, PutOptions::with_content_type(content_type))
            .await?;

        for block_id in blocks {
            let copied = async {
                let mut stream = self
                    .store
                    .get_stream(&block_id.to_object_key(upload))
                    .await?;
                while let Some(chunk) = stream.next().await {
                    sink.write(chunk?).await?;
                }
                Ok::<_, StorageError>(())
            }
            .await;

            if let Err(e) = copied {
                if let Err(abort_err) = sink.abort().await {
                    warn!(object = %object, error = %abort_err, "failed to abort object write");
                }
                return Err(match e {
                    StorageError::NotFound(key) => StorageError::MissingBlock(key),
                    other => other,
                });
            }
        }

        let size = sink.finish().await?;
        debug!(
            object = %object,
            upload_id = %upload,
            blocks = blocks.len(),
            size,
            "block list committed"
        );

        Ok(ObjectMeta {
            size,
            last_modified: Some(time::OffsetDateTime::now_utc()),
            content_type: Some(content_type.to_string()),
        })
    }

    async fn discard_blocks(&self, upload: &UploadName) -> StorageResult<u64> {
        let keys = self.store.list(&Self::blocks_prefix(upload)).await?;
        let mut removed = 0u64;
        for key in keys {
            match self.store.delete(&key).await {
                Ok(()) => removed += 1,
                // A concurrent discard got there first.
                Err(StorageError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    async fn object_meta(&self, object: &ObjectName) -> StorageResult<Option<ObjectMeta>> {
        match self.store.head(&object.to_object_key()).await {
            Ok(meta) => Ok(Some(meta)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn open_object(&self, object: &ObjectName) -> StorageResult<ByteStream> {
        self.store.get_stream(&object.to_object_key()).await
    }

    fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.store.health_check().await
    }
}
