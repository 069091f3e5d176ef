use crate::domain::response::{DeleteResponse, PruneResponse, PutResponse};
use crate::domain::{Blob, Partition};
use async_trait::async_trait;
use shared::Result;

/// Operations of one media cache over its `thumbs` and `orig` partitions
#[async_trait]
pub trait BlobCacheOperations: Send + Sync + 'static {
    /// A miss and an entry below the size floor are both `None`.
    async fn get(&self, partition: Partition, id: &str) -> Result<Option<Blob>>;

    async fn put(&self, partition: Partition, id: &str, blob: Blob) -> Result<PutResponse>;

    async fn delete(&self, partition: Partition, id: &str) -> Result<DeleteResponse>;

    /// Evict least recently accessed entries until at most `max_entries` remain.
    async fn prune(&self, partition: Partition, max_entries: usize) -> Result<PruneResponse>;
}
