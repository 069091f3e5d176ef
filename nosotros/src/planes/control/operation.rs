use std::sync::Arc;

use async_trait::async_trait;

use shared::Result;

use crate::ports::PartitionStore;

/// Lifecycle of named partitions: open, enumerate, drop.
#[async_trait]
pub trait PartitionAdmin: Send + Sync + 'static {
    /// Open the partition, creating it on first use.
    async fn open(&self, name: &str) -> Result<Arc<dyn PartitionStore>>;

    async fn names(&self) -> Result<Vec<String>>;

    async fn has(&self, name: &str) -> Result<bool>;

    async fn delete(&self, name: &str) -> Result<bool>;

    /// Delete every partition not named in `keep`; returns the dropped names.
    async fn retain_only(&self, keep: &[String]) -> Result<Vec<String>>;
}
