#![deny(clippy::all)]

use crate::domain::response::{DeleteResponse, PutResponse};
use crate::domain::{Blob, DailyPickRecord, ItemMeta, PrefetchKey, StoredRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::Result;
use std::sync::Arc;

// Ports are the pluggable seams between the cache core and its backends

/// Port for one named partition of a local key -> record store.
///
/// Implementations report every storage-layer failure as
/// `Error::StorageUnavailable`.
#[async_trait]
pub trait PartitionStore: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn get(&self, id: &str) -> Result<Option<StoredRecord>>;

    /// Insert or overwrite the record for `id`.
    async fn put(&self, id: &str, record: StoredRecord) -> Result<PutResponse>;

    /// Move `id` to `at` in access order. Returns false if `id` is absent.
    async fn touch(&self, id: &str, at: i64) -> Result<bool>;

    async fn delete(&self, id: &str) -> Result<DeleteResponse>;

    async fn count(&self) -> Result<usize>;

    /// Up to `limit` ids in ascending `last_accessed` order.
    async fn oldest(&self, limit: usize) -> Result<Vec<String>>;

    async fn keys(&self) -> Result<Vec<String>>;
}

/// Port for opening, listing and dropping named partitions.
pub trait StorageFactory: Send + Sync + 'static {
    fn open_partition(&self, name: &str) -> Result<Arc<dyn PartitionStore>>;

    fn partition_names(&self) -> Result<Vec<String>>;

    fn drop_partition(&self, name: &str) -> Result<bool>;
}

/// Remote object storage holding the full assets.
#[async_trait]
pub trait RemoteObjectStore: Send + Sync + 'static {
    async fn fetch_asset(&self, url: &str) -> Result<Blob>;

    /// Mint a fresh download URL for an object path.
    async fn download_url(&self, path: &str) -> Result<String>;

    /// Upload and return the download URL of the stored object.
    async fn put_asset(&self, path: &str, blob: Blob) -> Result<String>;
}

/// Remote document store with item metadata and the shared daily pick.
#[async_trait]
pub trait RemoteDocumentStore: Send + Sync + 'static {
    async fn get_item_meta(&self, collection: &str, id: &str) -> Result<Option<ItemMeta>>;

    /// Items ordered by `order_by` descending, at most `limit`.
    async fn list_items(&self, collection: &str, order_by: &str, limit: usize) -> Result<Vec<ItemMeta>>;

    /// Merge `patch` into the item's metadata, creating it if needed.
    async fn set_item_meta(&self, collection: &str, id: &str, patch: ItemMeta) -> Result<()>;

    async fn get_daily_pick(&self, session: &str) -> Result<Option<DailyPickRecord>>;

    /// Last write wins.
    async fn set_daily_pick(&self, session: &str, record: DailyPickRecord) -> Result<()>;
}

/// Records which prefetches already succeeded.
#[async_trait]
pub trait PrefetchLedger: Send + Sync + 'static {
    async fn is_done(&self, key: &PrefetchKey) -> Result<bool>;

    async fn mark_done(&self, key: &PrefetchKey) -> Result<()>;
}

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}
