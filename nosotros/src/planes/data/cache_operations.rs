use crate::clock::AccessClock;
use crate::domain::response::{DeleteResponse, PruneResponse, PutResponse};
use crate::domain::{Blob, MediaCacheSpec, Partition, StoredRecord};
use crate::events::{CacheItemEvent, ItemRemovedEvent, ItemStoredEvent};
use crate::persistence::MemoryPartition;
use crate::planes::control::{CacheRegistry, PartitionAdmin};
use crate::planes::data::operation::BlobCacheOperations;
use crate::ports::PartitionStore;
use async_trait::async_trait;
use shared::{Error, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// One media cache: an unbounded `thumbs` partition (optional) and an
/// LRU-bounded `orig` partition.
#[derive(Clone)]
pub struct BlobCacheService {
    spec: MediaCacheSpec,
    thumbs: Option<Arc<dyn PartitionStore>>,
    orig: Arc<dyn PartitionStore>,
    clock: Arc<AccessClock>,
    event_broadcaster: Option<broadcast::Sender<CacheItemEvent>>,
}

impl BlobCacheService {
    pub async fn open(registry: &CacheRegistry, spec: MediaCacheSpec) -> Result<Self> {
        let thumbs = if spec.with_thumbs {
            Some(registry.open(&spec.partition_name(Partition::Thumbs)).await?)
        } else {
            None
        };
        let orig = registry.open(&spec.partition_name(Partition::Orig)).await?;

        Ok(Self {
            spec,
            thumbs,
            orig,
            clock: Arc::new(AccessClock::new()),
            event_broadcaster: None,
        })
    }

    /// Open on `registry`, falling back to volatile partitions if the backend refuses.
    pub async fn open_or_degraded(registry: &CacheRegistry, spec: MediaCacheSpec) -> Self {
        match Self::open(registry, spec.clone()).await {
            Ok(service) => service,
            Err(e) => {
                warn!(cache = %spec.database, error = %e, "Cache storage unavailable, using volatile store");
                Self::volatile(spec)
            }
        }
    }

    fn volatile(spec: MediaCacheSpec) -> Self {
        let thumbs = spec.with_thumbs.then(|| {
            Arc::new(MemoryPartition::new(spec.partition_name(Partition::Thumbs)))
                as Arc<dyn PartitionStore>
        });
        let orig = Arc::new(MemoryPartition::new(spec.partition_name(Partition::Orig)));
        Self {
            spec,
            thumbs,
            orig,
            clock: Arc::new(AccessClock::new()),
            event_broadcaster: None,
        }
    }

    pub fn with_event_broadcaster(mut self, broadcaster: broadcast::Sender<CacheItemEvent>) -> Self {
        self.event_broadcaster = Some(broadcaster);
        self
    }

    pub fn spec(&self) -> &MediaCacheSpec {
        &self.spec
    }

    /// Prune `orig` to the configured bound.
    pub async fn enforce_bound(&self) -> Result<PruneResponse> {
        self.prune(Partition::Orig, self.spec.orig_max_entries).await
    }

    fn store(&self, partition: Partition) -> Result<&Arc<dyn PartitionStore>> {
        match partition {
            Partition::Orig => Ok(&self.orig),
            Partition::Thumbs => self
                .thumbs
                .as_ref()
                .ok_or_else(|| Error::PartitionNotFound(self.spec.partition_name(partition))),
        }
    }

    fn broadcast(&self, event: CacheItemEvent) {
        let Some(broadcaster) = &self.event_broadcaster else {
            return;
        };
        let partition = event.partition().to_string();
        let id = event.id().to_string();
        match broadcaster.send(event) {
            Ok(subscriber_count) => {
                debug!(partition = %partition, id = %id, subscriber_count, "Broadcasted cache event");
            }
            Err(_) => {
                debug!(partition = %partition, id = %id, "No subscribers for cache event");
            }
        }
    }
}

impl std::fmt::Debug for BlobCacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobCacheService")
            .field("database", &self.spec.database)
            .field("orig_max_entries", &self.spec.orig_max_entries)
            .finish()
    }
}

#[async_trait]
impl BlobCacheOperations for BlobCacheService {
    async fn get(&self, partition: Partition, id: &str) -> Result<Option<Blob>> {
        let store = self.store(partition)?;
        let Some(record) = store.get(id).await? else {
            return Ok(None);
        };

        let blob = Blob::new(record.data, record.mime_type);
        if blob.is_trivial() {
            debug!(partition = %store.name(), id, size = blob.len(), "Ignoring undersized entry");
            return Ok(None);
        }

        if partition.is_bounded() {
            if let Err(e) = store.touch(id, self.clock.tick()).await {
                warn!(partition = %store.name(), id, error = %e, "Failed to refresh access time");
            }
        }

        Ok(Some(blob))
    }

    async fn put(&self, partition: Partition, id: &str, blob: Blob) -> Result<PutResponse> {
        let store = self.store(partition)?;

        if blob.is_trivial() {
            // Never leave an older entry answering for a payload we refused.
            store.delete(id).await?;
            debug!(partition = %store.name(), id, size = blob.len(), "Refused undersized payload");
            return Ok(PutResponse::new(false, false));
        }

        let mime_type = if blob.mime_type.is_empty() {
            self.spec.default_mime.clone()
        } else {
            blob.mime_type
        };
        let size = blob.bytes.len();
        let timestamp = self.clock.tick();
        let record = StoredRecord::new(blob.bytes.to_vec(), mime_type.clone(), timestamp);
        let result = store.put(id, record).await?;

        let stored = ItemStoredEvent {
            partition: store.name().to_string(),
            id: id.to_string(),
            size,
            mime_type,
            timestamp,
        };
        self.broadcast(if result.created {
            CacheItemEvent::Added(stored)
        } else {
            CacheItemEvent::Updated(stored)
        });

        Ok(result)
    }

    async fn delete(&self, partition: Partition, id: &str) -> Result<DeleteResponse> {
        let store = self.store(partition)?;
        let result = store.delete(id).await?;

        if result.deleted {
            self.broadcast(CacheItemEvent::Deleted(ItemRemovedEvent {
                partition: store.name().to_string(),
                id: id.to_string(),
                timestamp: shared::now_millis(),
            }));
        }

        Ok(result)
    }

    async fn prune(&self, partition: Partition, max_entries: usize) -> Result<PruneResponse> {
        let store = self.store(partition)?;
        let count = store.count().await?;
        if count <= max_entries {
            return Ok(PruneResponse::default());
        }

        let mut evicted = Vec::new();
        for id in store.oldest(count - max_entries).await? {
            // A concurrent delete may have beaten us to it.
            if store.delete(&id).await?.deleted {
                self.broadcast(CacheItemEvent::Evicted(ItemRemovedEvent {
                    partition: store.name().to_string(),
                    id: id.clone(),
                    timestamp: shared::now_millis(),
                }));
                evicted.push(id);
            }
        }

        debug!(partition = %store.name(), evicted = evicted.len(), "Pruned partition");
        Ok(PruneResponse::new(evicted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::SledStorageFactory;

    fn jpeg(fill: u8) -> Blob {
        Blob::new(vec![fill; 64], "image/jpeg")
    }

    async fn photos() -> BlobCacheService {
        BlobCacheService::open(&CacheRegistry::in_memory(), MediaCacheSpec::photos())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_prune_keeps_most_recent() {
        let cache = photos().await;
        for i in 0..8 {
            cache.put(Partition::Orig, &format!("id{i}"), jpeg(i)).await.unwrap();
        }

        let pruned = cache.prune(Partition::Orig, 3).await.unwrap();
        assert_eq!(pruned.evicted, vec!["id0", "id1", "id2", "id3", "id4"]);

        for i in 0..5 {
            assert!(cache.get(Partition::Orig, &format!("id{i}")).await.unwrap().is_none());
        }
        for i in 5..8 {
            assert!(cache.get(Partition::Orig, &format!("id{i}")).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn test_prune_under_bound_is_noop() {
        let cache = photos().await;
        cache.put(Partition::Orig, "A", jpeg(1)).await.unwrap();
        let pruned = cache.prune(Partition::Orig, 20).await.unwrap();
        assert!(pruned.evicted.is_empty());
    }

    #[tokio::test]
    async fn test_read_touches_entry() {
        let cache = photos().await;
        cache.put(Partition::Orig, "A", jpeg(1)).await.unwrap();
        cache.put(Partition::Orig, "B", jpeg(2)).await.unwrap();

        assert!(cache.get(Partition::Orig, "A").await.unwrap().is_some());
        cache.prune(Partition::Orig, 1).await.unwrap();

        assert!(cache.get(Partition::Orig, "A").await.unwrap().is_some());
        assert!(cache.get(Partition::Orig, "B").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_undersized_put_reads_as_miss() {
        let cache = photos().await;

        let response = cache
            .put(Partition::Orig, "empty", Blob::new(Vec::<u8>::new(), "image/jpeg"))
            .await
            .unwrap();
        assert!(!response.stored);
        assert_eq!(cache.get(Partition::Orig, "empty").await.unwrap(), None);
        assert_eq!(cache.get(Partition::Orig, "never").await.unwrap(), None);

        // An undersized overwrite also hides the previous good payload
        cache.put(Partition::Thumbs, "T", jpeg(3)).await.unwrap();
        cache
            .put(Partition::Thumbs, "T", Blob::new(vec![1u8; 31], "image/jpeg"))
            .await
            .unwrap();
        assert_eq!(cache.get(Partition::Thumbs, "T").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_default_mime_applied() {
        let cache = BlobCacheService::open(&CacheRegistry::in_memory(), MediaCacheSpec::audio())
            .await
            .unwrap();
        cache
            .put(Partition::Orig, "song", Blob::new(vec![9u8; 64], ""))
            .await
            .unwrap();
        let blob = cache.get(Partition::Orig, "song").await.unwrap().unwrap();
        assert_eq!(blob.mime_type, "audio/mpeg");
    }

    #[tokio::test]
    async fn test_audio_cache_has_no_thumbs() {
        let cache = BlobCacheService::open(&CacheRegistry::in_memory(), MediaCacheSpec::audio())
            .await
            .unwrap();
        let err = cache.get(Partition::Thumbs, "x").await.unwrap_err();
        assert!(matches!(err, Error::PartitionNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_an_error() {
        let cache = photos().await;
        assert!(!cache.delete(Partition::Thumbs, "ghost").await.unwrap().deleted);
    }

    #[tokio::test]
    async fn test_events_broadcast() {
        let (tx, mut rx) = broadcast::channel(16);
        let cache = photos().await.with_event_broadcaster(tx);

        cache.put(Partition::Orig, "A", jpeg(1)).await.unwrap();
        cache.put(Partition::Orig, "A", jpeg(2)).await.unwrap();
        cache.put(Partition::Orig, "B", jpeg(3)).await.unwrap();
        cache.prune(Partition::Orig, 1).await.unwrap();
        cache.delete(Partition::Orig, "B").await.unwrap();

        assert!(matches!(rx.recv().await.unwrap(), CacheItemEvent::Added(_)));
        assert!(matches!(rx.recv().await.unwrap(), CacheItemEvent::Updated(_)));
        assert!(matches!(rx.recv().await.unwrap(), CacheItemEvent::Added(_)));
        match rx.recv().await.unwrap() {
            CacheItemEvent::Evicted(e) => assert_eq!(e.id, "A"),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(rx.recv().await.unwrap(), CacheItemEvent::Deleted(_)));
    }

    #[tokio::test]
    async fn test_lru_bound_on_sled() {
        let temp_dir = tempfile::tempdir().unwrap();
        let factory = SledStorageFactory::new(temp_dir.path().join("media")).unwrap();
        let registry = CacheRegistry::new(Arc::new(factory));
        let cache = BlobCacheService::open(
            &registry,
            MediaCacheSpec::photos().with_orig_max_entries(2),
        )
        .await
        .unwrap();

        cache.put(Partition::Orig, "A", jpeg(1)).await.unwrap();
        cache.put(Partition::Orig, "B", jpeg(2)).await.unwrap();
        cache.put(Partition::Orig, "C", jpeg(3)).await.unwrap();
        cache.get(Partition::Orig, "A").await.unwrap();
        cache.put(Partition::Orig, "D", jpeg(4)).await.unwrap();

        let pruned = cache.enforce_bound().await.unwrap();
        assert_eq!(pruned.evicted, vec!["B", "C"]);
        assert!(cache.get(Partition::Orig, "A").await.unwrap().is_some());
        assert!(cache.get(Partition::Orig, "D").await.unwrap().is_some());
    }
    #[tokio::test]
    async fn test_corrupt_sled_entry_reads_as_miss() {
        let temp_dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(SledStorageFactory::new(temp_dir.path().join("media")).unwrap());
        let registry = CacheRegistry::new(factory.clone());
        let cache = BlobCacheService::open(
            &registry,
            MediaCacheSpec::photos().with_orig_max_entries(2),
        )
        .await
        .unwrap();

        let raw = factory.db().open_tree("photo-cache-v1/orig").unwrap();
        raw.insert("A", &b"\x00garbage"[..]).unwrap();

        assert!(cache.get(Partition::Orig, "A").await.unwrap().is_none());
        cache.put(Partition::Orig, "A", jpeg(1)).await.unwrap();
        assert_eq!(cache.get(Partition::Orig, "A").await.unwrap(), Some(jpeg(1)));

        raw.insert("Z", &b"\x00garbage"[..]).unwrap();
        cache.put(Partition::Orig, "B", jpeg(2)).await.unwrap();
        cache.put(Partition::Orig, "C", jpeg(3)).await.unwrap();
        let pruned = cache.enforce_bound().await.unwrap();
        assert_eq!(pruned.evicted, vec!["A"]);
        assert!(cache.get(Partition::Orig, "B").await.unwrap().is_some());
        assert!(cache.get(Partition::Orig, "C").await.unwrap().is_some());

        assert!(cache.delete(Partition::Orig, "Z").await.unwrap().deleted);
        assert!(cache.get(Partition::Orig, "Z").await.unwrap().is_none());
    }
}
