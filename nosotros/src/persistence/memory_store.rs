use crate::domain::StoredRecord;
use crate::domain::response::{DeleteResponse, PutResponse};
use crate::ports::{PartitionStore, StorageFactory};
use async_trait::async_trait;
use parking_lot::RwLock;
use shared::Result;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// In-process factory with the same semantics as the sled backend.
/// Used when the on-disk database cannot be opened, and in tests.
#[derive(Default)]
pub struct MemoryStorageFactory {
    partitions: RwLock<HashMap<String, Arc<MemoryPartition>>>,
}

impl MemoryStorageFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageFactory for MemoryStorageFactory {
    fn open_partition(&self, name: &str) -> Result<Arc<dyn PartitionStore>> {
        let mut partitions = self.partitions.write();
        let partition = partitions
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryPartition::new(name)))
            .clone();
        Ok(partition)
    }

    fn partition_names(&self) -> Result<Vec<String>> {
        Ok(self.partitions.read().keys().cloned().collect())
    }

    fn drop_partition(&self, name: &str) -> Result<bool> {
        Ok(self.partitions.write().remove(name).is_some())
    }
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, StoredRecord>,
    by_access: BTreeSet<(i64, String)>,
}

pub struct MemoryPartition {
    name: String,
    inner: RwLock<Inner>,
}

impl MemoryPartition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(Inner::default()),
        }
    }
}

#[async_trait]
impl PartitionStore for MemoryPartition {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, id: &str) -> Result<Option<StoredRecord>> {
        Ok(self.inner.read().records.get(id).cloned())
    }

    async fn put(&self, id: &str, record: StoredRecord) -> Result<PutResponse> {
        let mut inner = self.inner.write();
        let at = record.last_accessed;
        let previous = inner.records.insert(id.to_string(), record);
        if let Some(previous) = &previous {
            inner
                .by_access
                .remove(&(previous.last_accessed, id.to_string()));
        }
        inner.by_access.insert((at, id.to_string()));
        Ok(PutResponse::new(true, previous.is_none()))
    }

    async fn touch(&self, id: &str, at: i64) -> Result<bool> {
        let mut inner = self.inner.write();
        let Some(record) = inner.records.get_mut(id) else {
            return Ok(false);
        };
        let previous = std::mem::replace(&mut record.last_accessed, at);
        inner.by_access.remove(&(previous, id.to_string()));
        inner.by_access.insert((at, id.to_string()));
        Ok(true)
    }

    async fn delete(&self, id: &str) -> Result<DeleteResponse> {
        let mut inner = self.inner.write();
        match inner.records.remove(id) {
            Some(record) => {
                inner.by_access.remove(&(record.last_accessed, id.to_string()));
                Ok(DeleteResponse::new(true))
            }
            None => Ok(DeleteResponse::new(false)),
        }
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.inner.read().records.len())
    }

    async fn oldest(&self, limit: usize) -> Result<Vec<String>> {
        Ok(self
            .inner
            .read()
            .by_access
            .iter()
            .take(limit)
            .map(|(_, id)| id.clone())
            .collect())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.inner.read().records.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_overwrite_with_same_timestamp_keeps_index() {
        let part = MemoryPartition::new("orig");
        part.put("A", StoredRecord::new(vec![0u8; 40], "x", 5)).await.unwrap();
        part.put("A", StoredRecord::new(vec![1u8; 40], "x", 5)).await.unwrap();
        assert_eq!(part.oldest(5).await.unwrap(), vec!["A"]);
        assert_eq!(part.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_memory_touch_reorders() {
        let part = MemoryPartition::new("orig");
        part.put("A", StoredRecord::new(vec![0u8; 40], "x", 1)).await.unwrap();
        part.put("B", StoredRecord::new(vec![0u8; 40], "x", 2)).await.unwrap();
        assert!(part.touch("A", 3).await.unwrap());
        assert_eq!(part.oldest(2).await.unwrap(), vec!["B", "A"]);
        assert_eq!(part.get("A").await.unwrap().unwrap().last_accessed, 3);
    }

    #[tokio::test]
    async fn test_memory_factory_shares_partitions_by_name() {
        let factory = MemoryStorageFactory::new();
        let a = factory.open_partition("runtime-v1").unwrap();
        a.put("k", StoredRecord::new(vec![0u8; 40], "x", 1)).await.unwrap();

        let again = factory.open_partition("runtime-v1").unwrap();
        assert!(again.get("k").await.unwrap().is_some());

        assert!(factory.drop_partition("runtime-v1").unwrap());
        assert!(factory.partition_names().unwrap().is_empty());
    }
}
