use crate::persistence::MemoryStorageFactory;
use crate::planes::control::operation::PartitionAdmin;
use crate::ports::{PartitionStore, StorageFactory};
use async_trait::async_trait;
use shared::Result;
use std::collections::{BTreeSet, HashMap};
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Registry of named partitions over one storage backend.
///
/// Handles are opened once and shared; dropping a partition through the
/// registry also evicts its cached handle.
#[derive(Clone)]
pub struct CacheRegistry {
    factory: Arc<dyn StorageFactory>,
    // Maps partition name -> open handle
    open: Arc<RwLock<HashMap<String, Arc<dyn PartitionStore>>>>,
}

impl Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("partitions", &"<RwLock<HashMap>>")
            .finish()
    }
}

impl CacheRegistry {
    pub fn new(factory: Arc<dyn StorageFactory>) -> Self {
        Self {
            factory,
            open: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registry over a volatile backend; used when persistent storage is unavailable.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorageFactory::new()))
    }

    /// Handle of an already-opened partition.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn PartitionStore>> {
        self.open.read().await.get(name).cloned()
    }
}

#[async_trait]
impl PartitionAdmin for CacheRegistry {
    async fn open(&self, name: &str) -> Result<Arc<dyn PartitionStore>> {
        if let Some(store) = self.get(name).await {
            return Ok(store);
        }

        let mut open = self.open.write().await;
        if let Some(store) = open.get(name) {
            return Ok(store.clone());
        }
        let store = self.factory.open_partition(name)?;
        open.insert(name.to_string(), store.clone());
        Ok(store)
    }

    async fn names(&self) -> Result<Vec<String>> {
        let mut names: BTreeSet<String> = self.factory.partition_names()?.into_iter().collect();
        names.extend(self.open.read().await.keys().cloned());
        Ok(names.into_iter().collect())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.names().await?.iter().any(|n| n == name))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let was_open = self.open.write().await.remove(name).is_some();
        let dropped = self.factory.drop_partition(name)?;
        Ok(was_open || dropped)
    }

    async fn retain_only(&self, keep: &[String]) -> Result<Vec<String>> {
        let mut dropped = Vec::new();
        for name in self.names().await? {
            if keep.iter().any(|k| k == &name) {
                continue;
            }
            if self.delete(&name).await? {
                info!(partition = %name, "Deleted stale partition");
                dropped.push(name);
            }
        }
        Ok(dropped)
    }
}
