//! In-process fakes of the remote ports.

use crate::domain::response::{DeleteResponse, PutResponse};
use crate::domain::{Blob, DailyPickRecord, ItemMeta, StoredRecord};
use crate::ports::{Clock, PartitionStore, RemoteDocumentStore, RemoteObjectStore, StorageFactory};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use shared::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const FILES: &str = "https://files.test";

/// Object store where every known path has a fresh `alt=media` URL.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Blob>>,
    paths: Mutex<HashSet<String>>,
    fetches: AtomicUsize,
    resolves: AtomicUsize,
    failures_left: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh_url(path: &str) -> String {
        format!("{FILES}/{path}?alt=media&token=fresh")
    }

    /// Serve `blob` at `url` without registering a path.
    pub fn serve(&self, url: &str, blob: Blob) {
        self.objects.lock().insert(url.to_string(), blob);
    }

    /// Register `path` and serve `blob` at its fresh URL.
    pub fn add_path(&self, path: &str, blob: Blob) -> String {
        let url = Self::fresh_url(path);
        self.paths.lock().insert(path.to_string());
        self.serve(&url, blob);
        url
    }

    /// Delete the object stored under `path`, as an upstream delete would.
    pub fn remove_path(&self, path: &str) {
        self.paths.lock().remove(path);
        self.objects.lock().remove(&Self::fresh_url(path));
    }

    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn resolves(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteObjectStore for MemoryObjectStore {
    async fn fetch_asset(&self, url: &str) -> Result<Blob> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Network("connection reset".into()));
        }
        self.objects.lock().get(url).cloned().ok_or(Error::NotFound)
    }

    async fn download_url(&self, path: &str) -> Result<String> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        if self.paths.lock().contains(path) {
            Ok(Self::fresh_url(path))
        } else {
            Err(Error::NotFound)
        }
    }

    async fn put_asset(&self, path: &str, blob: Blob) -> Result<String> {
        Ok(self.add_path(path, blob))
    }
}

#[derive(Default)]
pub struct MemoryDocumentStore {
    items: Mutex<HashMap<String, Vec<ItemMeta>>>,
    picks: Mutex<HashMap<String, DailyPickRecord>>,
    meta_writes: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, collection: &str, meta: ItemMeta) {
        self.items
            .lock()
            .entry(collection.to_string())
            .or_default()
            .push(meta);
    }

    pub fn remove(&self, collection: &str, id: &str) {
        if let Some(items) = self.items.lock().get_mut(collection) {
            items.retain(|m| m.id != id);
        }
    }

    /// Rotate the underlying order; listing still sorts by `createdAt`.
    pub fn reverse(&self, collection: &str) {
        if let Some(items) = self.items.lock().get_mut(collection) {
            items.reverse();
        }
    }

    pub fn meta(&self, collection: &str, id: &str) -> Option<ItemMeta> {
        self.items
            .lock()
            .get(collection)
            .and_then(|items| items.iter().find(|m| m.id == id).cloned())
    }

    pub fn pick(&self, session: &str) -> Option<DailyPickRecord> {
        self.picks.lock().get(session).cloned()
    }

    pub fn meta_writes(&self) -> usize {
        self.meta_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteDocumentStore for MemoryDocumentStore {
    async fn get_item_meta(&self, collection: &str, id: &str) -> Result<Option<ItemMeta>> {
        Ok(self.meta(collection, id))
    }

    async fn list_items(&self, collection: &str, order_by: &str, limit: usize) -> Result<Vec<ItemMeta>> {
        if order_by != "createdAt" {
            return Err(Error::InvalidInput(format!("unsupported order {order_by}")));
        }
        let mut items = self.items.lock().get(collection).cloned().unwrap_or_default();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        items.truncate(limit);
        Ok(items)
    }

    async fn set_item_meta(&self, collection: &str, id: &str, patch: ItemMeta) -> Result<()> {
        self.meta_writes.fetch_add(1, Ordering::SeqCst);
        let mut items = self.items.lock();
        let items = items.entry(collection.to_string()).or_default();
        match items.iter_mut().find(|m| m.id == id) {
            Some(existing) => existing.merge(patch),
            None => {
                let mut meta = ItemMeta::new(id);
                meta.merge(patch);
                items.push(meta);
            }
        }
        Ok(())
    }

    async fn get_daily_pick(&self, session: &str) -> Result<Option<DailyPickRecord>> {
        Ok(self.pick(session))
    }

    async fn set_daily_pick(&self, session: &str, record: DailyPickRecord) -> Result<()> {
        self.picks.lock().insert(session.to_string(), record);
        Ok(())
    }
}

pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Backend that refuses everything, like a device out of quota.
pub struct UnavailableStorage;

impl StorageFactory for UnavailableStorage {
    fn open_partition(&self, _name: &str) -> Result<Arc<dyn PartitionStore>> {
        Ok(Arc::new(UnavailablePartition))
    }

    fn partition_names(&self) -> Result<Vec<String>> {
        Err(Error::storage("quota exceeded"))
    }

    fn drop_partition(&self, _name: &str) -> Result<bool> {
        Err(Error::storage("quota exceeded"))
    }
}

pub struct UnavailablePartition;

#[async_trait]
impl PartitionStore for UnavailablePartition {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn get(&self, _id: &str) -> Result<Option<StoredRecord>> {
        Err(Error::storage("quota exceeded"))
    }

    async fn put(&self, _id: &str, _record: StoredRecord) -> Result<PutResponse> {
        Err(Error::storage("quota exceeded"))
    }

    async fn touch(&self, _id: &str, _at: i64) -> Result<bool> {
        Err(Error::storage("quota exceeded"))
    }

    async fn delete(&self, _id: &str) -> Result<DeleteResponse> {
        Err(Error::storage("quota exceeded"))
    }

    async fn count(&self) -> Result<usize> {
        Err(Error::storage("quota exceeded"))
    }

    async fn oldest(&self, _limit: usize) -> Result<Vec<String>> {
        Err(Error::storage("quota exceeded"))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Err(Error::storage("quota exceeded"))
    }
}
