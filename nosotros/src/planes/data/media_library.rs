use crate::display::{DisplayHandle, DisplayRegistry};
use crate::domain::{AssetLayout, AssetVariant, Blob, ItemMeta, Partition, is_legacy_url};
use crate::planes::data::cache_operations::BlobCacheService;
use crate::planes::data::operation::BlobCacheOperations;
use crate::ports::{RemoteDocumentStore, RemoteObjectStore};
use shared::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Local-first access to one collection's assets.
///
/// Reads hit the cache first and fall back to the remote object store.
/// Cache failures never fail a read; the library just runs network-only.
#[derive(Clone)]
pub struct MediaLibrary {
    cache: BlobCacheService,
    layout: AssetLayout,
    objects: Arc<dyn RemoteObjectStore>,
    documents: Arc<dyn RemoteDocumentStore>,
    displays: DisplayRegistry,
    fetch_timeout: Duration,
}

impl MediaLibrary {
    pub fn new(
        cache: BlobCacheService,
        layout: AssetLayout,
        objects: Arc<dyn RemoteObjectStore>,
        documents: Arc<dyn RemoteDocumentStore>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            layout,
            objects,
            documents,
            displays: DisplayRegistry::new(),
            fetch_timeout,
        }
    }

    pub fn cache(&self) -> &BlobCacheService {
        &self.cache
    }

    pub fn displays(&self) -> &DisplayRegistry {
        &self.displays
    }

    pub fn collection_path(&self, session: &str) -> String {
        self.layout.collection_path(session)
    }

    /// Full-resolution asset, or `None` when it is not available offline.
    pub async fn get_original(&self, session: &str, id: &str) -> Option<Blob> {
        self.load(session, id, AssetVariant::Original).await
    }

    pub async fn get_thumbnail(&self, session: &str, id: &str) -> Option<Blob> {
        if !self.cache.spec().with_thumbs {
            return None;
        }
        self.load(session, id, AssetVariant::Thumbnail).await
    }

    /// A download URL that is known not to be stale.
    pub async fn get_original_url(&self, session: &str, id: &str) -> Option<String> {
        self.resolve_url(session, id, AssetVariant::Original).await
    }

    /// Drop every cached copy of an asset deleted upstream.
    pub async fn forget(&self, id: &str) -> bool {
        let mut partitions = vec![Partition::Orig];
        if self.cache.spec().with_thumbs {
            partitions.push(Partition::Thumbs);
        }

        let mut removed = false;
        for partition in partitions {
            match self.cache.delete(partition, id).await {
                Ok(response) => removed |= response.deleted,
                Err(e) => warn!(id, %partition, error = %e, "Failed to forget cached asset"),
            }
        }
        removed
    }

    /// Cache locally, upload, then record the URLs in the item's metadata.
    pub async fn publish(
        &self,
        session: &str,
        id: &str,
        original: Blob,
        thumbnail: Option<Blob>,
    ) -> Result<ItemMeta> {
        if original.is_trivial() {
            return Err(Error::InvalidInput(format!(
                "asset {id} is only {} bytes",
                original.len()
            )));
        }

        let mut patch = ItemMeta {
            created_at: Some(shared::now_millis()),
            ..ItemMeta::new(id)
        };

        self.remember(Partition::Orig, id, original.clone()).await;
        if let Some(path) = self.layout.asset_path(session, id, AssetVariant::Original) {
            patch.orig_url = Some(self.objects.put_asset(&path, original).await?);
        }

        if let Some(thumbnail) = thumbnail.filter(|_| self.cache.spec().with_thumbs) {
            self.remember(Partition::Thumbs, id, thumbnail.clone()).await;
            if let Some(path) = self.layout.asset_path(session, id, AssetVariant::Thumbnail) {
                patch.thumb_url = Some(self.objects.put_asset(&path, thumbnail).await?);
            }
        }

        self.documents
            .set_item_meta(&self.collection_path(session), id, patch.clone())
            .await?;
        info!(id, collection = %self.layout.collection, "Published asset");
        Ok(patch)
    }

    /// Load an asset and register it for display.
    pub async fn open_display(
        &self,
        session: &str,
        id: &str,
        variant: AssetVariant,
    ) -> Option<DisplayHandle> {
        let blob = match variant {
            AssetVariant::Original => self.get_original(session, id).await,
            AssetVariant::Thumbnail => self.get_thumbnail(session, id).await,
        }?;
        Some(self.displays.acquire(blob))
    }

    async fn load(&self, session: &str, id: &str, variant: AssetVariant) -> Option<Blob> {
        let partition = variant.partition();
        match self.cache.get(partition, id).await {
            Ok(Some(blob)) => return Some(blob),
            Ok(None) => {}
            Err(e) => warn!(id, %partition, error = %e, "Cache read failed, going to network"),
        }

        let url = self.resolve_url(session, id, variant).await?;
        let blob = match self.fetch(&url).await {
            Ok(blob) if !blob.is_trivial() => blob,
            Ok(blob) => {
                debug!(id, size = blob.len(), "Remote returned an undersized payload");
                return None;
            }
            Err(e) => {
                warn!(id, error = %e, "Asset not available offline");
                return None;
            }
        };

        self.remember(partition, id, blob.clone()).await;
        Some(blob)
    }

    /// Best-effort store, pruning `orig` afterwards.
    async fn remember(&self, partition: Partition, id: &str, blob: Blob) {
        if let Err(e) = self.cache.put(partition, id, blob).await {
            warn!(id, %partition, error = %e, "Failed to cache asset");
            return;
        }
        if partition.is_bounded() {
            if let Err(e) = self.cache.enforce_bound().await {
                warn!(%partition, error = %e, "Failed to prune cache");
            }
        }
    }

    async fn fetch(&self, url: &str) -> Result<Blob> {
        let mut blob = tokio::time::timeout(self.fetch_timeout, self.objects.fetch_asset(url))
            .await
            .map_err(|_| Error::Timeout(self.fetch_timeout))??;
        if blob.mime_type.is_empty() {
            blob.mime_type = self.cache.spec().default_mime.clone();
        }
        Ok(blob)
    }

    async fn resolve_url(&self, session: &str, id: &str, variant: AssetVariant) -> Option<String> {
        let collection = self.collection_path(session);
        let meta = match self.documents.get_item_meta(&collection, id).await {
            Ok(meta) => meta,
            Err(e) => {
                warn!(id, error = %e, "Failed to read item metadata");
                None
            }
        };

        if let Some(url) = meta.as_ref().and_then(|m| m.url(variant)) {
            if !is_legacy_url(url) {
                return Some(url.to_string());
            }
            debug!(id, "Stored URL is legacy, re-resolving");
        }

        let path = self.layout.asset_path(session, id, variant)?;
        let fresh = match self.objects.download_url(&path).await {
            Ok(url) => url,
            Err(e) => {
                warn!(id, path = %path, error = %e, "Failed to re-resolve asset URL");
                return None;
            }
        };

        if meta.is_some() {
            let mut patch = ItemMeta::new(id);
            match variant {
                AssetVariant::Original => patch.orig_url = Some(fresh.clone()),
                AssetVariant::Thumbnail => patch.thumb_url = Some(fresh.clone()),
            }
            if let Err(e) = self.documents.set_item_meta(&collection, id, patch).await {
                warn!(id, error = %e, "Failed to backfill resolved URL");
            }
        }

        Some(fresh)
    }
}
