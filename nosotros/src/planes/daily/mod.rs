use crate::clock::ReferenceZone;
use crate::domain::{DailyPickRecord, PrefetchKey};
use crate::planes::data::MediaLibrary;
use crate::ports::{Clock, PrefetchLedger, RemoteDocumentStore};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Field the snapshot is ordered by, most recent first.
pub const SNAPSHOT_ORDER: &str = "createdAt";

/// Index into a snapshot of `len` items for `(session, day_key)`.
///
/// Pure function of its inputs: every participant computing it on the same
/// day gets the same index.
pub fn pick_index(session: &str, day_key: &str, len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    let digest = Sha256::digest(format!("{session}:{day_key}").as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    Some((u64::from_be_bytes(head) % len as u64) as usize)
}

/// Today's item of a session and its once-per-day prefetch.
pub struct DailyPickService {
    library: Arc<MediaLibrary>,
    documents: Arc<dyn RemoteDocumentStore>,
    ledger: Arc<dyn PrefetchLedger>,
    clock: Arc<dyn Clock>,
    zone: ReferenceZone,
    snapshot_size: usize,
    prefetch_timeout: Duration,
}

impl DailyPickService {
    pub fn new(
        library: Arc<MediaLibrary>,
        documents: Arc<dyn RemoteDocumentStore>,
        ledger: Arc<dyn PrefetchLedger>,
        clock: Arc<dyn Clock>,
        zone: ReferenceZone,
    ) -> Self {
        Self {
            library,
            documents,
            ledger,
            clock,
            zone,
            snapshot_size: 100,
            prefetch_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_snapshot_size(mut self, snapshot_size: usize) -> Self {
        self.snapshot_size = snapshot_size;
        self
    }

    pub fn with_prefetch_timeout(mut self, timeout: Duration) -> Self {
        self.prefetch_timeout = timeout;
        self
    }

    pub fn day_key(&self) -> String {
        self.zone.day_key(self.clock.now())
    }

    /// Id of today's item, or `None` when the collection is empty or unreachable.
    pub async fn get_daily_pick(&self, session: &str) -> Option<String> {
        let day_key = self.day_key();
        let collection = self.library.collection_path(session);

        if let Some(id) = self.reusable_pick(session, &collection, &day_key).await {
            return Some(id);
        }

        let snapshot = match self
            .documents
            .list_items(&collection, SNAPSHOT_ORDER, self.snapshot_size)
            .await
        {
            Ok(items) => items,
            Err(e) => {
                warn!(session, error = %e, "Failed to read daily pick snapshot");
                return None;
            }
        };

        let index = pick_index(session, &day_key, snapshot.len())?;
        let item_id = snapshot[index].id.clone();

        let record = DailyPickRecord {
            day_key: day_key.clone(),
            item_id: item_id.clone(),
        };
        if let Err(e) = self.documents.set_daily_pick(session, record).await {
            warn!(session, error = %e, "Failed to persist daily pick");
        }

        info!(session, day_key = %day_key, item_id = %item_id, "Picked daily item");
        Some(item_id)
    }

    /// Prefetch today's original into the bounded cache unless already done.
    /// Returns true only when this call completed the prefetch.
    pub async fn prefetch_once_per_day(&self, session: &str, item_id: &str) -> bool {
        let key = PrefetchKey::new(session, item_id, self.day_key());

        match self.ledger.is_done(&key).await {
            Ok(true) => {
                debug!(key = %key.storage_key(), "Prefetch already done today");
                return false;
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Failed to read prefetch guard"),
        }

        let fetched = tokio::time::timeout(
            self.prefetch_timeout,
            self.library.get_original(session, item_id),
        )
        .await;

        match fetched {
            Ok(Some(blob)) if !blob.is_trivial() => {
                if let Err(e) = self.ledger.mark_done(&key).await {
                    warn!(error = %e, "Failed to record prefetch guard");
                }
                true
            }
            Ok(_) => {
                debug!(item_id, "Prefetch produced nothing, will retry");
                false
            }
            Err(_) => {
                warn!(item_id, timeout = ?self.prefetch_timeout, "Prefetch timed out");
                false
            }
        }
    }

    async fn reusable_pick(&self, session: &str, collection: &str, day_key: &str) -> Option<String> {
        let record = match self.documents.get_daily_pick(session).await {
            Ok(Some(record)) if record.day_key == day_key => record,
            Ok(_) => return None,
            Err(e) => {
                warn!(session, error = %e, "Failed to read daily pick");
                return None;
            }
        };

        match self.documents.get_item_meta(collection, &record.item_id).await {
            Ok(Some(_)) => Some(record.item_id),
            Ok(None) => {
                debug!(item_id = %record.item_id, "Previous pick no longer exists");
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to verify previous pick");
                None
            }
        }
    }
}
