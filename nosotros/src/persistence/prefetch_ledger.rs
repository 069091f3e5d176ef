use crate::domain::PrefetchKey;
use crate::ports::PrefetchLedger;
use async_trait::async_trait;
use moka::future::Cache;
use shared::{Error, Result};
use std::time::Duration;
use tracing::{debug, warn};

/// Guards only matter for the day they name; two days covers every time zone.
const GUARD_TTL: Duration = Duration::from_secs(48 * 60 * 60);

/// Process-local ledger; guards expire on their own.
pub struct MokaPrefetchLedger {
    done: Cache<String, ()>,
}

impl MokaPrefetchLedger {
    pub fn new() -> Self {
        Self {
            done: Cache::builder()
                .name("prefetch-ledger")
                .time_to_live(GUARD_TTL)
                .build(),
        }
    }
}

impl Default for MokaPrefetchLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PrefetchLedger for MokaPrefetchLedger {
    async fn is_done(&self, key: &PrefetchKey) -> Result<bool> {
        Ok(self.done.contains_key(&key.storage_key()))
    }

    async fn mark_done(&self, key: &PrefetchKey) -> Result<()> {
        self.done.insert(key.storage_key(), ()).await;
        Ok(())
    }
}

/// Ledger persisted next to the media cache so guards survive restarts.
///
/// Keys lead with the day so that guards of earlier days form one prefix
/// range, swept whenever a newer guard is written.
pub struct SledPrefetchLedger {
    tree: sled::Tree,
}

impl SledPrefetchLedger {
    const TREE: &'static str = "__prefetch";

    pub fn open(db: &sled::Db) -> Result<Self> {
        let tree = db.open_tree(Self::TREE).map_err(Error::storage)?;
        Ok(Self { tree })
    }

    fn tree_key(key: &PrefetchKey) -> String {
        format!("{}:{}:{}", key.day_key, key.session, key.item_id)
    }

    /// Drop every guard dated before `day_key`.
    fn sweep_before(&self, day_key: &str) -> Result<usize> {
        let mut swept = 0;
        for stale in self.tree.range::<&[u8], _>(..day_key.as_bytes()).keys() {
            let stale = stale.map_err(Error::storage)?;
            self.tree.remove(stale).map_err(Error::storage)?;
            swept += 1;
        }
        Ok(swept)
    }
}

#[async_trait]
impl PrefetchLedger for SledPrefetchLedger {
    async fn is_done(&self, key: &PrefetchKey) -> Result<bool> {
        self.tree
            .contains_key(Self::tree_key(key))
            .map_err(Error::storage)
    }

    async fn mark_done(&self, key: &PrefetchKey) -> Result<()> {
        self.tree
            .insert(Self::tree_key(key), &b"1"[..])
            .map_err(Error::storage)?;
        match self.sweep_before(&key.day_key) {
            Ok(0) => {}
            Ok(swept) => debug!(swept, day_key = %key.day_key, "Swept old prefetch guards"),
            Err(e) => warn!(error = %e, "Failed to sweep old prefetch guards"),
        }
        Ok(())
    }
}
