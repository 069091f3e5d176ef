use crate::domain::StoredRecord;
use crate::domain::response::{DeleteResponse, PutResponse};
use crate::ports::{PartitionStore, StorageFactory};
use async_trait::async_trait;
use shared::{Error, Result};
use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionError};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Suffix of the secondary tree ordering a partition by `last_accessed`.
const ACCESS_INDEX_SUFFIX: &str = "#lru";
/// Trees with this prefix are internal (sled's default tree, the prefetch ledger).
const RESERVED_PREFIX: &str = "__";

/// Sled-backed factory; every partition is a tree plus an access-order index tree
pub struct SledStorageFactory {
    db: sled::Db,
}

impl SledStorageFactory {
    /// Open (or create) the database, creating the parent directory if needed
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::storage(format!("Failed to create directory: {}", e)))?;
        }

        let db = sled::open(path)
            .map_err(|e| Error::storage(format!("Failed to open Sled database: {}", e)))?;

        Ok(Self { db })
    }

    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    pub fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| Error::storage(format!("Failed to flush database: {}", e)))?;
        Ok(())
    }
}

impl StorageFactory for SledStorageFactory {
    fn open_partition(&self, name: &str) -> Result<Arc<dyn PartitionStore>> {
        Ok(Arc::new(SledPartition::open(&self.db, name)?))
    }

    fn partition_names(&self) -> Result<Vec<String>> {
        let names = self
            .db
            .tree_names()
            .into_iter()
            .filter_map(|raw| String::from_utf8(raw.to_vec()).ok())
            .filter(|name| !name.starts_with(RESERVED_PREFIX))
            .filter(|name| !name.ends_with(ACCESS_INDEX_SUFFIX))
            .collect();
        Ok(names)
    }

    fn drop_partition(&self, name: &str) -> Result<bool> {
        let dropped = self.db.drop_tree(name).map_err(Error::storage)?;
        self.db
            .drop_tree(index_tree_name(name))
            .map_err(Error::storage)?;
        Ok(dropped)
    }
}

fn index_tree_name(name: &str) -> String {
    format!("{}{}", name, ACCESS_INDEX_SUFFIX)
}

/// Index key: big-endian timestamp then id, so iteration order is access order.
fn access_key(at: i64, id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + id.len());
    key.extend_from_slice(&(at.max(0) as u64).to_be_bytes());
    key.extend_from_slice(id.as_bytes());
    key
}

fn decode(raw: &[u8]) -> std::result::Result<StoredRecord, serde_json::Error> {
    serde_json::from_slice(raw)
}

/// What a write found under the id it replaced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Previous {
    Absent,
    Indexed,
    /// Undecodable; its index entry (if any) is unknown.
    Corrupt,
}

fn transaction_error(err: TransactionError<serde_json::Error>) -> Error {
    match err {
        TransactionError::Abort(e) => Error::storage(format!("Corrupt record: {}", e)),
        TransactionError::Storage(e) => Error::storage(e),
    }
}

pub struct SledPartition {
    name: String,
    records: sled::Tree,
    by_access: sled::Tree,
}

impl SledPartition {
    pub fn open(db: &sled::Db, name: &str) -> Result<Self> {
        let records = db.open_tree(name).map_err(Error::storage)?;
        let by_access = db
            .open_tree(index_tree_name(name))
            .map_err(Error::storage)?;
        Ok(Self {
            name: name.to_string(),
            records,
            by_access,
        })
    }

    /// Remove every index entry pointing at `id` except `keep`.
    fn drop_index_entries(&self, id: &str, keep: Option<&[u8]>) -> Result<()> {
        let mut stale = Vec::new();
        for item in self.by_access.iter() {
            let (key, value) = item.map_err(Error::storage)?;
            if &value[..] == id.as_bytes() && Some(&key[..]) != keep {
                stale.push(key);
            }
        }
        for key in stale {
            self.by_access.remove(key).map_err(Error::storage)?;
        }
        Ok(())
    }

    fn repair_index(&self, id: &str, keep: Option<&[u8]>) {
        warn!(partition = %self.name, id, "Dropped corrupt record");
        if let Err(e) = self.drop_index_entries(id, keep) {
            warn!(partition = %self.name, id, error = %e, "Failed to clean access index");
        }
    }
}

#[async_trait]
impl PartitionStore for SledPartition {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, id: &str) -> Result<Option<StoredRecord>> {
        match self.records.get(id.as_bytes()).map_err(Error::storage)? {
            Some(raw) => match decode(&raw) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    warn!(partition = %self.name, id, error = %e, "Discarding corrupt record");
                    // Only if nobody rewrote it meanwhile.
                    match self.records.compare_and_swap(id.as_bytes(), Some(raw), None::<&[u8]>) {
                        Ok(Ok(())) => self.repair_index(id, None),
                        Ok(Err(_)) => {}
                        Err(e) => warn!(partition = %self.name, id, error = %e, "Failed to discard corrupt record"),
                    }
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn put(&self, id: &str, record: StoredRecord) -> Result<PutResponse> {
        let encoded = serde_json::to_vec(&record)
            .map_err(|e| Error::storage(format!("Failed to serialize record: {}", e)))?;
        let index_key = access_key(record.last_accessed, id);

        let previous = (&self.records, &self.by_access)
            .transaction(
                |(records, by_access)| -> ConflictableTransactionResult<Previous, serde_json::Error> {
                    let previous = match records.insert(id.as_bytes(), encoded.as_slice())? {
                        None => Previous::Absent,
                        Some(raw) => match decode(&raw) {
                            Ok(previous) => {
                                by_access.remove(access_key(previous.last_accessed, id))?;
                                Previous::Indexed
                            }
                            Err(_) => Previous::Corrupt,
                        },
                    };
                    by_access.insert(index_key.as_slice(), id.as_bytes())?;
                    Ok(previous)
                },
            )
            .map_err(transaction_error)?;
        if previous == Previous::Corrupt {
            self.repair_index(id, Some(index_key.as_slice()));
        }
        let existed = previous == Previous::Indexed;

        debug!(partition = %self.name, id, existed, "Stored record");
        Ok(PutResponse::new(true, !existed))
    }

    async fn touch(&self, id: &str, at: i64) -> Result<bool> {
        let previous = (&self.records, &self.by_access)
            .transaction(
                |(records, by_access)| -> ConflictableTransactionResult<Previous, serde_json::Error> {
                    let Some(raw) = records.get(id.as_bytes())? else {
                        return Ok(Previous::Absent);
                    };
                    let Ok(mut record) = decode(&raw) else {
                        records.remove(id.as_bytes())?;
                        return Ok(Previous::Corrupt);
                    };
                    by_access.remove(access_key(record.last_accessed, id))?;
                    record.last_accessed = at;
                    let encoded =
                        serde_json::to_vec(&record).map_err(ConflictableTransactionError::Abort)?;
                    records.insert(id.as_bytes(), encoded)?;
                    by_access.insert(access_key(at, id), id.as_bytes())?;
                    Ok(Previous::Indexed)
                },
            )
            .map_err(transaction_error)?;
        if previous == Previous::Corrupt {
            self.repair_index(id, None);
        }
        Ok(previous == Previous::Indexed)
    }

    async fn delete(&self, id: &str) -> Result<DeleteResponse> {
        let previous = (&self.records, &self.by_access)
            .transaction(
                |(records, by_access)| -> ConflictableTransactionResult<Previous, serde_json::Error> {
                    let Some(raw) = records.remove(id.as_bytes())? else {
                        return Ok(Previous::Absent);
                    };
                    let Ok(record) = decode(&raw) else {
                        return Ok(Previous::Corrupt);
                    };
                    by_access.remove(access_key(record.last_accessed, id))?;
                    Ok(Previous::Indexed)
                },
            )
            .map_err(transaction_error)?;
        if previous == Previous::Corrupt {
            self.repair_index(id, None);
        }
        Ok(DeleteResponse::new(previous != Previous::Absent))
    }

    /// Indexed records only; a corrupt record without an index entry is a miss.
    async fn count(&self) -> Result<usize> {
        Ok(self.by_access.len())
    }

    async fn oldest(&self, limit: usize) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(limit);
        for item in self.by_access.iter().values().take(limit) {
            let raw = item.map_err(Error::storage)?;
            ids.push(String::from_utf8_lossy(&raw).into_owned());
        }
        Ok(ids)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for item in self.records.iter().keys() {
            let raw = item.map_err(Error::storage)?;
            ids.push(String::from_utf8_lossy(&raw).into_owned());
        }
        Ok(ids)
    }
}
