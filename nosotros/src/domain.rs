use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Payloads below this size are treated as absent. Some storage layers hand
/// back empty blobs for records that were written fine, so "present but
/// tiny" and "missing" must look the same to callers.
pub const MIN_BLOB_BYTES: usize = 32;

/// Default bound of the `orig` partition.
pub const DEFAULT_ORIG_MAX_ENTRIES: usize = 20;

/// Binary content plus the MIME type needed to reconstitute it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Blob {
    pub bytes: Bytes,
    pub mime_type: String,
}

impl Blob {
    pub fn new(bytes: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// True when the payload is below [`MIN_BLOB_BYTES`].
    pub fn is_trivial(&self) -> bool {
        self.bytes.len() < MIN_BLOB_BYTES
    }
}

/// What a partition actually persists for an id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
    #[serde(rename = "type", default)]
    pub mime_type: String,
    #[serde(rename = "ts")]
    pub last_accessed: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl StoredRecord {
    pub fn new(data: impl Into<Vec<u8>>, mime_type: impl Into<String>, last_accessed: i64) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
            last_accessed,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// The two partitions of a media cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Partition {
    /// Unbounded, no eviction.
    Thumbs,
    /// LRU-bounded by entry count.
    Orig,
}

impl Partition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Thumbs => "thumbs",
            Partition::Orig => "orig",
        }
    }

    pub fn is_bounded(&self) -> bool {
        matches!(self, Partition::Orig)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of one media cache instance.
#[derive(Clone, Debug)]
pub struct MediaCacheSpec {
    pub database: String,
    pub default_mime: String,
    pub with_thumbs: bool,
    pub orig_max_entries: usize,
}

impl MediaCacheSpec {
    pub fn photos() -> Self {
        Self {
            database: "photo-cache-v1".to_string(),
            default_mime: "image/jpeg".to_string(),
            with_thumbs: true,
            orig_max_entries: DEFAULT_ORIG_MAX_ENTRIES,
        }
    }

    pub fn audio() -> Self {
        Self {
            database: "audio-cache-v1".to_string(),
            default_mime: "audio/mpeg".to_string(),
            with_thumbs: false,
            orig_max_entries: DEFAULT_ORIG_MAX_ENTRIES,
        }
    }

    pub fn with_orig_max_entries(mut self, max: usize) -> Self {
        self.orig_max_entries = max;
        self
    }

    pub fn partition_name(&self, partition: Partition) -> String {
        format!("{}/{}", self.database, partition)
    }
}

pub mod response {
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct PutResponse {
        /// False when the payload was rejected by the size floor.
        pub stored: bool,
        /// True when no previous entry existed for the id.
        pub created: bool,
    }

    impl PutResponse {
        pub fn new(stored: bool, created: bool) -> Self {
            Self { stored, created }
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct DeleteResponse {
        pub deleted: bool,
    }

    impl DeleteResponse {
        pub fn new(deleted: bool) -> Self {
            Self { deleted }
        }
    }

    #[derive(Clone, Debug, Default, PartialEq, Eq)]
    pub struct PruneResponse {
        pub evicted: Vec<String>,
    }

    impl PruneResponse {
        pub fn new(evicted: Vec<String>) -> Self {
            Self { evicted }
        }
    }
}

/// Remote metadata for one item of a collection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemMeta {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orig_url: Option<String>,
}

impl ItemMeta {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Merge semantics: fields set in `patch` win, unset fields are kept.
    pub fn merge(&mut self, patch: ItemMeta) {
        if patch.created_at.is_some() {
            self.created_at = patch.created_at;
        }
        if patch.thumb_url.is_some() {
            self.thumb_url = patch.thumb_url;
        }
        if patch.orig_url.is_some() {
            self.orig_url = patch.orig_url;
        }
    }

    pub fn url(&self, variant: AssetVariant) -> Option<&str> {
        match variant {
            AssetVariant::Thumbnail => self.thumb_url.as_deref(),
            AssetVariant::Original => self.orig_url.as_deref(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetVariant {
    Thumbnail,
    Original,
}

impl AssetVariant {
    pub fn partition(&self) -> Partition {
        match self {
            AssetVariant::Thumbnail => Partition::Thumbs,
            AssetVariant::Original => Partition::Orig,
        }
    }
}

/// Where a collection's assets live in the remote object store.
#[derive(Clone, Debug)]
pub struct AssetLayout {
    pub collection: String,
    pub orig_file: String,
    pub thumb_file: Option<String>,
}

impl AssetLayout {
    pub fn photos() -> Self {
        Self {
            collection: "photos".to_string(),
            orig_file: "orig.jpg".to_string(),
            thumb_file: Some("thumb.jpg".to_string()),
        }
    }

    pub fn music() -> Self {
        Self {
            collection: "music".to_string(),
            orig_file: "orig".to_string(),
            thumb_file: None,
        }
    }

    pub fn collection_path(&self, session: &str) -> String {
        format!("pairs/{}/{}", session, self.collection)
    }

    pub fn asset_path(&self, session: &str, id: &str, variant: AssetVariant) -> Option<String> {
        let file = match variant {
            AssetVariant::Original => Some(self.orig_file.as_str()),
            AssetVariant::Thumbnail => self.thumb_file.as_deref(),
        }?;
        Some(format!("{}/{}/{}", self.collection_path(session), id, file))
    }
}

/// Download URLs minted by older deployments stop working; they are detected
/// by shape and re-resolved instead of fetched.
pub fn is_legacy_url(url: &str) -> bool {
    url.contains(".appspot.com/") || !url.contains("alt=media")
}

/// The shared `(dayKey, chosenId)` record of a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyPickRecord {
    pub day_key: String,
    pub item_id: String,
}

/// Guard key for the once-per-day prefetch.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PrefetchKey {
    pub session: String,
    pub item_id: String,
    pub day_key: String,
}

impl PrefetchKey {
    pub fn new(session: impl Into<String>, item_id: impl Into<String>, day_key: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            item_id: item_id.into(),
            day_key: day_key.into(),
        }
    }

    pub fn storage_key(&self) -> String {
        format!("prefetch:{}:{}:{}", self.session, self.item_id, self.day_key)
    }
}
