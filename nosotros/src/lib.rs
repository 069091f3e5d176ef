//! Offline media cache core.
//!
//! Two-tier local blob cache (unbounded thumbnails, LRU-bounded originals)
//! over pluggable storage, remote asset resolution, and the shared daily pick.

pub mod clock;
pub mod display;
pub mod domain;
pub mod events;
pub mod persistence;
pub mod planes;
pub mod ports;
pub mod remote;

#[cfg(test)]
pub(crate) mod testing;

pub use clock::{AccessClock, ReferenceZone, SystemClock};
pub use display::{DisplayHandle, DisplayRegistry};
pub use domain::{
    AssetLayout, AssetVariant, Blob, DailyPickRecord, ItemMeta, MediaCacheSpec, Partition,
    PrefetchKey, StoredRecord,
};
pub use events::CacheItemEvent;
pub use planes::control::{CacheRegistry, PartitionAdmin};
pub use planes::daily::DailyPickService;
pub use planes::data::{BlobCacheOperations, BlobCacheService, MediaLibrary};
