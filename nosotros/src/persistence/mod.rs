pub mod memory_store;
pub mod prefetch_ledger;
pub mod sled_store;

pub use memory_store::{MemoryPartition, MemoryStorageFactory};
pub use prefetch_ledger::{MokaPrefetchLedger, SledPrefetchLedger};
pub use sled_store::{SledPartition, SledStorageFactory};
