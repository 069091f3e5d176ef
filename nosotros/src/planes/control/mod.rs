pub mod operation;
pub mod registry;

pub use operation::PartitionAdmin;
pub use registry::CacheRegistry;
