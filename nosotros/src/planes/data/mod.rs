pub mod cache_operations;
pub mod media_library;
pub mod operation;

pub use cache_operations::BlobCacheService;
pub use media_library::MediaLibrary;
pub use operation::BlobCacheOperations;
