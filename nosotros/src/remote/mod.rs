pub mod http_document_store;
pub mod http_object_store;

pub use http_document_store::HttpDocumentStore;
pub use http_object_store::HttpObjectStore;
