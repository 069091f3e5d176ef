use crate::request::{InterceptedRequest, Response};
use async_trait::async_trait;
use shared::Result;

/// How an outgoing fetch treats intermediate HTTP caches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchCacheMode {
    Default,
    /// Bypass every intermediate cache.
    Reload,
}

/// The real network behind the interceptor.
///
/// `Err` means the request never produced a response (offline, DNS, reset).
/// HTTP error statuses are `Ok` responses.
#[async_trait]
pub trait Network: Send + Sync + 'static {
    async fn fetch(&self, request: &InterceptedRequest, cache_mode: FetchCacheMode) -> Result<Response>;
}
