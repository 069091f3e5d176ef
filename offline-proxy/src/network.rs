use crate::mapping::is_hop_by_hop;
use async_trait::async_trait;
use interceptor::{FetchCacheMode, InterceptedRequest, Network, RequestMode, Response, ResponseKind};
use reqwest::{Client, Method};
use shared::{Error, Result};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// The real network. Same-origin traffic goes to the upstream application
/// server; everything else goes where its URL says.
pub struct ReqwestNetwork {
    client: Client,
    origin: Url,
    upstream: Url,
    timeout: Duration,
}

impl ReqwestNetwork {
    pub fn new(origin: Url, upstream: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            origin,
            upstream,
            timeout,
        })
    }

    fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }

    /// Where a request is actually sent.
    pub fn target(&self, url: &Url) -> Url {
        if !self.is_same_origin(url) {
            return url.clone();
        }
        let mut target = self.upstream.clone();
        target.set_path(url.path());
        target.set_query(url.query());
        target
    }

    fn kind(&self, request: &InterceptedRequest) -> ResponseKind {
        if self.is_same_origin(&request.url) {
            ResponseKind::Basic
        } else if request.mode == RequestMode::NoCors {
            ResponseKind::Opaque
        } else {
            ResponseKind::Cors
        }
    }
}

#[async_trait]
impl Network for ReqwestNetwork {
    async fn fetch(&self, request: &InterceptedRequest, cache_mode: FetchCacheMode) -> Result<Response> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| Error::InvalidInput(format!("bad method {}", request.method)))?;
        let target = self.target(&request.url);
        debug!(url = %request.url, target = %target, ?cache_mode, "Forwarding request");

        let mut builder = self.client.request(method, target);
        for (name, value) in &request.headers {
            if is_hop_by_hop(name) {
                continue;
            }
            if cache_mode == FetchCacheMode::Reload
                && (name.eq_ignore_ascii_case("cache-control") || name.eq_ignore_ascii_case("pragma"))
            {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        if cache_mode == FetchCacheMode::Reload {
            builder = builder
                .header("cache-control", "no-cache")
                .header("pragma", "no-cache");
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let upstream = builder.send().await.map_err(|e| self.error(e))?;
        let status = upstream.status().as_u16();
        let headers = upstream
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = upstream.bytes().await.map_err(|e| self.error(e))?;

        Ok(Response {
            status,
            headers,
            body,
            kind: self.kind(request),
        })
    }
}

impl ReqwestNetwork {
    fn error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(self.timeout)
        } else {
            Error::Network(e.to_string())
        }
    }
}
