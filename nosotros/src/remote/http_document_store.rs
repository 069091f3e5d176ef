use crate::domain::{DailyPickRecord, ItemMeta};
use crate::ports::RemoteDocumentStore;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::{Error, Result};
use std::time::Duration;

/// Document store reached over a plain JSON REST surface:
///
/// - `GET    {base}/{collection}/{id}`               item metadata
/// - `GET    {base}/{collection}?orderBy=..&limit=..` listing, descending
/// - `PATCH  {base}/{collection}/{id}`               merge
/// - `GET|PUT {base}/daily/{session}`                shared daily pick
pub struct HttpDocumentStore {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpDocumentStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn url(&self, segments: &[&str]) -> String {
        let mut url = self.base_url.clone();
        for segment in segments.iter().flat_map(|s| s.split('/')) {
            url.push('/');
            url.push_str(&urlencoding::encode(segment));
        }
        url
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(self.timeout)
            } else {
                Error::Network(e.to_string())
            }
        })
    }

    /// `None` on 404, the decoded body on success.
    async fn read_optional<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Option<T>> {
        let response = self.send(request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success(response)?;
        let body = response
            .json()
            .await
            .map_err(|e| Error::Network(format!("invalid document: {}", e)))?;
        Ok(Some(body))
    }
}

fn ensure_success(response: Response) -> Result<Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(Error::Network(format!(
            "document store returned status {}",
            response.status()
        )))
    }
}

#[async_trait]
impl RemoteDocumentStore for HttpDocumentStore {
    async fn get_item_meta(&self, collection: &str, id: &str) -> Result<Option<ItemMeta>> {
        self.read_optional(self.client.get(self.url(&[collection, id])))
            .await
    }

    async fn list_items(&self, collection: &str, order_by: &str, limit: usize) -> Result<Vec<ItemMeta>> {
        let limit = limit.to_string();
        let request = self
            .client
            .get(self.url(&[collection]))
            .query(&[("orderBy", order_by), ("limit", limit.as_str())]);
        Ok(self.read_optional(request).await?.unwrap_or_default())
    }

    async fn set_item_meta(&self, collection: &str, id: &str, patch: ItemMeta) -> Result<()> {
        let request = self.client.patch(self.url(&[collection, id])).json(&patch);
        ensure_success(self.send(request).await?)?;
        Ok(())
    }

    async fn get_daily_pick(&self, session: &str) -> Result<Option<DailyPickRecord>> {
        self.read_optional(self.client.get(self.url(&["daily", session])))
            .await
    }

    async fn set_daily_pick(&self, session: &str, record: DailyPickRecord) -> Result<()> {
        let request = self.client.put(self.url(&["daily", session])).json(&record);
        ensure_success(self.send(request).await?)?;
        Ok(())
    }
}
