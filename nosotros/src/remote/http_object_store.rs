use crate::domain::Blob;
use crate::ports::RemoteObjectStore;
use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use shared::{Error, Result};
use std::time::Duration;
use tracing::debug;

/// Object-store metadata; only the download tokens matter here.
#[derive(Debug, Deserialize)]
struct ObjectMetadata {
    #[serde(rename = "downloadTokens", default)]
    download_tokens: Option<String>,
}

/// Bucket exposed over the `/o/{object}` REST shape.
pub struct HttpObjectStore {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpObjectStore {
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

    fn object_url(&self, path: &str) -> String {
        format!("{}/o/{}", self.base_url, urlencoding::encode(path))
    }

    fn media_url(&self, path: &str, token: &str) -> String {
        format!(
            "{}?alt=media&token={}",
            self.object_url(path),
            urlencoding::encode(token)
        )
    }

    fn transport_error(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout(self.timeout)
        } else {
            Error::Network(err.to_string())
        }
    }

    async fn media_url_from(&self, path: &str, response: reqwest::Response) -> Result<String> {
        let metadata: ObjectMetadata = response
            .json()
            .await
            .map_err(|e| self.transport_error(e))?;
        let token = metadata
            .download_tokens
            .as_deref()
            .and_then(|tokens| tokens.split(',').map(str::trim).find(|t| !t.is_empty()))
            .ok_or(Error::NotFound)?;
        Ok(self.media_url(path, token))
    }
}

#[async_trait]
impl RemoteObjectStore for HttpObjectStore {
    async fn fetch_asset(&self, url: &str) -> Result<Blob> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound);
        }
        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "asset fetch returned status {}",
                response.status()
            )));
        }

        let mime_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = response.bytes().await.map_err(|e| self.transport_error(e))?;
        debug!(size = bytes.len(), mime_type = %mime_type, "Fetched asset");
        Ok(Blob::new(bytes, mime_type))
    }

    async fn download_url(&self, path: &str) -> Result<String> {
        let response = self
            .client
            .get(self.object_url(path))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound);
        }
        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "object metadata returned status {}",
                response.status()
            )));
        }
        self.media_url_from(path, response).await
    }

    async fn put_asset(&self, path: &str, blob: Blob) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/o", self.base_url))
            .query(&[("name", path)])
            .header(header::CONTENT_TYPE, blob.mime_type.as_str())
            .body(blob.bytes)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "upload returned status {}",
                response.status()
            )));
        }
        self.media_url_from(path, response).await
    }
}
