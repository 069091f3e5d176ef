use crate::request::{InterceptedRequest, Response, ResponseKind};
use nosotros::domain::StoredRecord;
use nosotros::planes::control::{CacheRegistry, PartitionAdmin};
use nosotros::ports::PartitionStore;
use shared::{Error, Result, now_millis};
use std::sync::Arc;

const STATUS: &str = "status";
const KIND: &str = "kind";
const HEADERS: &str = "headers";

/// A named partition of whole HTTP responses keyed by URL.
///
/// Unlike the media caches there is no size floor here: a tiny stylesheet
/// is a perfectly good response.
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn PartitionStore>,
}

impl ResponseCache {
    pub async fn open(registry: &CacheRegistry, name: &str) -> Result<Self> {
        Ok(Self {
            store: registry.open(name).await?,
        })
    }

    pub fn name(&self) -> &str {
        self.store.name()
    }

    pub async fn match_request(&self, request: &InterceptedRequest) -> Result<Option<Response>> {
        self.match_key(&request.cache_key()).await
    }

    pub async fn match_key(&self, key: &str) -> Result<Option<Response>> {
        match self.store.get(key).await? {
            Some(record) => decode(record).map(Some),
            None => Ok(None),
        }
    }

    pub async fn put(&self, request: &InterceptedRequest, response: &Response) -> Result<()> {
        self.put_key(&request.cache_key(), response).await
    }

    pub async fn put_key(&self, key: &str, response: &Response) -> Result<()> {
        if response.is_error() {
            return Err(Error::InvalidInput(format!(
                "refusing to cache a network error for {key}"
            )));
        }
        self.store.put(key, encode(response, now_millis())?).await?;
        Ok(())
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        self.store.keys().await
    }
}

fn encode(response: &Response, ts: i64) -> Result<StoredRecord> {
    let headers = serde_json::to_string(&response.headers).map_err(Error::storage)?;
    let kind = serde_json::to_string(&response.kind).map_err(Error::storage)?;
    Ok(StoredRecord::new(
        response.body.to_vec(),
        response.header("content-type").unwrap_or_default(),
        ts,
    )
    .with_attribute(STATUS, response.status.to_string())
    .with_attribute(KIND, kind)
    .with_attribute(HEADERS, headers))
}

fn decode(record: StoredRecord) -> Result<Response> {
    let status = record
        .attributes
        .get(STATUS)
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(200);
    let kind = match record.attributes.get(KIND) {
        Some(raw) => serde_json::from_str(raw).map_err(Error::storage)?,
        None => ResponseKind::Basic,
    };
    let headers: Vec<(String, String)> = match record.attributes.get(HEADERS) {
        Some(raw) => serde_json::from_str(raw).map_err(Error::storage)?,
        None if !record.mime_type.is_empty() => {
            vec![("content-type".to_string(), record.mime_type.clone())]
        }
        None => Vec::new(),
    };
    Ok(Response {
        status,
        headers,
        body: record.data.into(),
        kind,
    })
}
