use crate::handlers;
use crate::state::AppState;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::normalize_path::NormalizePathLayer;
use tower_http::trace::TraceLayer;

/// Build and configure the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Interceptor control
        .route("/__worker/status", get(handlers::worker_status))
        .route("/__worker/message", post(handlers::post_message))
        .route("/__worker/push", post(handlers::push_received))
        .route(
            "/__worker/pushsubscriptionchange",
            post(handlers::subscription_changed),
        )
        // Media cache
        .route("/__media/events", get(handlers::stream_events))
        .route(
            "/__media/{kind}/{session}/{id}/{variant}",
            get(handlers::get_asset),
        )
        .route("/__media/{kind}/{id}", delete(handlers::forget_asset))
        .route("/__daily/{session}", get(handlers::daily_pick))
        // Everything else is the application itself
        .fallback(handlers::intercept)
        // Middleware
        .layer(NormalizePathLayer::trim_trailing_slash())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Backends;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use bytes::Bytes;
    use interceptor::{FetchCacheMode, InterceptedRequest, Network, Response};
    use nosotros::persistence::MokaPrefetchLedger;
    use nosotros::ports::{RemoteDocumentStore, RemoteObjectStore};
    use nosotros::{Blob, CacheRegistry, DailyPickRecord, ItemMeta};
    use shared::config::Config;
    use shared::{Error, Result};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    const ORIG_URL: &str = "https://firebasestorage.googleapis.com/v0/b/x/o/a.jpg?alt=media";

    #[derive(Default)]
    struct StubNetwork {
        routes: Mutex<HashMap<String, Response>>,
        offline: AtomicBool,
        seen: Mutex<Vec<String>>,
    }

    impl StubNetwork {
        fn serve(&self, url: &str, response: Response) {
            self.routes.lock().unwrap().insert(url.to_string(), response);
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Network for StubNetwork {
        async fn fetch(&self, request: &InterceptedRequest, _mode: FetchCacheMode) -> Result<Response> {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{} {}", request.method, request.url));
            if self.offline.load(Ordering::SeqCst) {
                return Err(Error::Network("offline".into()));
            }
            Ok(self
                .routes
                .lock()
                .unwrap()
                .get(request.url.as_str())
                .cloned()
                .unwrap_or_else(|| Response::new(404, Bytes::new())))
        }
    }

    #[derive(Default)]
    struct StubObjects {
        assets: Mutex<HashMap<String, Blob>>,
    }

    #[async_trait]
    impl RemoteObjectStore for StubObjects {
        async fn fetch_asset(&self, url: &str) -> Result<Blob> {
            self.assets
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| Error::Network(format!("no asset at {url}")))
        }

        async fn download_url(&self, _path: &str) -> Result<String> {
            Err(Error::NotFound)
        }

        async fn put_asset(&self, path: &str, blob: Blob) -> Result<String> {
            let url = format!("https://files.test/{path}?alt=media");
            self.assets.lock().unwrap().insert(url.clone(), blob);
            Ok(url)
        }
    }

    #[derive(Default)]
    struct StubDocuments {
        items: Mutex<HashMap<String, Vec<ItemMeta>>>,
        picks: Mutex<HashMap<String, DailyPickRecord>>,
    }

    #[async_trait]
    impl RemoteDocumentStore for StubDocuments {
        async fn get_item_meta(&self, collection: &str, id: &str) -> Result<Option<ItemMeta>> {
            Ok(self
                .items
                .lock()
                .unwrap()
                .get(collection)
                .and_then(|items| items.iter().find(|m| m.id == id).cloned()))
        }

        async fn list_items(&self, collection: &str, _order_by: &str, limit: usize) -> Result<Vec<ItemMeta>> {
            let items = self.items.lock().unwrap();
            Ok(items
                .get(collection)
                .map(|items| items.iter().take(limit).cloned().collect())
                .unwrap_or_default())
        }

        async fn set_item_meta(&self, collection: &str, id: &str, patch: ItemMeta) -> Result<()> {
            let mut items = self.items.lock().unwrap();
            let list = items.entry(collection.to_string()).or_default();
            match list.iter_mut().find(|m| m.id == id) {
                Some(meta) => meta.merge(patch),
                None => list.push(patch),
            }
            Ok(())
        }

        async fn get_daily_pick(&self, session: &str) -> Result<Option<DailyPickRecord>> {
            Ok(self.picks.lock().unwrap().get(session).cloned())
        }

        async fn set_daily_pick(&self, session: &str, record: DailyPickRecord) -> Result<()> {
            self.picks.lock().unwrap().insert(session.to_string(), record);
            Ok(())
        }
    }

    struct Harness {
        state: AppState,
        network: Arc<StubNetwork>,
        objects: Arc<StubObjects>,
        documents: Arc<StubDocuments>,
    }

    impl Harness {
        fn router(&self) -> Router {
            build_router(self.state.clone())
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, Bytes) {
            let response = self.router().oneshot(request).await.unwrap();
            let status = response.status();
            let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            (status, body)
        }

        async fn get(&self, uri: &str) -> (StatusCode, Bytes) {
            self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
        }

        async fn json(&self, request: Request<Body>) -> serde_json::Value {
            let (status, body) = self.send(request).await;
            assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
            serde_json::from_slice(&body).unwrap()
        }
    }

    fn with_photo(documents: &StubDocuments, objects: &StubObjects, id: &str) {
        let url = format!("{ORIG_URL}&id={id}");
        documents.items.lock().unwrap().entry("pairs/p1/photos".into()).or_default().push(ItemMeta {
            created_at: Some(1),
            orig_url: Some(url.clone()),
            ..ItemMeta::new(id)
        });
        objects
            .assets
            .lock()
            .unwrap()
            .insert(url, Blob::new(vec![7u8; 2048], "image/jpeg"));
    }

    async fn harness() -> Harness {
        let config = Config::default();
        let network = Arc::new(StubNetwork::default());
        for path in ["/", "/index.html", "/manifest.json"] {
            network.serve(
                &format!("http://localhost:8787{path}"),
                Response::ok(format!("shell {path}"), "text/html"),
            );
        }
        let objects = Arc::new(StubObjects::default());
        let documents = Arc::new(StubDocuments::default());

        let state = AppState::from_backends(
            &config,
            Backends {
                media_registry: CacheRegistry::in_memory(),
                interceptor_registry: CacheRegistry::in_memory(),
                ledger: Arc::new(MokaPrefetchLedger::new()),
                network: network.clone(),
                objects: objects.clone(),
                documents: documents.clone(),
            },
        )
        .await
        .unwrap();
        state.start_interceptor().await.unwrap();

        Harness {
            state,
            network,
            objects,
            documents,
        }
    }

    #[tokio::test]
    async fn test_health_check() {
        let h = harness().await;
        let body = h
            .json(Request::builder().uri("/health/").body(Body::empty()).unwrap())
            .await;
        assert_eq!(body["message"], "OK");
    }

    #[tokio::test]
    async fn test_worker_status_after_start() {
        let h = harness().await;
        let body = h
            .json(Request::builder().uri("/__worker/status").body(Body::empty()).unwrap())
            .await;
        assert_eq!(body["state"], "activated");
        assert_eq!(body["controlling"], true);
        let caches: Vec<String> = serde_json::from_value(body["caches"].clone()).unwrap();
        assert!(caches.contains(&"app-shell-v1".to_string()));
    }

    #[tokio::test]
    async fn test_offline_navigation_serves_app_shell() {
        let h = harness().await;
        h.network.offline.store(true, Ordering::SeqCst);

        let (status, body) = h
            .send(
                Request::builder()
                    .uri("/calendar")
                    .header("sec-fetch-mode", "navigate")
                    .header("sec-fetch-dest", "document")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_ref(), b"shell /index.html");
    }

    #[tokio::test]
    async fn test_offline_passthrough_is_bad_gateway() {
        let h = harness().await;
        h.network.offline.store(true, Ordering::SeqCst);
        let (status, _) = h
            .send(
                Request::builder()
                    .method("POST")
                    .uri("/api/notes")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(h.network.seen().contains(&"POST http://localhost:8787/api/notes".to_string()));
    }

    #[tokio::test]
    async fn test_media_read_through_and_forget() {
        let h = harness().await;
        with_photo(&h.documents, &h.objects, "A");

        let (status, body) = h.get("/__media/photos/p1/A/orig").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.len(), 2048);

        // Served from the cache once the remote copy is gone.
        h.objects.assets.lock().unwrap().clear();
        let (status, body) = h.get("/__media/photos/p1/A/orig").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.len(), 2048);

        let deleted = h
            .json(
                Request::builder()
                    .method("DELETE")
                    .uri("/__media/photos/A")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(deleted["deleted"], true);

        let (status, _) = h.get("/__media/photos/p1/A/orig").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_media_rejects_unknown_kind_and_variant() {
        let h = harness().await;
        assert_eq!(h.get("/__media/videos/p1/A/orig").await.0, StatusCode::BAD_REQUEST);
        assert_eq!(h.get("/__media/photos/p1/A/huge").await.0, StatusCode::BAD_REQUEST);
        // Music has no thumbnails.
        assert_eq!(h.get("/__media/music/p1/A/thumb").await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_daily_pick_prefetches_once() {
        let h = harness().await;
        with_photo(&h.documents, &h.objects, "A");

        let uri = "/__daily/p1";
        let first = h
            .json(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await;
        assert_eq!(first["itemId"], "A");
        assert_eq!(first["prefetched"], true);
        assert_eq!(first["dayKey"], h.state.daily.day_key());

        let second = h
            .json(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await;
        assert_eq!(second["itemId"], "A");
        assert_eq!(second["prefetched"], false);

        let empty = h
            .json(Request::builder().uri("/__daily/p2").body(Body::empty()).unwrap())
            .await;
        assert!(empty["itemId"].is_null());
    }

    #[tokio::test]
    async fn test_subscribe_without_push_support() {
        let h = harness().await;
        let body = h
            .json(
                Request::builder()
                    .method("POST")
                    .uri("/__worker/message")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"type":"subscribe","applicationServerKey":"AAAA","reqId":"r1"}"#,
                    ))
                    .unwrap(),
            )
            .await;
        assert_eq!(body["type"], "subscribeResult");
        assert_eq!(body["reqId"], "r1");
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn test_push_builds_notification() {
        let h = harness().await;
        let body = h
            .json(
                Request::builder()
                    .method("POST")
                    .uri("/__worker/push")
                    .body(Body::from(
                        r#"{"title":"Hola","body":"Nueva foto","data":{"url":"/photos"}}"#,
                    ))
                    .unwrap(),
            )
            .await;
        assert_eq!(body["notification"]["title"], "Hola");
        assert_eq!(body["target"], "http://localhost:8787/photos");

        let changed = h
            .json(
                Request::builder()
                    .method("POST")
                    .uri("/__worker/pushsubscriptionchange")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(changed["clients"], 0);
    }
}
