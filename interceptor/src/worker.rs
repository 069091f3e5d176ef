use crate::cache::ResponseCache;
use crate::classify::{Policy, Scope};
use crate::client::WorkerClient;
use crate::messages::{PageMessage, SubscribeResult, WorkerMessage};
use crate::notifications::Notification;
use crate::ports::{FetchCacheMode, Network};
use crate::push::{PushManager, decode_vapid_key};
use crate::request::{Destination, InterceptedRequest, RequestMode, Response};
use nosotros::planes::control::{CacheRegistry, PartitionAdmin};
use parking_lot::RwLock;
use serde::Serialize;
use shared::config::Config;
use shared::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use url::Url;

/// Preferred document for navigations when the network is unreachable.
pub const OFFLINE_FALLBACK: &str = "/index.html";

const CLIENT_QUEUE: usize = 32;

#[derive(Clone, Debug)]
pub struct InterceptorConfig {
    pub origin: Url,
    pub trusted_hosts: Vec<String>,
    /// Embedded in both partition names; bumping it migrates the caches.
    pub version: String,
    pub app_shell: Vec<String>,
}

impl InterceptorConfig {
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            trusted_hosts: vec![
                "firebasestorage.googleapis.com".to_string(),
                "firebasestorage.app".to_string(),
            ],
            version: "v1".to_string(),
            app_shell: vec![
                "/".to_string(),
                OFFLINE_FALLBACK.to_string(),
                "/manifest.json".to_string(),
            ],
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let origin = Url::parse(&config.origin)
            .map_err(|e| Error::InvalidInput(format!("origin {:?}: {}", config.origin, e)))?;
        Ok(Self {
            origin,
            trusted_hosts: config.trusted_image_hosts.clone(),
            version: config.cache_version.clone(),
            app_shell: config.app_shell.clone(),
        })
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// App-shell document served to offline navigations: `/index.html` when
    /// the shell lists it, otherwise the first shell entry.
    pub fn offline_document(&self) -> &str {
        self.app_shell
            .iter()
            .find(|path| path.as_str() == OFFLINE_FALLBACK)
            .or_else(|| self.app_shell.first())
            .map(String::as_str)
            .unwrap_or(OFFLINE_FALLBACK)
    }

    pub fn app_shell_cache(&self) -> String {
        format!("app-shell-{}", self.version)
    }

    pub fn runtime_cache(&self) -> String {
        format!("runtime-{}", self.version)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    /// Install failed or the worker was replaced.
    Redundant,
}

/// What the host should do with an intercepted request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Respond(Response),
    /// Not ours; let the request reach the network untouched.
    Passthrough,
}

#[derive(Clone, Debug, Serialize)]
pub struct WorkerStatus {
    pub state: LifecycleState,
    pub controlling: bool,
    pub version: String,
    pub caches: Vec<String>,
}

/// The request interceptor and its lifecycle.
pub struct Interceptor {
    config: InterceptorConfig,
    scope: Scope,
    registry: CacheRegistry,
    network: Arc<dyn Network>,
    push: Option<Arc<dyn PushManager>>,
    state: RwLock<LifecycleState>,
    skip_waiting: AtomicBool,
    controlling: AtomicBool,
    clients: broadcast::Sender<WorkerMessage>,
    tasks: TaskTracker,
}

impl Interceptor {
    pub fn new(config: InterceptorConfig, registry: CacheRegistry, network: Arc<dyn Network>) -> Self {
        let (clients, _) = broadcast::channel(CLIENT_QUEUE);
        Self {
            scope: Scope::new(&config.origin, &config.trusted_hosts),
            config,
            registry,
            network,
            push: None,
            state: RwLock::new(LifecycleState::Parsed),
            skip_waiting: AtomicBool::new(false),
            controlling: AtomicBool::new(false),
            clients,
            tasks: TaskTracker::new(),
        }
    }

    pub fn with_push_manager(mut self, push: Arc<dyn PushManager>) -> Self {
        self.push = Some(push);
        self
    }

    pub fn config(&self) -> &InterceptorConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    pub fn is_controlling(&self) -> bool {
        self.controlling.load(Ordering::SeqCst)
    }

    pub fn is_waiting_skipped(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: LifecycleState) {
        *self.state.write() = state;
    }

    async fn app_shell(&self) -> Result<ResponseCache> {
        ResponseCache::open(&self.registry, &self.config.app_shell_cache()).await
    }

    async fn runtime(&self) -> Option<ResponseCache> {
        match ResponseCache::open(&self.registry, &self.config.runtime_cache()).await {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!(error = %e, "Runtime cache unavailable, going network-only");
                None
            }
        }
    }

    /// Pre-cache the app shell, bypassing intermediate caches, then skip
    /// waiting. All documents are stored or none are.
    pub async fn install(&self) -> Result<()> {
        self.set_state(LifecycleState::Installing);
        match self.precache_app_shell().await {
            Ok(count) => {
                self.skip_waiting.store(true, Ordering::SeqCst);
                self.set_state(LifecycleState::Installed);
                info!(version = %self.config.version, documents = count, "Interceptor installed");
                Ok(())
            }
            Err(e) => {
                self.set_state(LifecycleState::Redundant);
                warn!(error = %e, "Interceptor install failed");
                Err(e)
            }
        }
    }

    async fn precache_app_shell(&self) -> Result<usize> {
        let mut fetched = Vec::with_capacity(self.config.app_shell.len());
        for path in &self.config.app_shell {
            let url = self
                .config
                .origin
                .join(path)
                .map_err(|e| Error::InvalidInput(format!("app shell path {path:?}: {e}")))?;
            let request =
                InterceptedRequest::get(url, Destination::Empty).with_mode(RequestMode::SameOrigin);
            let response = self.network.fetch(&request, FetchCacheMode::Reload).await?;
            if !response.is_ok() {
                return Err(Error::Network(format!(
                    "app shell {} returned status {}",
                    path, response.status
                )));
            }
            fetched.push((request, response));
        }

        let cache = self.app_shell().await?;
        for (request, response) in &fetched {
            cache.put(request, response).await?;
        }
        Ok(fetched.len())
    }

    /// Drop every partition other than the current two, then take control.
    /// Returns the names of the dropped partitions.
    pub async fn activate(&self) -> Result<Vec<String>> {
        if self.state() != LifecycleState::Installed {
            return Err(Error::InvalidInput(format!(
                "cannot activate from {:?}",
                self.state()
            )));
        }
        self.set_state(LifecycleState::Activating);

        let keep = [self.config.app_shell_cache(), self.config.runtime_cache()];
        let dropped = match self.registry.retain_only(&keep).await {
            Ok(dropped) => dropped,
            Err(e) => {
                self.set_state(LifecycleState::Installed);
                return Err(e);
            }
        };
        self.claim();
        self.set_state(LifecycleState::Activated);
        info!(version = %self.config.version, dropped = ?dropped, "Interceptor activated");
        Ok(dropped)
    }

    /// Start controlling requests without waiting for a reload.
    pub fn claim(&self) {
        self.controlling.store(true, Ordering::SeqCst);
    }

    pub async fn handle(&self, request: InterceptedRequest) -> Decision {
        if !self.is_controlling() {
            return Decision::Passthrough;
        }
        let policy = self.scope.policy(&request);
        debug!(url = %request.url, ?policy, "Intercepted request");
        match policy {
            Policy::Passthrough => Decision::Passthrough,
            Policy::NetworkFirst => Decision::Respond(self.network_first(&request).await),
            Policy::StaleWhileRevalidate => {
                Decision::Respond(self.stale_while_revalidate(request).await)
            }
            Policy::CacheFirst => Decision::Respond(self.cache_first(&request).await),
        }
    }

    async fn network_first(&self, request: &InterceptedRequest) -> Response {
        match self.network.fetch(request, FetchCacheMode::Default).await {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %request.url, error = %e, "Navigation offline, serving app shell");
                self.offline_document().await.unwrap_or_else(Response::error)
            }
        }
    }

    async fn offline_document(&self) -> Option<Response> {
        let key = self.config.origin.join(self.config.offline_document()).ok()?;
        match self.app_shell().await {
            Ok(cache) => cache.match_key(key.as_str()).await.unwrap_or_else(|e| {
                warn!(error = %e, "App shell lookup failed");
                None
            }),
            Err(e) => {
                warn!(error = %e, "App shell cache unavailable");
                None
            }
        }
    }

    async fn lookup(cache: Option<&ResponseCache>, request: &InterceptedRequest) -> Option<Response> {
        let cache = cache?;
        cache.match_request(request).await.unwrap_or_else(|e| {
            warn!(url = %request.url, error = %e, "Cache lookup failed");
            None
        })
    }

    async fn store(cache: Option<&ResponseCache>, request: &InterceptedRequest, response: &Response) {
        if let Some(cache) = cache {
            if let Err(e) = cache.put(request, response).await {
                warn!(url = %request.url, error = %e, "Failed to cache response");
            }
        }
    }

    async fn stale_while_revalidate(&self, request: InterceptedRequest) -> Response {
        let cache = self.runtime().await;
        if let Some(hit) = Self::lookup(cache.as_ref(), &request).await {
            let network = self.network.clone();
            self.tasks.spawn(async move {
                match network.fetch(&request, FetchCacheMode::Default).await {
                    Ok(fresh) if fresh.is_ok() => Self::store(cache.as_ref(), &request, &fresh).await,
                    Ok(fresh) => debug!(url = %request.url, status = fresh.status, "Revalidation skipped"),
                    Err(e) => debug!(url = %request.url, error = %e, "Revalidation failed"),
                }
            });
            return hit;
        }

        match self.network.fetch(&request, FetchCacheMode::Default).await {
            Ok(response) => {
                if response.is_ok() {
                    Self::store(cache.as_ref(), &request, &response).await;
                }
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Asset unavailable offline");
                Response::error()
            }
        }
    }

    async fn cache_first(&self, request: &InterceptedRequest) -> Response {
        let cache = self.runtime().await;
        if let Some(hit) = Self::lookup(cache.as_ref(), request).await {
            return hit;
        }
        match self.network.fetch(request, FetchCacheMode::Default).await {
            Ok(response) => {
                // Opaque responses are cached too; their status is unknowable.
                Self::store(cache.as_ref(), request, &response).await;
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Image unavailable offline");
                Response::error()
            }
        }
    }

    pub async fn handle_message(&self, message: PageMessage) -> WorkerMessage {
        match message {
            PageMessage::Subscribe {
                application_server_key,
                req_id,
            } => WorkerMessage::SubscribeResult(
                self.subscribe_for_page(&application_server_key, req_id).await,
            ),
        }
    }

    async fn subscribe_for_page(&self, key: &str, req_id: Option<String>) -> SubscribeResult {
        let Some(push) = &self.push else {
            return SubscribeResult::failure(req_id, "push unavailable");
        };
        let key = match decode_vapid_key(key) {
            Ok(key) => key,
            Err(e) => return SubscribeResult::failure(req_id, e.to_string()),
        };
        let existing = match push.get_subscription().await {
            Ok(existing) => existing,
            Err(e) => return SubscribeResult::failure(req_id, e.to_string()),
        };
        let sub = match existing {
            Some(sub) => sub,
            None => match push.subscribe(&key).await {
                Ok(sub) => sub,
                Err(e) => {
                    warn!(error = %e, "Worker-side push subscribe failed");
                    return SubscribeResult::failure(req_id, e.to_string());
                }
            },
        };
        SubscribeResult::success(req_id, sub.endpoint, sub.keys)
    }

    /// Open a message channel for one page.
    pub fn connect(self: &Arc<Self>) -> WorkerClient {
        let (outbox, mut inbound) = mpsc::channel::<PageMessage>(CLIENT_QUEUE);
        let (replies, _) = broadcast::channel(CLIENT_QUEUE);
        let client = WorkerClient::new(outbox, replies.clone());
        let mut notices = self.clients.subscribe();
        let worker = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = inbound.recv() => {
                        let Some(message) = message else { break };
                        let handler = Arc::clone(&worker);
                        let replies = replies.clone();
                        worker.tasks.spawn(async move {
                            let reply = handler.handle_message(message).await;
                            let _ = replies.send(reply);
                        });
                    }
                    notice = notices.recv() => match notice {
                        Ok(notice) => {
                            let _ = replies.send(notice);
                        }
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });
        client
    }

    /// Tell every connected page its push subscription changed.
    pub fn push_subscription_changed(&self) -> usize {
        let reached = self
            .clients
            .send(WorkerMessage::PushSubscriptionChange)
            .unwrap_or(0);
        info!(clients = reached, "Push subscription changed");
        reached
    }

    pub fn handle_push(&self, payload: Option<&[u8]>) -> Notification {
        let notification = Notification::from_push(payload);
        info!(title = %notification.title, "Showing notification");
        notification
    }

    /// Absolute URL a notification click navigates to.
    pub fn notification_click(&self, notification: &Notification) -> Url {
        self.config
            .origin
            .join(notification.target_url())
            .unwrap_or_else(|_| self.config.origin.clone())
    }

    pub async fn cache_names(&self) -> Result<Vec<String>> {
        self.registry.names().await
    }

    pub async fn status(&self) -> Result<WorkerStatus> {
        Ok(WorkerStatus {
            state: self.state(),
            controlling: self.is_controlling(),
            version: self.config.version.clone(),
            caches: self.cache_names().await?,
        })
    }

    /// Wait for background work spawned so far.
    pub async fn settle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    pub async fn shutdown(&self) {
        self.controlling.store(false, Ordering::SeqCst);
        self.tasks.close();
        self.tasks.wait().await;
        info!("Interceptor stopped");
    }
}
