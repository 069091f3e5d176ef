use crate::ports::{FetchCacheMode, Network};
use crate::push::{Permission, PushManager, PushSubscription, SubscriptionKeys};
use crate::request::{InterceptedRequest, Response};
use async_trait::async_trait;
use parking_lot::Mutex;
use shared::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Scripted network: serves registered responses, 404 for anything else.
#[derive(Default)]
pub struct FakeNetwork {
    routes: Mutex<HashMap<String, Response>>,
    offline: AtomicBool,
    calls: Mutex<Vec<(String, FetchCacheMode)>>,
}

impl FakeNetwork {
    pub fn serve(&self, url: &str, response: Response) {
        self.routes.lock().insert(url.to_string(), response);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|(u, _)| u == url).count()
    }

    pub fn calls(&self) -> Vec<(String, FetchCacheMode)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn fetch(&self, request: &InterceptedRequest, cache_mode: FetchCacheMode) -> Result<Response> {
        let url = request.cache_key();
        self.calls.lock().push((url.clone(), cache_mode));
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Network("offline".into()));
        }
        Ok(self
            .routes
            .lock()
            .get(&url)
            .cloned()
            .unwrap_or_else(|| Response::new(404, "not found")))
    }
}

pub fn complete_subscription(endpoint: &str) -> PushSubscription {
    PushSubscription::new(endpoint, "p256dh-key", "auth-key")
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Context {
    Page,
    Worker,
}

enum SubscribeMode {
    Complete,
    Incomplete(Option<String>),
}

struct PushState {
    permission: Permission,
    current: Option<PushSubscription>,
    queued: VecDeque<PushSubscription>,
    mode: SubscribeMode,
    heal_in: Option<usize>,
    worker_sees_complete: bool,
    subscribes: usize,
    unsubscribes: usize,
}

/// Push registration shared between a page view and a worker view.
pub struct FakePushManager {
    state: Arc<Mutex<PushState>>,
    context: Context,
}

impl FakePushManager {
    pub fn new(permission: Permission) -> Self {
        Self {
            state: Arc::new(Mutex::new(PushState {
                permission,
                current: None,
                queued: VecDeque::new(),
                mode: SubscribeMode::Complete,
                heal_in: None,
                worker_sees_complete: false,
                subscribes: 0,
                unsubscribes: 0,
            })),
            context: Context::Page,
        }
    }

    pub fn granted() -> Self {
        Self::new(Permission::Granted)
    }

    /// Same registration, seen from the worker.
    pub fn worker_view(&self) -> Arc<FakePushManager> {
        Arc::new(Self {
            state: self.state.clone(),
            context: Context::Worker,
        })
    }

    pub fn set_current(&self, sub: Option<PushSubscription>) {
        self.state.lock().current = sub;
    }

    /// The next `subscribe` returns `sub`.
    pub fn queue_subscription(&self, sub: PushSubscription) {
        self.state.lock().queued.push_back(sub);
    }

    /// The current subscription fills in after `reads` more reads.
    pub fn heal_after_reads(&self, reads: usize) {
        self.state.lock().heal_in = Some(reads);
    }

    /// Reading from the worker fills in the current subscription.
    pub fn worker_sees_complete(&self) {
        self.state.lock().worker_sees_complete = true;
    }

    pub fn always_incomplete(&self) {
        self.state.lock().mode = SubscribeMode::Incomplete(None);
    }

    pub fn always_incomplete_with_endpoint(&self, endpoint: &str) {
        self.state.lock().mode = SubscribeMode::Incomplete(Some(endpoint.to_string()));
    }

    pub fn subscribe_calls(&self) -> usize {
        self.state.lock().subscribes
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.state.lock().unsubscribes
    }
}

fn heal(sub: &mut PushSubscription) {
    if !sub.has_endpoint() {
        sub.endpoint = Some("https://push.test/healed".to_string());
    }
    if !sub.has_keys() {
        sub.keys = Some(SubscriptionKeys {
            p256dh: "p256dh-key".into(),
            auth: "auth-key".into(),
        });
    }
}

#[async_trait]
impl PushManager for FakePushManager {
    fn permission(&self) -> Permission {
        self.state.lock().permission
    }

    async fn get_subscription(&self) -> Result<Option<PushSubscription>> {
        let mut state = self.state.lock();
        let due = match state.heal_in.as_mut() {
            Some(0) => true,
            Some(n) => {
                *n -= 1;
                *n == 0
            }
            None => false,
        };
        let from_worker = self.context == Context::Worker && state.worker_sees_complete;
        if due || from_worker {
            if let Some(sub) = state.current.as_mut() {
                heal(sub);
            }
        }
        Ok(state.current.clone())
    }

    async fn subscribe(&self, application_server_key: &[u8]) -> Result<PushSubscription> {
        if application_server_key.len() != 65 {
            return Err(Error::InvalidInput("bad key".into()));
        }
        let mut state = self.state.lock();
        state.subscribes += 1;
        let n = state.subscribes;
        let sub = match state.queued.pop_front() {
            Some(sub) => sub,
            None => match &state.mode {
                SubscribeMode::Complete => complete_subscription(&format!("https://push.test/{n}")),
                SubscribeMode::Incomplete(endpoint) => PushSubscription {
                    endpoint: endpoint.clone(),
                    keys: None,
                },
            },
        };
        state.current = Some(sub.clone());
        Ok(sub)
    }

    async fn unsubscribe(&self) -> Result<bool> {
        let mut state = self.state.lock();
        state.unsubscribes += 1;
        Ok(state.current.take().is_some())
    }
}
