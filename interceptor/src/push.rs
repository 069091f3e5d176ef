//! Page-side push registration.
//!
//! Some platforms hand back a subscription whose endpoint or keys are filled
//! in late, or never. [`PushSubscriber`] works through a fixed chain of
//! recovery strategies before giving up, recording each step in a small
//! rolling diagnostics log.

use crate::client::WorkerClient;
use async_trait::async_trait;
use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Uncompressed P-256 public key length.
pub const VAPID_KEY_LEN: usize = 65;
pub const POLL_ATTEMPTS: usize = 15;
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);
pub const DIAG_CAPACITY: usize = 8;
const DIAG_EXTRA_MAX: usize = 400;

/// base64url, padding optional.
pub const BASE64URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    #[serde(default)]
    pub p256dh: String,
    #[serde(default)]
    pub auth: String,
}

impl SubscriptionKeys {
    pub fn is_complete(&self) -> bool {
        !self.p256dh.is_empty() && !self.auth.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<SubscriptionKeys>,
}

impl PushSubscription {
    pub fn new(endpoint: impl Into<String>, p256dh: impl Into<String>, auth: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            keys: Some(SubscriptionKeys {
                p256dh: p256dh.into(),
                auth: auth.into(),
            }),
        }
    }

    pub fn has_endpoint(&self) -> bool {
        self.endpoint.as_deref().is_some_and(|e| !e.is_empty())
    }

    pub fn has_keys(&self) -> bool {
        self.keys.as_ref().is_some_and(SubscriptionKeys::is_complete)
    }

    pub fn is_complete(&self) -> bool {
        self.has_endpoint() && self.has_keys()
    }

    /// Take whatever `other` knows that `self` does not.
    pub fn absorb(&mut self, other: PushSubscription) {
        let has_endpoint = other.has_endpoint();
        let has_keys = other.has_keys();
        if has_endpoint {
            self.endpoint = other.endpoint;
        }
        if has_keys {
            self.keys = other.keys;
        }
    }

    /// Host part of the endpoint, for diagnostics.
    pub fn endpoint_host(&self) -> String {
        self.endpoint
            .as_deref()
            .and_then(|e| url::Url::parse(e).ok())
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Granted,
    Denied,
    Default,
}

/// The platform's push registration API.
#[async_trait]
pub trait PushManager: Send + Sync + 'static {
    fn permission(&self) -> Permission;

    async fn get_subscription(&self) -> shared::Result<Option<PushSubscription>>;

    async fn subscribe(&self, application_server_key: &[u8]) -> shared::Result<PushSubscription>;

    /// Returns false if there was nothing to unsubscribe.
    async fn unsubscribe(&self) -> shared::Result<bool>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    #[error("no-permission")]
    NoPermission(Permission),
    #[error("missing-vapid")]
    MissingVapid,
    #[error("bad-vapid; len={len}; prefix={prefix}")]
    BadVapid { len: usize, prefix: String },
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),
    #[error("sw-subscribe-timeout")]
    WorkerTimeout,
    #[error("no-sw")]
    WorkerUnavailable,
    #[error("bad-subscription; haveEndpoint=false; hasKeys={has_keys}")]
    BadSubscription { has_keys: bool },
}

impl PushError {
    /// Stable diagnostic code.
    pub fn code(&self) -> &'static str {
        match self {
            PushError::NoPermission(_) => "no-permission",
            PushError::MissingVapid => "missing-vapid",
            PushError::BadVapid { .. } => "bad-vapid",
            PushError::SubscribeFailed(_) => "subscribe-failed",
            PushError::WorkerTimeout => "sw-subscribe-timeout",
            PushError::WorkerUnavailable => "no-sw",
            PushError::BadSubscription { .. } => "bad-subscription",
        }
    }
}

/// Trim and strip one pair of surrounding quotes, as keys pasted into env
/// files often carry them.
pub fn normalize_vapid_key(raw: &str) -> &str {
    let s = raw.trim();
    for quote in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

/// Decode a VAPID public key and check it is an uncompressed P-256 point.
pub fn decode_vapid_key(raw: &str) -> Result<Vec<u8>, PushError> {
    let key = normalize_vapid_key(raw);
    if key.is_empty() {
        return Err(PushError::MissingVapid);
    }
    let prefix: String = key.chars().take(8).collect();
    // Tolerate the standard alphabet too.
    let url_safe = key.replace('+', "-").replace('/', "_");
    let bytes = BASE64URL
        .decode(url_safe.as_bytes())
        .map_err(|_| PushError::BadVapid {
            len: 0,
            prefix: prefix.clone(),
        })?;
    if bytes.len() != VAPID_KEY_LEN {
        return Err(PushError::BadVapid {
            len: bytes.len(),
            prefix,
        });
    }
    Ok(bytes)
}

/// Rolling log of the last few registration steps, `ts | step | extra`.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl Diagnostics {
    pub fn record(&self, step: &str, extra: Option<Value>) {
        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut line = format!("{ts} | {step}");
        if let Some(extra) = extra {
            let extra: String = extra.to_string().chars().take(DIAG_EXTRA_MAX).collect();
            line.push_str(" | ");
            line.push_str(&extra);
        }
        debug!(step, "push diagnostics");

        let mut lines = self.lines.lock();
        lines.push_back(line);
        while lines.len() > DIAG_CAPACITY {
            lines.pop_front();
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    pub fn steps(&self) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter_map(|l| l.split(" | ").nth(1).map(str::to_string))
            .collect()
    }

    pub fn dump(&self) -> String {
        self.lines().join("\n")
    }
}

fn state(sub: &PushSubscription) -> Value {
    json!({ "haveEndpoint": sub.has_endpoint(), "hasKeys": sub.has_keys() })
}

/// Drives push registration from the page side.
pub struct PushSubscriber {
    manager: Arc<dyn PushManager>,
    worker: Option<WorkerClient>,
    diagnostics: Diagnostics,
}

impl PushSubscriber {
    pub fn new(manager: Arc<dyn PushManager>) -> Self {
        Self {
            manager,
            worker: None,
            diagnostics: Diagnostics::default(),
        }
    }

    /// Enable the worker-message fallback.
    pub fn with_worker(mut self, worker: WorkerClient) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub async fn current(&self) -> Option<PushSubscription> {
        self.manager.get_subscription().await.ok().flatten()
    }

    /// Register for push with the given VAPID public key.
    ///
    /// Succeeds once the subscription has an endpoint; keys that never show
    /// up are not fatal.
    pub async fn subscribe(&self, vapid_public_key: &str) -> Result<PushSubscription, PushError> {
        let permission = self.manager.permission();
        if permission != Permission::Granted {
            self.diagnostics
                .record("no-permission", Some(json!({ "permission": permission })));
            return Err(PushError::NoPermission(permission));
        }

        let key = match decode_vapid_key(vapid_public_key) {
            Ok(key) => key,
            Err(err) => {
                if let PushError::BadVapid { len, prefix } = &err {
                    warn!(len, "VAPID public key is not {VAPID_KEY_LEN} bytes");
                    self.diagnostics
                        .record("bad-vapid", Some(json!({ "len": len, "prefix": prefix })));
                }
                return Err(err);
            }
        };
        self.diagnostics
            .record("start", Some(json!({ "permission": permission })));

        let mut sub = match self.current().await {
            Some(existing) => existing,
            None => match self.manager.subscribe(&key).await {
                Ok(created) => {
                    self.diagnostics
                        .record("after-subscribe", Some(json!({ "have": true })));
                    created
                }
                Err(e) => {
                    self.diagnostics
                        .record("subscribe-throw", Some(json!({ "msg": e.to_string() })));
                    return Err(PushError::SubscribeFailed(e.to_string()));
                }
            },
        };
        self.diagnostics.record("pre-validate", Some(state(&sub)));

        if !sub.is_complete() {
            self.poll("polling", &mut sub).await;
        }
        if !sub.is_complete() {
            self.worker_fallback(&key, &mut sub).await;
        }
        if !sub.is_complete() {
            self.resubscribe(&key, &mut sub).await?;
        }
        if !sub.is_complete() {
            self.worker_fallback(&key, &mut sub).await;
        }

        if !sub.has_endpoint() {
            let has_keys = sub.has_keys();
            warn!(has_keys, "Push subscription missing endpoint");
            self.diagnostics.record(
                "bad-subscription",
                Some(json!({ "haveEndpoint": false, "hasKeys": has_keys })),
            );
            return Err(PushError::BadSubscription { has_keys });
        }

        let host = sub.endpoint_host();
        info!(host = %host, complete = sub.is_complete(), "Push subscription ready");
        self.diagnostics.record("ok", Some(json!({ "host": host })));
        Ok(sub)
    }

    async fn poll(&self, label: &str, sub: &mut PushSubscription) {
        self.diagnostics
            .record(&format!("{label}-begin"), Some(state(sub)));
        for _ in 0..POLL_ATTEMPTS {
            if sub.is_complete() {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
            if let Some(again) = self.current().await {
                sub.absorb(again);
            }
        }
        if !sub.is_complete() {
            self.diagnostics
                .record(&format!("{label}-timeout"), Some(state(sub)));
        }
    }

    async fn worker_fallback(&self, key: &[u8], sub: &mut PushSubscription) {
        self.diagnostics.record("sw-subscribe-start", None);
        let result = match &self.worker {
            Some(worker) => worker.request_subscribe(&BASE64URL.encode(key)).await,
            None => Err(PushError::WorkerUnavailable),
        };
        match result {
            Ok(resp) => {
                let has_keys = resp.keys.as_ref().is_some_and(SubscriptionKeys::is_complete);
                self.diagnostics.record(
                    "sw-subscribe-resp",
                    Some(json!({
                        "ok": resp.ok,
                        "haveEndpoint": resp.endpoint.is_some(),
                        "hasKeys": has_keys
                    })),
                );
                // The worker's own view is only advisory; re-read the registration.
                if let Some(again) = self.current().await {
                    sub.absorb(again);
                }
            }
            Err(err) => {
                self.diagnostics
                    .record("sw-subscribe-fail", Some(json!({ "msg": err.to_string() })));
            }
        }
    }

    async fn resubscribe(&self, key: &[u8], sub: &mut PushSubscription) -> Result<(), PushError> {
        if let Err(e) = self.manager.unsubscribe().await {
            debug!(error = %e, "unsubscribe before resubscribe failed");
        }
        let fresh = self
            .manager
            .subscribe(key)
            .await
            .map_err(|e| PushError::SubscribeFailed(e.to_string()))?;
        sub.absorb(fresh);
        if !sub.is_complete() {
            self.poll("polling2", sub).await;
        }
        self.diagnostics.record("post-resubscribe", Some(state(sub)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeNetwork, FakePushManager, complete_subscription};
    use crate::worker::{Interceptor, InterceptorConfig};
    use nosotros::CacheRegistry;

    fn vapid() -> String {
        let mut key = vec![4u8];
        key.extend(std::iter::repeat_n(7u8, 64));
        BASE64URL.encode(key)
    }

    fn worker_for(push: Arc<FakePushManager>) -> Arc<Interceptor> {
        Arc::new(
            Interceptor::new(
                InterceptorConfig::new(url::Url::parse("http://localhost:8787").unwrap()),
                CacheRegistry::in_memory(),
                Arc::new(FakeNetwork::default()),
            )
            .with_push_manager(push),
        )
    }

    #[test]
    fn test_vapid_key_normalization() {
        let key = vapid();
        assert_eq!(decode_vapid_key(&key).unwrap().len(), 65);
        assert_eq!(decode_vapid_key(&format!("  \"{key}\" ")).unwrap().len(), 65);
        assert_eq!(decode_vapid_key(&format!("'{key}='")).unwrap().len(), 65);
        assert_eq!(decode_vapid_key("  "), Err(PushError::MissingVapid));

        let short = BASE64URL.encode([4u8; 10]);
        let err = decode_vapid_key(&short).unwrap_err();
        assert_eq!(err.code(), "bad-vapid");
        assert_eq!(
            err,
            PushError::BadVapid {
                len: 10,
                prefix: short.chars().take(8).collect()
            }
        );
    }

    #[test]
    fn test_diagnostics_keep_last_eight() {
        let diag = Diagnostics::default();
        for i in 0..12 {
            diag.record(&format!("step{i}"), Some(json!({ "i": i })));
        }
        let steps = diag.steps();
        assert_eq!(steps.len(), DIAG_CAPACITY);
        assert_eq!(steps.first().map(String::as_str), Some("step4"));
        assert!(diag.lines()[7].ends_with("| {\"i\":11}"));
    }

    #[tokio::test]
    async fn test_permission_required() {
        let push = Arc::new(FakePushManager::new(Permission::Denied));
        let err = PushSubscriber::new(push.clone()).subscribe(&vapid()).await.unwrap_err();
        assert_eq!(err.code(), "no-permission");
        assert_eq!(push.subscribe_calls(), 0);
    }

    #[tokio::test]
    async fn test_bad_key_is_rejected_before_subscribing() {
        let push = Arc::new(FakePushManager::granted());
        let subscriber = PushSubscriber::new(push.clone());
        let err = subscriber.subscribe("\"BAAAA\"").await.unwrap_err();
        assert_eq!(err.code(), "bad-vapid");
        assert_eq!(push.subscribe_calls(), 0);
        assert_eq!(subscriber.diagnostics().steps(), vec!["bad-vapid"]);
    }

    #[tokio::test]
    async fn test_existing_complete_subscription_is_reused() {
        let push = Arc::new(FakePushManager::granted());
        push.set_current(Some(complete_subscription("https://push.test/existing")));

        let sub = PushSubscriber::new(push.clone()).subscribe(&vapid()).await.unwrap();
        assert_eq!(sub.endpoint.as_deref(), Some("https://push.test/existing"));
        assert_eq!(push.subscribe_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_keys_are_picked_up_by_polling() {
        let push = Arc::new(FakePushManager::granted());
        push.queue_subscription(PushSubscription {
            endpoint: Some("https://push.test/late".into()),
            keys: None,
        });
        push.heal_after_reads(3);

        let subscriber = PushSubscriber::new(push.clone());
        let sub = subscriber.subscribe(&vapid()).await.unwrap();
        assert!(sub.is_complete());
        assert_eq!(push.subscribe_calls(), 1);
        assert_eq!(
            subscriber.diagnostics().steps(),
            vec!["start", "after-subscribe", "pre-validate", "polling-begin", "ok"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_fallback_completes_subscription() {
        let push = Arc::new(FakePushManager::granted());
        // Page-side subscribe never yields an endpoint.
        push.queue_subscription(PushSubscription::default());
        push.worker_sees_complete();
        let worker = worker_for(push.worker_view());

        let subscriber = PushSubscriber::new(push.clone()).with_worker(worker.connect());
        let sub = subscriber.subscribe(&vapid()).await.unwrap();

        assert!(sub.is_complete());
        let steps = subscriber.diagnostics().steps();
        assert!(steps.contains(&"polling-timeout".to_string()));
        assert!(steps.contains(&"sw-subscribe-resp".to_string()));
        assert!(!steps.contains(&"post-resubscribe".to_string()));
        assert_eq!(steps.last().map(String::as_str), Some("ok"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_cycle_without_worker() {
        let push = Arc::new(FakePushManager::granted());
        push.queue_subscription(PushSubscription::default());
        // Second subscribe yields a complete one.
        push.queue_subscription(complete_subscription("https://push.test/second"));

        let subscriber = PushSubscriber::new(push.clone());
        let sub = subscriber.subscribe(&vapid()).await.unwrap();

        assert_eq!(sub.endpoint.as_deref(), Some("https://push.test/second"));
        assert_eq!(push.unsubscribe_calls(), 1);
        assert_eq!(push.subscribe_calls(), 2);
        let steps = subscriber.diagnostics().steps();
        assert!(steps.contains(&"sw-subscribe-fail".to_string()));
        assert!(steps.contains(&"post-resubscribe".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_endpoint_after_every_strategy() {
        let push = Arc::new(FakePushManager::granted());
        push.always_incomplete();

        let subscriber = PushSubscriber::new(push.clone());
        let err = subscriber.subscribe(&vapid()).await.unwrap_err();
        assert_eq!(err, PushError::BadSubscription { has_keys: false });
        assert_eq!(
            subscriber.diagnostics().steps().last().map(String::as_str),
            Some("bad-subscription")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_endpoint_without_keys_is_accepted() {
        let push = Arc::new(FakePushManager::granted());
        push.always_incomplete_with_endpoint("https://push.test/keyless");

        let sub = PushSubscriber::new(push).subscribe(&vapid()).await.unwrap();
        assert!(sub.has_endpoint());
        assert!(!sub.has_keys());
    }
}
