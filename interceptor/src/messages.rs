use crate::push::SubscriptionKeys;
use serde::{Deserialize, Serialize};

/// Messages a page posts to the worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PageMessage {
    /// Register for push on the page's behalf.
    #[serde(rename = "subscribe")]
    Subscribe {
        /// VAPID public key, base64url.
        #[serde(rename = "applicationServerKey")]
        application_server_key: String,
        #[serde(rename = "reqId", default, skip_serializing_if = "Option::is_none")]
        req_id: Option<String>,
    },
}

/// Messages the worker posts to pages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerMessage {
    #[serde(rename = "subscribeResult")]
    SubscribeResult(SubscribeResult),
    /// The push service rotated the subscription; pages should re-subscribe.
    #[serde(rename = "pushsubscriptionchange")]
    PushSubscriptionChange,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeResult {
    #[serde(rename = "reqId", default)]
    pub req_id: Option<String>,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<SubscriptionKeys>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubscribeResult {
    pub fn success(
        req_id: Option<String>,
        endpoint: Option<String>,
        keys: Option<SubscriptionKeys>,
    ) -> Self {
        Self {
            req_id,
            ok: true,
            endpoint,
            keys,
            error: None,
        }
    }

    pub fn failure(req_id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            req_id,
            ok: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}
