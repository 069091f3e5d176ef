use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_TITLE: &str = "Nosotros";
pub const TEXT_TITLE: &str = "Notificación";
pub const DEFAULT_ICON: &str = "/icon.svg";

/// A notification ready to be shown, built from a push payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    /// Always carries a `url` string.
    pub data: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct PushPayload {
    title: Option<String>,
    body: Option<String>,
    url: Option<String>,
    icon: Option<String>,
    badge: Option<String>,
    data: Option<Map<String, Value>>,
}

impl Notification {
    /// JSON payloads may set any of `title`, `body`, `url`, `icon`, `badge`
    /// and `data`; anything else is shown as plain text.
    pub fn from_push(payload: Option<&[u8]>) -> Self {
        let parsed = match payload {
            None => PushPayload::default(),
            Some(raw) => serde_json::from_slice::<PushPayload>(raw).unwrap_or_else(|_| PushPayload {
                title: Some(TEXT_TITLE.to_string()),
                body: Some(String::from_utf8_lossy(raw).into_owned()),
                ..Default::default()
            }),
        };

        let mut data = Map::new();
        data.insert(
            "url".to_string(),
            Value::String(non_empty(parsed.url).unwrap_or_else(|| "/".to_string())),
        );
        // Explicit data fields win over the top-level url.
        data.extend(parsed.data.unwrap_or_default());

        Self {
            title: non_empty(parsed.title).unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            body: parsed.body.unwrap_or_default(),
            icon: non_empty(parsed.icon).unwrap_or_else(|| DEFAULT_ICON.to_string()),
            badge: non_empty(parsed.badge).unwrap_or_else(|| DEFAULT_ICON.to_string()),
            data,
        }
    }

    /// Where a click on this notification navigates to.
    pub fn target_url(&self) -> &str {
        self.data
            .get("url")
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .unwrap_or("/")
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
