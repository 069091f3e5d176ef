use interceptor::Notification;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[derive(Serialize)]
pub struct ForgetResponse {
    pub deleted: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyPickResponse {
    pub day_key: String,
    /// Absent when the collection is empty or unreachable.
    pub item_id: Option<String>,
    pub prefetched: bool,
}

#[derive(Serialize)]
pub struct PushResponse {
    pub notification: Notification,
    /// Where a click on the notification leads.
    pub target: String,
}

#[derive(Serialize)]
pub struct BroadcastResponse {
    pub clients: usize,
}
