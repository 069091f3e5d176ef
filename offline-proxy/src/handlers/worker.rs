use crate::api::responses::{BroadcastResponse, PushResponse};
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use bytes::Bytes;
use interceptor::{PageMessage, WorkerMessage, WorkerStatus};
use tracing::{info, warn};

/// GET /__worker/status
pub async fn worker_status(State(state): State<AppState>) -> Result<Json<WorkerStatus>, StatusCode> {
    state.interceptor.status().await.map(Json).map_err(|e| {
        warn!("Failed to read worker status: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// POST /__worker/message
pub async fn post_message(
    State(state): State<AppState>,
    Json(message): Json<PageMessage>,
) -> Json<WorkerMessage> {
    info!(?message, "Page message");
    Json(state.interceptor.handle_message(message).await)
}

/// POST /__worker/push
pub async fn push_received(State(state): State<AppState>, body: Bytes) -> Json<PushResponse> {
    let payload = (!body.is_empty()).then_some(body.as_ref());
    let notification = state.interceptor.handle_push(payload);
    let target = state.interceptor.notification_click(&notification).to_string();
    Json(PushResponse {
        notification,
        target,
    })
}

/// POST /__worker/pushsubscriptionchange
pub async fn subscription_changed(State(state): State<AppState>) -> Json<BroadcastResponse> {
    Json(BroadcastResponse {
        clients: state.interceptor.push_subscription_changed(),
    })
}
