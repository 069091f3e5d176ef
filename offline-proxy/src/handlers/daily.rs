use crate::api::responses::DailyPickResponse;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use tracing::info;

/// GET /__daily/:session
///
/// Today's pick for the session; its original is prefetched at most once a day.
pub async fn daily_pick(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> Json<DailyPickResponse> {
    let day_key = state.daily.day_key();
    let item_id = state.daily.get_daily_pick(&session).await;

    let prefetched = match &item_id {
        Some(id) => state.daily.prefetch_once_per_day(&session, id).await,
        None => false,
    };
    info!(session = %session, item_id = ?item_id, prefetched, "Daily pick served");

    Json(DailyPickResponse {
        day_key,
        item_id,
        prefetched,
    })
}
