use crate::api::responses::{ErrorResponse, ForgetResponse};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use nosotros::AssetVariant;
use tracing::{debug, info};

fn variant(raw: &str) -> Option<AssetVariant> {
    match raw {
        "orig" | "original" => Some(AssetVariant::Original),
        "thumb" | "thumbnail" => Some(AssetVariant::Thumbnail),
        _ => None,
    }
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message))).into_response()
}

/// GET /__media/:kind/:session/:id/:variant
pub async fn get_asset(
    State(state): State<AppState>,
    Path((kind, session, id, variant_name)): Path<(String, String, String, String)>,
) -> Response {
    let Some(library) = state.library(&kind) else {
        return bad_request(format!("unknown media kind {kind}"));
    };
    let Some(variant) = variant(&variant_name) else {
        return bad_request(format!("unknown variant {variant_name}"));
    };

    let blob = match variant {
        AssetVariant::Original => library.get_original(&session, &id).await,
        AssetVariant::Thumbnail => library.get_thumbnail(&session, &id).await,
    };
    match blob {
        Some(blob) => {
            debug!(kind = %kind, id = %id, size = blob.len(), "Serving cached asset");
            (
                [
                    (header::CONTENT_TYPE, blob.mime_type),
                    (header::CACHE_CONTROL, "private, max-age=86400".to_string()),
                ],
                blob.bytes,
            )
                .into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("not available offline")),
        )
            .into_response(),
    }
}

/// DELETE /__media/:kind/:id
pub async fn forget_asset(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<ForgetResponse>, StatusCode> {
    let library = state.library(&kind).ok_or(StatusCode::BAD_REQUEST)?;
    let deleted = library.forget(&id).await;
    info!(kind = %kind, id = %id, deleted, "Forgot cached asset");
    Ok(Json(ForgetResponse { deleted }))
}
