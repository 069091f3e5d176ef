use crate::api::responses::ErrorResponse;
use crate::mapping::is_hop_by_hop;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use interceptor::{Decision, FetchCacheMode};
use tracing::{debug, warn};

/// Every request outside the proxy's own routes goes through the interceptor.
pub async fn intercept(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = match state.mapper.map(&method, &uri, &headers, body) {
        Ok(request) => request,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(e.to_string()))).into_response();
        }
    };

    let response = match state.interceptor.handle(request.clone()).await {
        Decision::Respond(response) => response,
        Decision::Passthrough => {
            debug!(url = %request.url, method = %request.method, "Passing through");
            state
                .network
                .fetch(&request, FetchCacheMode::Default)
                .await
                .unwrap_or_else(|e| {
                    warn!(url = %request.url, "Passthrough failed: {}", e);
                    interceptor::Response::error()
                })
        }
    };
    to_http(response)
}

/// Network errors surface as 502; everything else keeps its status.
pub fn to_http(response: interceptor::Response) -> Response {
    if response.is_error() {
        return (
            StatusCode::BAD_GATEWAY,
            Json(ErrorResponse::new("network error")),
        )
            .into_response();
    }
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut http = Response::new(Body::from(response.body));
    *http.status_mut() = status;
    let headers = http.headers_mut();
    for (name, value) in &response.headers {
        if is_hop_by_hop(name) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.append(name, value);
        }
    }
    http
}
