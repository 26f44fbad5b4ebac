use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use shared::{
    error::{ApiError, ErrorCode},
    protocol::{APPLICATION_ID_HEADER, JAVASCRIPT_KEY_HEADER, MASTER_KEY_HEADER},
};
use tracing::debug;

use crate::app_state::{Access, AppState};

pub(crate) async fn require_application_id(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ApiError>)> {
    let access = authorize(&state, request.headers()).ok_or_else(|| {
        debug!(path = %request.uri().path(), "rejected request with invalid keys");
        unauthorized()
    })?;
    request.extensions_mut().insert(access);
    Ok(next.run(request).await)
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Option<Access> {
    let config = &state.config;
    if header_str(headers, APPLICATION_ID_HEADER)? != config.app_id {
        return None;
    }

    if let Some(master_key) = header_str(headers, MASTER_KEY_HEADER) {
        return (master_key == config.master_key).then_some(Access::Master);
    }
    match header_str(headers, JAVASCRIPT_KEY_HEADER) {
        Some(key) if key != config.javascript_key => None,
        _ => Some(Access::Client),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

pub(crate) fn unauthorized() -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::FORBIDDEN,
        Json(ApiError::new(ErrorCode::Unauthorized, "unauthorized")),
    )
}
