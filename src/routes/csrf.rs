use crate::{middleware::security_headers::set_no_cache, middleware::CsrfToken, state::AppState};
use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};

/// Hands the current CSRF token to script clients.
///
/// The cookie is `HttpOnly`, so scripts that attach the header to non-idempotent fetches
/// read the token from here. Never cacheable.
pub async fn csrf_token(State(state): State<AppState>, token: CsrfToken) -> Response {
    let mut res = Json(serde_json::json!({
        "token": token.as_str(),
        "header": state.config.csrf.header_name,
        "field": token.field_name(),
    }))
    .into_response();
    set_no_cache(res.headers_mut());
    res
}
