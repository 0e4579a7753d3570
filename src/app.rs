//! Router assembly: the request pipeline shared by the binary and the tests.

use axum::{middleware::from_fn_with_state, routing::get, Router};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::error;
use crate::middleware::{
    csrf::csrf_middleware, rate_limit::rate_limit_middleware, security_headers::security_headers_middleware,
};
use crate::routes;
use crate::state::AppState;

/// Builds the application router.
///
/// `screens` is where the application's screen routers attach: every route in it is
/// mounted under `server.base_path` behind the CSRF guard, next to the token bootstrap
/// endpoint. Routes added anywhere else are not CSRF-protected. Infra endpoints stay
/// outside the CSRF guard. Every request, infra included, passes the rate limiter first.
///
/// ```no_run
/// use axum::{routing::get, Router};
/// use farm_manager::{app, config::AppConfig, middleware::CsrfToken, state::AppState};
///
/// async fn new_flock(token: CsrfToken) -> String {
///     format!("<form method=\"post\">{}</form>", token.hidden_field())
/// }
///
/// # fn main() -> anyhow::Result<()> {
/// let state = AppState::new(AppConfig::default())?;
/// let screens = Router::new().route("/flocks/new", get(new_flock));
/// let _router = app::build_router(state, screens);
/// # Ok(())
/// # }
/// ```
pub fn build_router(state: AppState, screens: Router<AppState>) -> Router {
    let screens = screens
        .route("/csrf-token", get(routes::csrf::csrf_token))
        .layer(from_fn_with_state(state.clone(), csrf_middleware));

    let infra = Router::new()
        .route("/healthz", get(routes::health::healthz))
        .route("/metrics", get(routes::health::metrics))
        .route("/metrics/prometheus", get(routes::health::metrics_prometheus))
        .route("/version", get(routes::health::version));

    let base = state.config.server.base_path.clone();
    let app = if base.is_empty() { infra.merge(screens) } else { infra.nest(&base, screens) };

    let app = app
        .fallback(error::not_found)
        .with_state(state.clone())
        .layer(from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(from_fn_with_state(state, security_headers_middleware));

    // CORS: permissive in debug for local development against a separate dev server
    if cfg!(debug_assertions) {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}
