use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};

// Liveness check with build info - lightweight, not behind CSRF
pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let server = &state.config.server;
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "commit": option_env!("FARM_BUILD_COMMIT").unwrap_or("none"),
        "date": option_env!("FARM_BUILD_DATE").unwrap_or("unknown"),
        "addr": format!("{}:{}", server.host, server.port),
    }))
}

// Metrics endpoint: returns JSON snapshot
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.get_snapshot(state.rate_limiter.len()))
}

// Prometheus-compatible text exposition format
pub async fn metrics_prometheus(State(state): State<AppState>) -> impl IntoResponse {
    let m = state.metrics.get_snapshot(state.rate_limiter.len());
    let body = format!(
        "# HELP farm_requests_allowed Requests admitted by the rate limiter\n# TYPE farm_requests_allowed counter\nfarm_requests_allowed {}\n\
# HELP farm_requests_rate_limited Requests denied by the rate limiter\n# TYPE farm_requests_rate_limited counter\nfarm_requests_rate_limited {}\n\
# HELP farm_csrf_tokens_issued CSRF tokens issued\n# TYPE farm_csrf_tokens_issued counter\nfarm_csrf_tokens_issued {}\n\
# HELP farm_csrf_rejections Requests rejected by the CSRF check\n# TYPE farm_csrf_rejections counter\nfarm_csrf_rejections {}\n\
# HELP farm_rate_limit_clients Client identities with a live bucket\n# TYPE farm_rate_limit_clients gauge\nfarm_rate_limit_clients {}\n\
# HELP farm_uptime_seconds Uptime seconds\n# TYPE farm_uptime_seconds gauge\nfarm_uptime_seconds {}\n",
        m.requests_allowed,
        m.requests_rate_limited,
        m.csrf_tokens_issued,
        m.csrf_rejections,
        m.tracked_clients,
        m.uptime_seconds,
    );
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

// Version/Build info endpoint (JSON)
pub async fn version() -> impl IntoResponse {
    let body = serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "package": {
            "description": env!("CARGO_PKG_DESCRIPTION"),
            "authors": env!("CARGO_PKG_AUTHORS"),
            "license": env!("CARGO_PKG_LICENSE"),
        },
        "build": {
            "profile": if cfg!(debug_assertions) { "debug" } else { "release" },
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        }
    });
    (StatusCode::OK, Json(body))
}
