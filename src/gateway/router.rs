//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{any, get},
};
use serde::Serialize;
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

use super::auth::{ResourceGate, resource_gate};
use super::upstream::{Upstream, gateway_error};
use crate::auth::{AuthMode, AuthorityGrant, handler::token_routes};

/// Shared application state
pub struct AppState {
    /// Resource gate (auth mode + public paths)
    pub gate: Arc<ResourceGate>,
    /// Weather CRUD service, when configured
    pub upstream: Option<Upstream>,
    /// Maximum request body size forwarded upstream
    pub max_body_size: usize,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let gate = Arc::clone(&state.gate);
    let max_body_size = state.max_body_size;

    let mut router = Router::new()
        .route("/", get(discovery_handler))
        .route("/health", get(health_handler))
        .route("/v1/{*path}", any(forward_handler))
        .with_state(Arc::clone(&state));

    if let AuthMode::Enabled { issuer, .. } = &gate.mode {
        router = router.merge(token_routes(Arc::clone(issuer)));
    }

    router
        // Resource gate (applied before other layers)
        .layer(middleware::from_fn_with_state(gate, resource_gate))
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Absolute URLs of the weather API resources.
#[derive(Debug, Serialize)]
pub struct DiscoveryDocument {
    locations_url: String,
    location_by_code_url: String,
    realtime_weather_by_ip_url: String,
    realtime_weather_by_code_url: String,
    hourly_forecast_by_ip_url: String,
    hourly_forecast_by_code_url: String,
    daily_forecast_by_ip_url: String,
    daily_forecast_by_code_url: String,
    full_weather_by_ip_url: String,
    full_weather_by_code_url: String,
}

impl DiscoveryDocument {
    /// Document rooted at `base` (scheme and authority, no trailing slash).
    #[must_use]
    pub fn new(base: &str) -> Self {
        Self {
            locations_url: format!("{base}/v1/locations"),
            location_by_code_url: format!("{base}/v1/locations/{{code}}"),
            realtime_weather_by_ip_url: format!("{base}/v1/realtime"),
            realtime_weather_by_code_url: format!("{base}/v1/realtime/{{locationCode}}"),
            hourly_forecast_by_ip_url: format!("{base}/v1/hourly"),
            hourly_forecast_by_code_url: format!("{base}/v1/hourly/{{locationCode}}"),
            daily_forecast_by_ip_url: format!("{base}/v1/daily"),
            daily_forecast_by_code_url: format!("{base}/v1/daily/{{locationCode}}"),
            full_weather_by_ip_url: format!("{base}/v1/full"),
            full_weather_by_code_url: format!("{base}/v1/full/{{locationCode}}"),
        }
    }
}

/// Scheme and authority the caller used to reach us.
fn base_url(headers: &HeaderMap) -> String {
    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(header::HOST))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .filter(|s| *s == "https" || *s == "http")
        .unwrap_or("http");
    format!("{scheme}://{host}")
}

/// GET / - discovery document, never gated
async fn discovery_handler(headers: HeaderMap) -> impl IntoResponse {
    Json(DiscoveryDocument::new(&base_url(&headers)))
}

/// GET /health
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "auth": if state.gate.mode.is_enabled() { "enabled" } else { "disabled" },
        "upstream": state.upstream.is_some(),
    }))
}

/// /v1/* - forward to the weather service once the gate has passed
async fn forward_handler(State(state): State<Arc<AppState>>, request: Request<Body>) -> Response {
    let Some(upstream) = state.upstream.as_ref() else {
        return gateway_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "upstream_not_configured",
            "No weather service is configured behind this gateway",
        );
    };

    let grant = request.extensions().get::<AuthorityGrant>().cloned();
    upstream
        .forward(request, grant.as_ref(), state.max_body_size)
        .await
}
