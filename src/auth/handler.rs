//! HTTP handler for the token endpoint.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/oauth2/token` | Client-credentials grant |
//!
//! The request is `application/x-www-form-urlencoded` with credentials in the
//! body:
//!
//! ```text
//! grant_type=client_credentials&client_id=...&client_secret=...[&scope=READER]
//! ```

use std::sync::Arc;

use axum::{
    Form, Json, Router,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use super::{TOKEN_PATH, issuer::TokenIssuer};

const CLIENT_CREDENTIALS: &str = "client_credentials";

/// Token request form.
#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    /// Must be `client_credentials`.
    #[serde(default)]
    pub grant_type: Option<String>,
    /// Registered client id.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Client secret in clear text.
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Optional space-delimited scope request.
    #[serde(default)]
    pub scope: Option<String>,
}

/// Routes served by the authorization server. Mounted without the resource gate.
pub fn token_routes(issuer: Arc<TokenIssuer>) -> Router {
    Router::new()
        .route(TOKEN_PATH, post(issue_token))
        .with_state(issuer)
}

/// `POST /oauth2/token`
async fn issue_token(
    State(issuer): State<Arc<TokenIssuer>>,
    Form(body): Form<TokenRequest>,
) -> Response {
    let Some(grant_type) = body.grant_type.as_deref().filter(|g| !g.is_empty()) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "grant_type is required",
        );
    };

    if grant_type != CLIENT_CREDENTIALS {
        warn!(grant_type = %grant_type, "Unsupported grant_type");
        return error_response(
            StatusCode::BAD_REQUEST,
            "unsupported_grant_type",
            "grant_type must be 'client_credentials'",
        );
    }

    let client_id = body.client_id.as_deref().unwrap_or_default();
    let client_secret = body.client_secret.as_deref().unwrap_or_default();
    let scope = body.scope.as_deref().filter(|s| !s.trim().is_empty());

    match issuer
        .issue_for_request(client_id, client_secret, scope)
        .await
    {
        Ok(token) => {
            let mut response = (StatusCode::OK, Json(token)).into_response();
            let headers = response.headers_mut();
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
            headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
            response
        }
        Err(e) => e.into_response(),
    }
}

/// Create a JSON error response.
fn error_response(status: StatusCode, error: &str, message: &str) -> Response {
    (status, Json(json!({"error": error, "message": message}))).into_response()
}
