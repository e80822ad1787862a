//! Forwarding of authorized requests to the weather CRUD service.

use std::time::Duration;

use axum::{
    Json,
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use crate::auth::AuthorityGrant;
use crate::{Error, Result};

/// Header naming the authenticated client on forwarded requests.
pub const CLIENT_ID_HEADER: &str = "x-client-id";
/// Header carrying the granted scopes (space-delimited) on forwarded requests.
pub const CLIENT_SCOPE_HEADER: &str = "x-client-scope";

/// Headers that apply to a single connection and are never forwarded.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

/// HTTP client bound to the upstream base URL.
#[derive(Debug, Clone)]
pub struct Upstream {
    client: Client,
    base_url: String,
}

impl Upstream {
    /// Client for `base_url` with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a non-HTTP URL or when the client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "upstream.url must start with http:// or https://, got '{base_url}'"
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Config(format!("failed to build upstream client: {e}")))?;

        Ok(Self { client, base_url })
    }

    /// Base URL requests are forwarded to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Forward `request` and relay the upstream response.
    ///
    /// Method, path, query, headers and body are preserved. Any client-supplied
    /// grant headers are replaced with the verified grant.
    pub async fn forward(
        &self,
        request: Request<Body>,
        grant: Option<&AuthorityGrant>,
        max_body_size: usize,
    ) -> Response {
        let (parts, body) = request.into_parts();

        let path_and_query = parts
            .uri
            .path_and_query()
            .map_or_else(|| parts.uri.path().to_string(), ToString::to_string);
        let url = format!("{}{path_and_query}", self.base_url);

        let body = match axum::body::to_bytes(body, max_body_size).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Request body rejected");
                return gateway_error(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "payload_too_large",
                    "Request body exceeds the configured limit",
                );
            }
        };

        let mut headers = strip_hop_by_hop(&parts.headers);
        headers.remove(CLIENT_ID_HEADER);
        headers.remove(CLIENT_SCOPE_HEADER);
        if let Some(grant) = grant {
            if let Ok(value) = HeaderValue::from_str(&grant.subject) {
                headers.insert(HeaderName::from_static(CLIENT_ID_HEADER), value);
            }
            if let Ok(value) = HeaderValue::from_str(&grant.scope_string()) {
                headers.insert(HeaderName::from_static(CLIENT_SCOPE_HEADER), value);
            }
        }

        debug!(method = %parts.method, url = %url, "Forwarding to upstream");

        let result = self
            .client
            .request(parts.method.clone(), &url)
            .headers(headers)
            .body(body)
            .send()
            .await;

        let upstream = match result {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                warn!(url = %url, error = %e, "Upstream timed out");
                return gateway_error(
                    StatusCode::GATEWAY_TIMEOUT,
                    "upstream_timeout",
                    "The weather service did not respond in time",
                );
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Upstream unreachable");
                return gateway_error(
                    StatusCode::BAD_GATEWAY,
                    "bad_gateway",
                    "The weather service is unreachable",
                );
            }
        };

        let status = upstream.status();
        let response_headers = strip_hop_by_hop(upstream.headers());
        let bytes = match upstream.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to read upstream response");
                return gateway_error(
                    StatusCode::BAD_GATEWAY,
                    "bad_gateway",
                    "The weather service returned an unreadable response",
                );
            }
        };

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        response
    }
}

/// Copy `headers` without connection-scoped entries or a stale `content-length`.
fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if HOP_BY_HOP.contains(&name.as_str()) || *name == header::CONTENT_LENGTH {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// JSON error produced by the gateway itself.
pub fn gateway_error(status: StatusCode, error: &str, message: &str) -> Response {
    (status, Json(json!({"error": error, "message": message}))).into_response()
}
