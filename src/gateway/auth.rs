//! Resource gate: bearer token verification and scope enforcement.
//!
//! Order of checks for every request:
//! - auth disabled: pass
//! - token endpoint or configured public path (exact match): pass
//! - no `Authorization: Bearer` header: 401
//! - token fails verification: 401 `invalid_token`
//! - policy denies `(group, method)` for the token's scopes: 403 `insufficient_scope`
//!   (paths with dot or empty segments belong to no group and are always denied)
//! - otherwise the [`AuthorityGrant`] is inserted into request extensions

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use crate::auth::{
    AuthError, AuthMode, AuthorityGrant, TOKEN_PATH,
    audit::{self, AuditEvent},
};

/// Gate configuration resolved at startup.
#[derive(Debug, Clone)]
pub struct ResourceGate {
    /// Authorization wiring
    pub mode: AuthMode,
    /// Paths reachable without a token
    pub public_paths: Vec<String>,
}

impl ResourceGate {
    /// Gate for `mode` with extra public paths.
    #[must_use]
    pub fn new(mode: AuthMode, public_paths: Vec<String>) -> Self {
        Self { mode, public_paths }
    }

    /// Check if a path is public (bypasses the gate)
    #[must_use]
    pub fn is_public_path(&self, path: &str) -> bool {
        path == TOKEN_PATH || self.public_paths.iter().any(|p| p == path)
    }

    /// Authorize a request shape, returning the grant to attach on success.
    ///
    /// `Ok(None)` means the request passes without a grant (disabled or public).
    ///
    /// # Errors
    ///
    /// The [`AuthError`] to send back to the caller.
    pub fn authorize(
        &self,
        method: &axum::http::Method,
        path: &str,
        authorization: Option<&str>,
    ) -> Result<Option<AuthorityGrant>, AuthError> {
        let AuthMode::Enabled {
            verifier, policy, ..
        } = &self.mode
        else {
            return Ok(None);
        };

        if self.is_public_path(path) {
            debug!(path = %path, "Public path, skipping auth");
            return Ok(None);
        }

        let Some(token) = authorization.and_then(extract_bearer) else {
            let err = AuthError::MissingToken;
            warn!(path = %path, "Missing bearer token");
            audit::emit(&AuditEvent::rejected(&err, method, path));
            return Err(err);
        };

        let grant = match verifier.verify(token) {
            Ok(grant) => grant,
            Err(err) => {
                warn!(path = %path, error = %err, "Token rejected");
                audit::emit(&AuditEvent::rejected(&err, method, path));
                return Err(err);
            }
        };

        if !policy.decide_path(path, method, &grant).is_allowed() {
            warn!(
                client_id = %grant.subject,
                method = %method,
                path = %path,
                "Insufficient scope"
            );
            audit::emit(&AuditEvent::access_denied(&grant, method, path));
            return Err(AuthError::InsufficientScope);
        }

        audit::emit_debug(&AuditEvent::access_granted(&grant, method, path));
        Ok(Some(grant))
    }
}

/// `Bearer <token>`, scheme case-insensitive.
fn extract_bearer(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Resource gate middleware
pub async fn resource_gate(
    State(gate): State<Arc<ResourceGate>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match gate.authorize(request.method(), request.uri().path(), authorization) {
        Ok(Some(grant)) => {
            request.extensions_mut().insert(grant);
            next.run(request).await
        }
        Ok(None) => next.run(request).await,
        Err(err) => err.into_response(),
    }
}
