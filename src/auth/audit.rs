//! Audit logging for token issuance and access decisions.
//!
//! Every event is emitted via `tracing` with the serialized event in an
//! `audit` field.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `token.issued` | A client obtained a token |
//! | `token.denied` | A token request failed (bad credentials, over-broad scope, directory error) |
//! | `token.rejected` | A presented token was missing, invalid or expired |
//! | `access.denied` | A valid token lacked the scope for the request |
//! | `access.granted` | A request passed the gate (`debug` level) |

use axum::http::Method;
use serde::Serialize;

use super::{AuthError, claims::ClaimSet, verifier::AuthorityGrant};

/// Structured audit event.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g., `"token.issued"`).
    pub event: &'static str,
    /// Client id, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Token id of the affected token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_jti: Option<String>,
    /// Scopes issued or presented.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<Vec<String>>,
    /// Request method (access events).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Request path (access events).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Short reason for failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    fn new(event: &'static str) -> Self {
        Self {
            event,
            client_id: None,
            token_jti: None,
            scope: None,
            method: None,
            path: None,
            reason: None,
        }
    }

    /// `token.issued`
    #[must_use]
    pub fn issued(claims: &ClaimSet) -> Self {
        Self {
            client_id: Some(claims.sub.clone()),
            token_jti: claims.jti.clone(),
            scope: Some(claims.scope.clone()),
            ..Self::new("token.issued")
        }
    }

    /// `token.denied`
    #[must_use]
    pub fn denied(client_id: &str, error: &AuthError) -> Self {
        Self {
            client_id: (!client_id.is_empty()).then(|| client_id.to_string()),
            reason: Some(reason_of(error)),
            ..Self::new("token.denied")
        }
    }

    /// `token.rejected`: the reason separates `expired` from `invalid` and `missing`.
    #[must_use]
    pub fn rejected(error: &AuthError, method: &Method, path: &str) -> Self {
        Self {
            method: Some(method.to_string()),
            path: Some(path.to_string()),
            reason: Some(reason_of(error)),
            ..Self::new("token.rejected")
        }
    }

    /// `access.denied`
    #[must_use]
    pub fn access_denied(grant: &AuthorityGrant, method: &Method, path: &str) -> Self {
        Self {
            reason: Some("insufficient_scope".to_string()),
            ..Self::for_grant("access.denied", grant, method, path)
        }
    }

    /// `access.granted`
    #[must_use]
    pub fn access_granted(grant: &AuthorityGrant, method: &Method, path: &str) -> Self {
        Self::for_grant("access.granted", grant, method, path)
    }

    fn for_grant(event: &'static str, grant: &AuthorityGrant, method: &Method, path: &str) -> Self {
        Self {
            client_id: Some(grant.subject.clone()),
            token_jti: grant.token_id.clone(),
            scope: Some(grant.scopes.iter().cloned().collect()),
            method: Some(method.to_string()),
            path: Some(path.to_string()),
            ..Self::new(event)
        }
    }
}

/// Log-side reason. Unlike the HTTP body, this distinguishes expiry.
fn reason_of(error: &AuthError) -> String {
    match error {
        AuthError::Expired => "expired".to_string(),
        AuthError::MissingToken => "missing".to_string(),
        AuthError::InvalidToken(detail) => format!("invalid: {detail}"),
        AuthError::InvalidClient => "invalid_client".to_string(),
        AuthError::InvalidScope => "invalid_scope".to_string(),
        AuthError::InsufficientScope => "insufficient_scope".to_string(),
        AuthError::Directory(detail) => format!("directory: {detail}"),
        AuthError::Internal(detail) => format!("internal: {detail}"),
    }
}

/// Emit an audit event at `info`.
///
/// ```text
/// INFO weather_auth_gateway::auth::audit audit={"event":"token.issued","client_id":...}
/// ```
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, "authorization audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}

/// Emit a high-volume audit event at `debug`.
pub fn emit_debug(event: &AuditEvent) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::debug!(audit = %json, "authorization audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}
