//! Client-credentials authorization: token issuance and scope enforcement.
//!
//! # Flow
//!
//! ```text
//! POST /oauth2/token (client_id, client_secret)
//!   -> ClientDirectory lookup + bcrypt verify     (issuer)
//!   -> build_claims + RS256 sign                  (issuer)
//!   <- { access_token, expires_in, token_type, scope }
//!
//! GET/PUT/... /v1/<group>/... (Authorization: Bearer <jwt>)
//!   -> signature / iss / exp checks               (verifier)
//!   -> (group, method) lookup against scopes      (policy)
//!   -> forward or 401 / 403
//! ```
//!
//! Tokens are stateless and non-revocable; nothing is stored after issuance.

pub mod audit;
pub mod claims;
pub mod directory;
pub mod handler;
pub mod issuer;
pub mod keys;
pub mod policy;
pub mod verifier;

use std::{fmt, str::FromStr, sync::Arc};

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::config::Config;

pub use audit::AuditEvent;
pub use claims::{ClaimSet, build_claims};
pub use directory::{
    CachedClientDirectory, ClientDirectory, FileClientDirectory, InMemoryClientDirectory,
    RegisteredClient,
};
pub use issuer::{IssuedToken, TokenIssuer};
pub use keys::{KeyPair, SigningKey, VerifyingKey};
pub use policy::{Decision, PolicyRule, PolicyTable, ResourceGroup};
pub use verifier::{AuthorityGrant, TokenVerifier};

/// Path of the token endpoint. Always reachable without a token.
pub const TOKEN_PATH: &str = "/oauth2/token";

/// Role held by a registered client. Issued verbatim as the token scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    /// Read weather data and the location catalog
    Reader,
    /// Read and update weather data
    Updater,
    /// Full access, including catalog writes
    System,
}

impl Role {
    /// Every role, in privilege order.
    pub const ALL: [Self; 3] = [Self::Reader, Self::Updater, Self::System];

    /// Scope string carried in tokens.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reader => "READER",
            Self::Updater => "UPDATER",
            Self::System => "SYSTEM",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "READER" => Ok(Self::Reader),
            "UPDATER" => Ok(Self::Updater),
            "SYSTEM" => Ok(Self::System),
            other => Err(format!(
                "unknown role '{other}' (expected READER, UPDATER or SYSTEM)"
            )),
        }
    }
}

/// Authorization failures surfaced to HTTP callers.
///
/// Messages never reveal whether a client exists or which half of a
/// credential was wrong.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Unknown client, wrong secret, disabled client or missing credentials.
    #[error("client authentication failed")]
    InvalidClient,

    /// The token request asked for a scope the client does not hold.
    #[error("requested scope is not granted to this client")]
    InvalidScope,

    /// No bearer token on a protected request.
    #[error("missing bearer token")]
    MissingToken,

    /// Malformed token, bad signature or wrong issuer.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// Token `exp` has passed.
    #[error("token expired")]
    Expired,

    /// Valid token whose scopes do not cover the request.
    #[error("insufficient scope")]
    InsufficientScope,

    /// The client directory could not be consulted.
    #[error("client directory unavailable: {0}")]
    Directory(String),

    /// Signing or a blocking task failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// HTTP status for this failure.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidClient | Self::MissingToken | Self::InvalidToken(_) | Self::Expired => {
                StatusCode::UNAUTHORIZED
            }
            Self::InvalidScope => StatusCode::BAD_REQUEST,
            Self::InsufficientScope => StatusCode::FORBIDDEN,
            Self::Directory(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// OAuth2 error code placed in the body, if any.
    #[must_use]
    pub const fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::InvalidClient => Some("invalid_client"),
            Self::InvalidScope => Some("invalid_scope"),
            Self::MissingToken => None,
            Self::InvalidToken(_) | Self::Expired => Some("invalid_token"),
            Self::InsufficientScope => Some("insufficient_scope"),
            Self::Directory(_) | Self::Internal(_) => Some("server_error"),
        }
    }

    /// Value for the `WWW-Authenticate` challenge, if this failure carries one.
    #[must_use]
    pub const fn challenge(&self) -> Option<&'static str> {
        match self {
            Self::MissingToken => Some("Bearer"),
            Self::InvalidToken(_) | Self::Expired => Some(r#"Bearer error="invalid_token""#),
            Self::InsufficientScope => Some(r#"Bearer error="insufficient_scope""#),
            _ => None,
        }
    }

    /// Caller-facing description. Expiry is not distinguished from other token faults.
    fn public_message(&self) -> &'static str {
        match self {
            Self::InvalidClient => "Client authentication failed",
            Self::InvalidScope => "The requested scope is invalid or exceeds the granted scope",
            Self::MissingToken => "Missing Authorization header. Use: Authorization: Bearer <token>",
            Self::InvalidToken(_) | Self::Expired => "The access token is invalid or expired",
            Self::InsufficientScope => "The access token does not grant access to this resource",
            Self::Directory(_) | Self::Internal(_) => "The authorization server encountered an error",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if matches!(self, Self::Directory(_) | Self::Internal(_)) {
            warn!(error = %self, "Authorization failed with server error");
        }

        let body = match self.error_code() {
            Some(code) => json!({"error": code, "message": self.public_message()}),
            None => json!({"message": self.public_message()}),
        };

        let mut response = (self.status(), Json(body)).into_response();
        if let Some(challenge) = self.challenge() {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(challenge),
            );
        }
        response
    }
}

/// Authorization wiring selected once at startup.
#[derive(Clone)]
pub enum AuthMode {
    /// Development profile: no token endpoint, every request passes.
    Disabled,
    /// Tokens are issued and every protected request is gated.
    Enabled {
        /// Token issuer behind `POST /oauth2/token`
        issuer: Arc<TokenIssuer>,
        /// Verifier used by the resource gate
        verifier: Arc<TokenVerifier>,
        /// Access policy
        policy: PolicyTable,
    },
}

impl fmt::Debug for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("Disabled"),
            Self::Enabled { .. } => f.write_str("Enabled"),
        }
    }
}

impl AuthMode {
    /// Build the mode described by `config`.
    ///
    /// Loads the key pair and wires the YAML client directory behind a
    /// short-lived cache.
    ///
    /// # Errors
    ///
    /// Fails when auth is enabled and the key material cannot be loaded.
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        if !config.auth.enabled {
            warn!("Authorization is DISABLED: every request will be allowed");
            return Ok(Self::Disabled);
        }

        let keys = KeyPair::load(&config.auth.keys, config.auth.key_id.clone())?;

        let file_directory = FileClientDirectory::new(&config.directory.path);
        if !file_directory.path().exists() {
            warn!(
                path = %file_directory.path().display(),
                "Client directory file not found; every token request will be rejected"
            );
        }
        let directory: Arc<dyn ClientDirectory> = Arc::new(CachedClientDirectory::new(
            file_directory,
            config.directory.cache_ttl,
        ));

        Ok(Self::enabled(
            directory,
            keys,
            &config.auth.issuer,
            config.auth.access_token_ttl_minutes,
            config.auth.clock_skew,
        ))
    }

    /// Wire an enabled mode from already-loaded parts.
    #[must_use]
    pub fn enabled(
        directory: Arc<dyn ClientDirectory>,
        keys: KeyPair,
        issuer: &str,
        ttl_minutes: u64,
        clock_skew: std::time::Duration,
    ) -> Self {
        let verifier = TokenVerifier::new(keys.verifying, issuer, clock_skew);
        let token_issuer = TokenIssuer::new(directory, keys.signing, issuer, ttl_minutes);
        Self::Enabled {
            issuer: Arc::new(token_issuer),
            verifier: Arc::new(verifier),
            policy: PolicyTable::standard(),
        }
    }

    /// Whether the resource gate enforces tokens.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_case_insensitively() {
        // GIVEN/WHEN: role strings in mixed case
        // THEN: they parse to the matching role
        assert_eq!("reader".parse::<Role>().unwrap(), Role::Reader);
        assert_eq!("Updater".parse::<Role>().unwrap(), Role::Updater);
        assert_eq!("SYSTEM".parse::<Role>().unwrap(), Role::System);
        assert!("ADMIN".parse::<Role>().is_err());
    }

    #[test]
    fn role_serializes_upper_case() {
        let json = serde_json::to_string(&Role::Updater).unwrap();
        assert_eq!(json, "\"UPDATER\"");
    }

    #[test]
    fn auth_error_status_mapping() {
        assert_eq!(AuthError::InvalidClient.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::InvalidScope.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AuthError::MissingToken.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::InvalidToken("bad signature".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AuthError::Expired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::InsufficientScope.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AuthError::Directory("io".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn expired_and_invalid_look_identical_to_callers() {
        // GIVEN: an expired and a tampered token failure
        let expired = AuthError::Expired;
        let invalid = AuthError::InvalidToken("InvalidSignature".into());

        // THEN: same code, challenge and message
        assert_eq!(expired.error_code(), invalid.error_code());
        assert_eq!(expired.challenge(), invalid.challenge());
        assert_eq!(expired.public_message(), invalid.public_message());
    }

    #[test]
    fn insufficient_scope_response_carries_challenge() {
        // WHEN: converting to a response
        let response = AuthError::InsufficientScope.into_response();

        // THEN: 403 with the insufficient_scope challenge
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            r#"Bearer error="insufficient_scope""#
        );
    }

    #[test]
    fn missing_token_challenge_has_no_error_code() {
        let response = AuthError::MissingToken.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
        assert!(AuthError::MissingToken.error_code().is_none());
    }

    #[test]
    fn disabled_mode_from_config() {
        // GIVEN: auth switched off
        let mut config = Config::default();
        config.auth.enabled = false;

        // WHEN/THEN: no keys are needed
        let mode = AuthMode::from_config(&config).unwrap();
        assert!(!mode.is_enabled());
    }
}
