//! Client-credentials token issuance.
//!
//! 1. Look up the client in the [`ClientDirectory`].
//! 2. Check the presented secret against the stored bcrypt hash on the
//!    blocking pool. A miss still runs one bcrypt check against a dummy hash
//!    so unknown ids and wrong secrets take the same time.
//! 3. Reject scope requests wider than the client's role.
//! 4. Build the claims and sign them with RS256.
//!
//! Nothing is persisted: a token is valid until its `exp`.

use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use serde::Serialize;
use tracing::{debug, warn};

use super::{
    AuthError,
    audit::{self, AuditEvent},
    claims::{ClaimSet, build_claims, unix_now},
    directory::{ClientDirectory, RegisteredClient},
    keys::SigningKey,
};

/// Successful token endpoint response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    /// Compact RS256 JWT
    pub access_token: String,
    /// Seconds until expiry
    pub expires_in: u64,
    /// Always `"Bearer"`
    pub token_type: String,
    /// Granted scope, space-delimited
    pub scope: String,
}

/// Hash checked when the client id is unknown.
fn dummy_hash() -> &'static str {
    static DUMMY: OnceLock<String> = OnceLock::new();
    DUMMY.get_or_init(|| {
        bcrypt::hash("weather-auth-gateway/unknown-client", bcrypt::DEFAULT_COST)
            .unwrap_or_default()
    })
}

/// Issues access tokens for registered clients.
pub struct TokenIssuer {
    directory: Arc<dyn ClientDirectory>,
    key: SigningKey,
    issuer: String,
    ttl: Duration,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// Issuer signing with `key`, stamping `issuer` and a TTL of `ttl_minutes`.
    #[must_use]
    pub fn new(
        directory: Arc<dyn ClientDirectory>,
        key: SigningKey,
        issuer: &str,
        ttl_minutes: u64,
    ) -> Self {
        Self {
            directory,
            key,
            issuer: issuer.to_string(),
            ttl: Duration::from_secs(ttl_minutes.saturating_mul(60)),
        }
    }

    /// Token lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token for `client_id` / `secret`.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidClient`] for any credential failure,
    /// [`AuthError::Directory`] when the directory cannot be read.
    pub async fn issue(&self, client_id: &str, secret: &str) -> Result<IssuedToken, AuthError> {
        self.issue_for_request(client_id, secret, None).await
    }

    /// Issue a token, also checking an optional `scope` request parameter.
    ///
    /// # Errors
    ///
    /// As [`issue`](Self::issue), plus [`AuthError::InvalidScope`] when the
    /// request names a scope the client does not hold.
    pub async fn issue_for_request(
        &self,
        client_id: &str,
        secret: &str,
        requested_scope: Option<&str>,
    ) -> Result<IssuedToken, AuthError> {
        self.issue_at(client_id, secret, requested_scope, unix_now())
            .await
            .map(|(token, _)| token)
    }

    /// Issue as of `now` (Unix epoch seconds), returning the signed claims too.
    ///
    /// # Errors
    ///
    /// See [`issue_for_request`](Self::issue_for_request).
    pub async fn issue_at(
        &self,
        client_id: &str,
        secret: &str,
        requested_scope: Option<&str>,
        now: u64,
    ) -> Result<(IssuedToken, ClaimSet), AuthError> {
        let client = match self.authenticate(client_id, secret).await {
            Ok(client) => client,
            Err(e) => {
                audit::emit(&AuditEvent::denied(client_id, &e));
                return Err(e);
            }
        };

        if let Err(e) = check_requested_scope(&client, requested_scope) {
            audit::emit(&AuditEvent::denied(client_id, &e));
            return Err(e);
        }

        let claims = build_claims(&client, &self.issuer, now, self.ttl)
            .with_jti(uuid::Uuid::new_v4().to_string());

        let access_token =
            jsonwebtoken::encode(&self.key.header(), &claims, self.key.encoding_key())
                .map_err(|e| AuthError::Internal(format!("token signing failed: {e}")))?;

        audit::emit(&AuditEvent::issued(&claims));

        let token = IssuedToken {
            access_token,
            expires_in: self.ttl.as_secs(),
            token_type: "Bearer".to_string(),
            scope: claims.scope_string(),
        };
        Ok((token, claims))
    }

    /// Look up the client and check its secret.
    async fn authenticate(&self, client_id: &str, secret: &str) -> Result<RegisteredClient, AuthError> {
        if client_id.is_empty() || secret.is_empty() {
            return Err(AuthError::InvalidClient);
        }

        let client = self
            .directory
            .lookup(client_id)
            .await
            .map_err(|e| AuthError::Directory(e.to_string()))?;

        let stored_hash = client.as_ref().map(|c| c.client_secret.clone());
        let presented = secret.to_string();
        let secret_matches = tokio::task::spawn_blocking(move || {
            let hash = match stored_hash.as_deref() {
                Some(hash) => hash,
                None => dummy_hash(),
            };
            bcrypt::verify(presented, hash).unwrap_or(false)
        })
        .await
        .map_err(|e| AuthError::Internal(format!("secret verification task failed: {e}")))?;

        match client {
            Some(client) if secret_matches => {
                debug!(client_id = %client_id, "Client authenticated");
                Ok(client)
            }
            Some(_) => {
                warn!(client_id = %client_id, "Client secret mismatch");
                Err(AuthError::InvalidClient)
            }
            None => {
                warn!(client_id = %client_id, "Unknown or inactive client");
                Err(AuthError::InvalidClient)
            }
        }
    }
}

/// Every requested scope must be the client's own role.
fn check_requested_scope(
    client: &RegisteredClient,
    requested: Option<&str>,
) -> Result<(), AuthError> {
    let Some(requested) = requested else {
        return Ok(());
    };
    if requested
        .split_whitespace()
        .all(|scope| scope == client.role.as_str())
    {
        Ok(())
    } else {
        Err(AuthError::InvalidScope)
    }
}
