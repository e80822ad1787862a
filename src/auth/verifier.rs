//! Access token verification.
//!
//! # Verification flow
//!
//! 1. Verify the RS256 signature with the public key; any other `alg` is rejected.
//! 2. Check `iss` against the configured issuer.
//! 3. Check `exp` against the caller-supplied clock, allowing `clock_skew`.
//! 4. Collect the `scope` claim (array or space-delimited string).
//!
//! Signature, structure and issuer failures are [`AuthError::InvalidToken`];
//! a passed `exp` is [`AuthError::Expired`]. Both look identical to HTTP
//! callers and differ only in the audit log.

use std::{collections::BTreeSet, time::Duration};

use jsonwebtoken::{Algorithm, Validation};
use serde::Serialize;

use super::{
    AuthError,
    claims::{ClaimSet, unix_now},
    keys::VerifyingKey,
};

/// Authority extracted from a verified token. Lives for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorityGrant {
    /// Client id (`sub`)
    pub subject: String,
    /// Client display name (`name`)
    pub name: String,
    /// Granted scopes
    pub scopes: BTreeSet<String>,
    /// `exp` of the token (Unix epoch seconds)
    pub expires_at: u64,
    /// `jti` of the token, when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
}

impl AuthorityGrant {
    /// Whether `scope` was granted.
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    /// Scopes joined by single spaces.
    #[must_use]
    pub fn scope_string(&self) -> String {
        self.scopes.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
    }
}

impl From<ClaimSet> for AuthorityGrant {
    fn from(claims: ClaimSet) -> Self {
        Self {
            subject: claims.sub,
            name: claims.name,
            scopes: claims.scope.into_iter().collect(),
            expires_at: claims.exp,
            token_id: claims.jti,
        }
    }
}

/// Verifies tokens signed by the matching [`SigningKey`](super::SigningKey).
#[derive(Debug)]
pub struct TokenVerifier {
    key: VerifyingKey,
    issuer: String,
    clock_skew: Duration,
    validation: Validation,
}

impl TokenVerifier {
    /// Verifier accepting tokens from `issuer`.
    #[must_use]
    pub fn new(key: VerifyingKey, issuer: &str, clock_skew: Duration) -> Self {
        Self {
            key,
            issuer: issuer.to_string(),
            clock_skew,
            validation: build_validation(issuer),
        }
    }

    /// Expected `iss`.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Verify `token` against the current time.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidToken`] or [`AuthError::Expired`].
    pub fn verify(&self, token: &str) -> Result<AuthorityGrant, AuthError> {
        self.verify_at(token, unix_now())
    }

    /// Verify `token` as of `now` (Unix epoch seconds).
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidToken`] or [`AuthError::Expired`].
    pub fn verify_at(&self, token: &str, now: u64) -> Result<AuthorityGrant, AuthError> {
        let data = jsonwebtoken::decode::<ClaimSet>(token, self.key.decoding_key(), &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let claims = data.claims;

        // exp must be strictly after now - skew
        if claims.exp.saturating_add(self.clock_skew.as_secs()) <= now {
            return Err(AuthError::Expired);
        }

        Ok(AuthorityGrant::from(claims))
    }
}

/// Signature, algorithm and issuer checks. `exp` is checked by the caller so the
/// clock can be injected.
fn build_validation(issuer: &str) -> Validation {
    let mut v = Validation::new(Algorithm::RS256);
    v.validate_exp = false;
    v.validate_nbf = false;
    v.validate_aud = false;
    v.leeway = 0;
    v.set_issuer(&[issuer]);
    v.set_required_spec_claims(&["exp", "iss", "sub"]);
    v
}
