//! Access token claim set.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::directory::RegisteredClient;

/// Claims carried by every access token. No `aud` is ever set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSet {
    /// Issuer
    pub iss: String,
    /// Subject: the client id
    pub sub: String,
    /// Granted scopes (the client's role)
    #[serde(with = "scope_claim")]
    pub scope: Vec<String>,
    /// Client display name
    #[serde(default)]
    pub name: String,
    /// Issued-at (Unix epoch seconds)
    #[serde(default)]
    pub iat: u64,
    /// Expires-at (Unix epoch seconds)
    pub exp: u64,
    /// Token id, for correlating audit lines only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl ClaimSet {
    /// Attach a token id.
    #[must_use]
    pub fn with_jti(mut self, jti: impl Into<String>) -> Self {
        self.jti = Some(jti.into());
        self
    }

    /// Scopes joined by single spaces, as returned from the token endpoint.
    #[must_use]
    pub fn scope_string(&self) -> String {
        self.scope.join(" ")
    }
}

/// Build the claims for `client`. The scope comes only from the client record.
#[must_use]
pub fn build_claims(client: &RegisteredClient, issuer: &str, now: u64, ttl: Duration) -> ClaimSet {
    ClaimSet {
        iss: issuer.to_string(),
        sub: client.client_id.clone(),
        scope: vec![client.role.as_str().to_string()],
        name: client.name.clone(),
        iat: now,
        exp: now.saturating_add(ttl.as_secs()),
        jti: None,
    }
}

/// Current Unix time in seconds.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// `scope` is written as a JSON array and read from either an array or a
/// space-delimited string.
mod scope_claim {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ScopeRepr {
        List(Vec<String>),
        Spaced(String),
    }

    pub fn serialize<S>(scope: &[String], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        scope.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match ScopeRepr::deserialize(deserializer)? {
            ScopeRepr::List(list) => list,
            ScopeRepr::Spaced(s) => s.split_whitespace().map(str::to_string).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use pretty_assertions::assert_eq;

    fn reader() -> RegisteredClient {
        RegisteredClient {
            client_id: "reader-app".to_string(),
            client_secret: "$2b$04$unused".to_string(),
            name: "Reader App".to_string(),
            role: Role::Reader,
            enabled: true,
            trashed: false,
        }
    }

    #[test]
    fn build_claims_derives_everything_from_client() {
        // GIVEN: a READER client and a fixed clock
        let claims = build_claims(&reader(), "SkyAPI", 1_700_000_000, Duration::from_secs(3600));

        // THEN: claims mirror the record
        assert_eq!(
            claims,
            ClaimSet {
                iss: "SkyAPI".to_string(),
                sub: "reader-app".to_string(),
                scope: vec!["READER".to_string()],
                name: "Reader App".to_string(),
                iat: 1_700_000_000,
                exp: 1_700_003_600,
                jti: None,
            }
        );
    }

    #[test]
    fn claims_serialize_scope_as_array_without_aud() {
        let claims = build_claims(&reader(), "SkyAPI", 0, Duration::from_secs(60)).with_jti("abc");

        let value = serde_json::to_value(&claims).unwrap();

        assert_eq!(value["scope"], serde_json::json!(["READER"]));
        assert_eq!(value["jti"], "abc");
        assert!(value.get("aud").is_none());
    }

    #[test]
    fn scope_accepts_space_delimited_string() {
        // GIVEN: a token payload using the space-delimited scope form
        let json = r#"{"iss":"SkyAPI","sub":"x","scope":"READER UPDATER","exp":10}"#;

        // WHEN: deserialized
        let claims: ClaimSet = serde_json::from_str(json).unwrap();

        // THEN: scopes are split, optional claims default
        assert_eq!(claims.scope, vec!["READER", "UPDATER"]);
        assert_eq!(claims.name, "");
        assert!(claims.jti.is_none());
    }
}
