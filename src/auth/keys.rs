//! RSA key material for RS256 token signing.
//!
//! Keys are loaded once at startup and never mutated. The private half is
//! owned by the issuer only; the public half is shared with verifiers.
//!
//! A key source is one of:
//!
//! - `file:<path>`: PEM file on disk (`~` expanded)
//! - `env:<VAR>`: PEM held in an environment variable
//! - an inline PEM block (`-----BEGIN ...`)

use std::{env, fmt};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::json;

use crate::{Error, Result, config::KeysConfig};

/// Private half of the key pair.
#[derive(Clone)]
pub struct SigningKey {
    key: EncodingKey,
    kid: Option<String>,
}

impl SigningKey {
    /// Parse a PKCS#1 or PKCS#8 PEM private key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Key`] when the PEM is not an RSA private key.
    pub fn from_pem(pem: &[u8], kid: Option<String>) -> Result<Self> {
        let key = EncodingKey::from_rsa_pem(pem)
            .map_err(|e| Error::Key(format!("invalid RSA private key: {e}")))?;
        Ok(Self { key, kid })
    }

    /// JWT header for tokens signed with this key.
    #[must_use]
    pub fn header(&self) -> Header {
        let mut header = Header::new(Algorithm::RS256);
        header.typ = Some("JWT".to_string());
        header.kid.clone_from(&self.kid);
        header
    }

    /// The `jsonwebtoken` encoding key.
    #[must_use]
    pub const fn encoding_key(&self) -> &EncodingKey {
        &self.key
    }

    /// Key id placed in the JWT header.
    #[must_use]
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Public half of the key pair.
#[derive(Clone)]
pub struct VerifyingKey {
    key: DecodingKey,
}

impl VerifyingKey {
    /// Parse a SubjectPublicKeyInfo PEM public key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Key`] when the PEM is not an RSA public key.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let key = DecodingKey::from_rsa_pem(pem)
            .map_err(|e| Error::Key(format!("invalid RSA public key: {e}")))?;
        Ok(Self { key })
    }

    /// Load from a key source (`file:`, `env:` or inline PEM).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Key`] when the source cannot be read or parsed.
    pub fn load(source: &str) -> Result<Self> {
        Self::from_pem(resolve_source(source)?.as_bytes())
    }

    /// The `jsonwebtoken` decoding key.
    #[must_use]
    pub const fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }
}

impl fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VerifyingKey(RS256)")
    }
}

/// Matching signing and verifying keys.
#[derive(Debug, Clone)]
pub struct KeyPair {
    /// Private half (issuer)
    pub signing: SigningKey,
    /// Public half (verifiers)
    pub verifying: VerifyingKey,
}

impl KeyPair {
    /// Load both halves from configured sources.
    ///
    /// # Errors
    ///
    /// Fails when either source is unreadable, either PEM is invalid, or the
    /// halves do not belong together.
    pub fn load(config: &KeysConfig, kid: Option<String>) -> Result<Self> {
        let private_pem = resolve_source(&config.private_key)?;
        let public_pem = resolve_source(&config.public_key)?;
        Self::from_pem(private_pem.as_bytes(), public_pem.as_bytes(), kid)
    }

    /// Build from PEM bytes and check that the halves match.
    ///
    /// # Errors
    ///
    /// See [`KeyPair::load`].
    pub fn from_pem(private_pem: &[u8], public_pem: &[u8], kid: Option<String>) -> Result<Self> {
        let pair = Self {
            signing: SigningKey::from_pem(private_pem, kid)?,
            verifying: VerifyingKey::from_pem(public_pem)?,
        };
        pair.check_consistency()?;
        Ok(pair)
    }

    /// Sign a probe and verify it with the public half.
    fn check_consistency(&self) -> Result<()> {
        let probe = jsonwebtoken::encode(
            &self.signing.header(),
            &json!({"probe": true}),
            self.signing.encoding_key(),
        )?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_aud = false;

        jsonwebtoken::decode::<serde_json::Value>(
            &probe,
            self.verifying.decoding_key(),
            &validation,
        )
        .map(|_| ())
        .map_err(|e| Error::Key(format!("public key does not match private key: {e}")))
    }
}

/// Resolve a key source to PEM text.
///
/// # Errors
///
/// Returns [`Error::Key`] for unreadable files, unset variables, or values
/// that are neither a known prefix nor a PEM block.
pub fn resolve_source(source: &str) -> Result<String> {
    let source = source.trim();

    if let Some(path) = source.strip_prefix("file:") {
        let expanded = expand_home(path.trim());
        return std::fs::read_to_string(&expanded)
            .map_err(|e| Error::Key(format!("failed to read key file {expanded}: {e}")));
    }

    if let Some(var) = source.strip_prefix("env:") {
        let var = var.trim();
        return env::var(var)
            .map_err(|_| Error::Key(format!("key environment variable {var} is not set")));
    }

    if source.starts_with("-----BEGIN") {
        return Ok(source.to_string());
    }

    Err(Error::Key(
        "key source must be 'file:<path>', 'env:<VAR>' or an inline PEM block".to_string(),
    ))
}

fn expand_home(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.display().to_string(), 1);
        }
    }
    path.to_string()
}
