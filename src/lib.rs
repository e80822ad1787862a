//! Weather Auth Gateway Library
//!
//! OAuth2 client-credentials authorization in front of a weather CRUD API.
//!
//! # Features
//!
//! - **Token endpoint**: `POST /oauth2/token` issues RS256 JWT access tokens
//! - **Client directory**: bcrypt-hashed client secrets in a YAML file
//! - **Resource gate**: bearer verification and a static role/method policy
//! - **Forwarding**: authorized `/v1/*` requests are proxied upstream
//! - **Audit**: structured JSON events for issuance and access decisions
//!
//! Tokens are stateless: there is no refresh, introspection or revocation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// # Errors
///
/// Returns [`Error::Config`] if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Config(format!("failed to install subscriber: {e}"))),
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Config(format!("failed to install subscriber: {e}"))),
    }
}
