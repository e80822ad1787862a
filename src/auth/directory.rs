//! Registered client lookup.
//!
//! The [`ClientDirectory`] trait abstracts over the client store. A lookup
//! only ever returns *active* clients: disabled or trashed records are
//! filtered inside the query, so callers cannot tell them from unknown ids.
//!
//! Implementations:
//!
//! - [`InMemoryClientDirectory`]: `DashMap` keyed by client id (embedding, tests)
//! - [`FileClientDirectory`]: YAML file with a top-level `clients:` list,
//!   re-read on every lookup
//! - [`CachedClientDirectory`]: decorator caching positive lookups for a TTL

use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Role;
use crate::{Error, Result};

/// A provisioned API client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredClient {
    /// Opaque client identifier
    pub client_id: String,
    /// Salted bcrypt hash of the client secret
    pub client_secret: String,
    /// Display name, issued as the `name` claim
    pub name: String,
    /// Role granted to every token issued for this client
    pub role: Role,
    /// Disabled clients cannot obtain tokens
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Soft-deleted clients cannot obtain tokens
    #[serde(default)]
    pub trashed: bool,
}

const fn default_true() -> bool {
    true
}

impl RegisteredClient {
    /// Whether this record may authenticate.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.enabled && !self.trashed
    }

    /// Provision a new client with random credentials.
    ///
    /// Returns the record (secret already bcrypt-hashed at `cost`) and the
    /// clear-text secret, which is shown once and never stored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if hashing fails.
    pub fn generate(name: &str, role: Role, cost: u32) -> Result<(Self, String)> {
        let client_id = random_token::<15>();
        let secret = random_token::<32>();
        let client_secret = bcrypt::hash(&secret, cost)
            .map_err(|e| Error::Internal(format!("failed to hash client secret: {e}")))?;

        Ok((
            Self {
                client_id,
                client_secret,
                name: name.to_string(),
                role,
                enabled: true,
                trashed: false,
            },
            secret,
        ))
    }
}

/// `N` random bytes, URL-safe base64 without padding.
fn random_token<const N: usize>() -> String {
    let random_bytes: [u8; N] = rand::random();
    base64::Engine::encode(
        &base64::engine::general_purpose::URL_SAFE_NO_PAD,
        random_bytes,
    )
}

/// Read-only view of the registered clients.
#[async_trait::async_trait]
pub trait ClientDirectory: Send + Sync + 'static {
    /// Find the active client with this id.
    ///
    /// A miss (unknown, disabled or trashed) is `Ok(None)`. `Err` means the
    /// backing store itself could not be read.
    async fn lookup(&self, client_id: &str) -> Result<Option<RegisteredClient>>;
}

/// In-memory directory backed by a `DashMap`.
#[derive(Debug, Default)]
pub struct InMemoryClientDirectory {
    clients: DashMap<String, RegisteredClient>,
}

impl InMemoryClientDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a client record.
    pub fn insert(&self, client: RegisteredClient) {
        self.clients.insert(client.client_id.clone(), client);
    }

    /// Number of stored records, active or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether the directory holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl FromIterator<RegisteredClient> for InMemoryClientDirectory {
    fn from_iter<I: IntoIterator<Item = RegisteredClient>>(iter: I) -> Self {
        let directory = Self::new();
        for client in iter {
            directory.insert(client);
        }
        directory
    }
}

#[async_trait::async_trait]
impl ClientDirectory for InMemoryClientDirectory {
    async fn lookup(&self, client_id: &str) -> Result<Option<RegisteredClient>> {
        Ok(self
            .clients
            .get(client_id)
            .filter(|entry| entry.value().is_active())
            .map(|entry| entry.value().clone()))
    }
}

/// On-disk layout of the client file.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ClientFile {
    /// Registered clients
    #[serde(default)]
    pub clients: Vec<RegisteredClient>,
}

/// Directory backed by a YAML client file.
///
/// ```yaml
/// clients:
///   - client_id: 7fV2qkX0b1
///     client_secret: $2b$12$...
///     name: Weather Sync Job
///     role: SYSTEM
///     enabled: true
///     trashed: false
/// ```
#[derive(Debug, Clone)]
pub struct FileClientDirectory {
    path: PathBuf,
}

impl FileClientDirectory {
    /// Directory reading `path` on every lookup.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_clients(&self) -> Result<ClientFile> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::Directory(format!("failed to read {}: {e}", self.path.display()))
        })?;
        serde_yaml::from_str(&content).map_err(|e| {
            Error::Directory(format!("failed to parse {}: {e}", self.path.display()))
        })
    }
}

#[async_trait::async_trait]
impl ClientDirectory for FileClientDirectory {
    async fn lookup(&self, client_id: &str) -> Result<Option<RegisteredClient>> {
        let file = self.read_clients().await?;
        // First active record wins when ids are duplicated
        Ok(file
            .clients
            .into_iter()
            .find(|c| c.client_id == client_id && c.is_active()))
    }
}

/// Cached lookup entry.
struct CachedClient {
    client: RegisteredClient,
    fetched_at: Instant,
}

/// Caches positive lookups of an inner directory for `ttl`.
///
/// Misses and errors are never cached. A client disabled in the backing store
/// keeps authenticating until its cache entry goes stale.
pub struct CachedClientDirectory<D> {
    inner: D,
    entries: DashMap<String, CachedClient>,
    ttl: Duration,
}

impl<D: ClientDirectory> CachedClientDirectory<D> {
    /// Wrap `inner`. A zero `ttl` disables caching.
    pub fn new(inner: D, ttl: Duration) -> Self {
        Self {
            inner,
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Drop every cached entry.
    pub fn invalidate_all(&self) {
        self.entries.clear();
    }
}

#[async_trait::async_trait]
impl<D: ClientDirectory> ClientDirectory for CachedClientDirectory<D> {
    async fn lookup(&self, client_id: &str) -> Result<Option<RegisteredClient>> {
        if self.ttl.is_zero() {
            return self.inner.lookup(client_id).await;
        }

        if let Some(cached) = self.entries.get(client_id) {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(Some(cached.client.clone()));
            }
        }

        let found = self.inner.lookup(client_id).await?;
        match &found {
            Some(client) => {
                self.entries.insert(
                    client_id.to_string(),
                    CachedClient {
                        client: client.clone(),
                        fetched_at: Instant::now(),
                    },
                );
            }
            None => {
                if self.entries.remove(client_id).is_some() {
                    debug!(client_id = %client_id, "Evicted client no longer in directory");
                }
            }
        }
        Ok(found)
    }
}
