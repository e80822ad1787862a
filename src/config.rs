//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    /// Variables are set into the process environment for `${VAR}` resolution.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Token issuance and verification
    pub auth: AuthConfig,
    /// Registered client store
    pub directory: DirectoryConfig,
    /// Weather CRUD service that authorized requests are forwarded to
    pub upstream: UpstreamConfig,
}

/// Authentication configuration
///
/// `enabled: false` is the development profile: no token endpoint and every
/// request passes the gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Enable token issuance and the resource gate
    pub enabled: bool,
    /// Value of the `iss` claim; verifiers reject any other issuer
    pub issuer: String,
    /// Access token lifetime in minutes
    pub access_token_ttl_minutes: u64,
    /// Tolerated clock skew when checking `exp`
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,
    /// Optional `kid` placed in the JWT header
    #[serde(default)]
    pub key_id: Option<String>,
    /// RSA key material
    pub keys: KeysConfig,
    /// Paths that bypass the gate (exact match). The token endpoint is always public.
    #[serde(default = "default_public_paths")]
    pub public_paths: Vec<String>,
}

fn default_public_paths() -> Vec<String> {
    vec!["/".to_string(), "/health".to_string()]
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            issuer: "SkyAPI".to_string(),
            access_token_ttl_minutes: 60,
            clock_skew: Duration::ZERO,
            key_id: None,
            keys: KeysConfig::default(),
            public_paths: default_public_paths(),
        }
    }
}

/// RSA key sources.
///
/// Each value is one of `file:<path>`, `env:<VAR>` or an inline PEM block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// PKCS#1 or PKCS#8 RSA private key (issuer only)
    pub private_key: String,
    /// SubjectPublicKeyInfo RSA public key
    pub public_key: String,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            private_key: "file:certs/private.pem".to_string(),
            public_key: "file:certs/public.pem".to_string(),
        }
    }
}

/// Client directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// YAML file holding the registered clients
    pub path: String,
    /// How long a successful lookup is cached (`0s` disables caching)
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            path: "clients.yaml".to_string(),
            cache_ttl: Duration::from_secs(30),
        }
    }
}

/// Upstream weather service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the weather CRUD service (unset = forwarding disabled)
    #[serde(default)]
    pub url: Option<String>,
    /// Per-request timeout for forwarded calls
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (WEATHER_AUTH_ prefix)
        figment = figment.merge(Env::prefixed("WEATHER_AUTH_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before env var expansion)
        config.load_env_files();

        config.expand_env_vars()?;
        config.validate()?;

        Ok(config)
    }

    /// Reject values that would make every issued token useless.
    fn validate(&self) -> Result<()> {
        if !self.auth.enabled {
            return Ok(());
        }
        if self.auth.issuer.trim().is_empty() {
            return Err(Error::Config("auth.issuer must not be empty".to_string()));
        }
        if self.auth.access_token_ttl_minutes == 0 {
            return Err(Error::Config(
                "auth.access_token_ttl_minutes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in config values
    fn expand_env_vars(&mut self) -> Result<()> {
        // Pattern: ${VAR} or ${VAR:-default}
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .map_err(|e| Error::Internal(e.to_string()))?;

        self.auth.issuer = Self::expand_string(&re, &self.auth.issuer);
        self.auth.keys.private_key = Self::expand_string(&re, &self.auth.keys.private_key);
        self.auth.keys.public_key = Self::expand_string(&re, &self.auth.keys.public_key);
        self.directory.path = Self::expand_string(&re, &self.directory.path);
        if let Some(url) = self.upstream.url.as_mut() {
            *url = Self::expand_string(&re, url);
        }
        Ok(())
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_body_size: 1024 * 1024, // 1MB
        }
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        // "ms" before "s": "100ms" also ends with 's'
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            let mins = mins.parse::<u64>().map_err(serde::de::Error::custom)?;
            mins.checked_mul(60)
                .map(Duration::from_secs)
                .ok_or_else(|| serde::de::Error::custom(format!("duration too large: {s}")))
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_env_files_sets_env_vars() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("test.env");
        let mut f = std::fs::File::create(&env_path).unwrap();
        writeln!(f, "WEATHER_AUTH_TEST_KEY_A=hello_from_env_file").unwrap();
        drop(f);

        let config = Config {
            env_files: vec![env_path.to_string_lossy().to_string()],
            ..Default::default()
        };
        config.load_env_files();

        assert_eq!(
            env::var("WEATHER_AUTH_TEST_KEY_A").unwrap(),
            "hello_from_env_file"
        );
    }

    #[test]
    fn test_load_env_files_skips_missing() {
        let config = Config {
            env_files: vec!["/nonexistent/path/.env".to_string()],
            ..Default::default()
        };
        config.load_env_files();
    }

    #[test]
    fn test_defaults_match_token_contract() {
        let config = Config::default();
        assert!(config.auth.enabled);
        assert_eq!(config.auth.access_token_ttl_minutes, 60);
        assert_eq!(config.auth.clock_skew, Duration::ZERO);
        assert_eq!(config.auth.public_paths, vec!["/", "/health"]);
        assert!(config.upstream.url.is_none());
    }

    #[test]
    fn test_auth_section_deserialized_from_yaml() {
        let yaml = r#"
auth:
  issuer: "WeatherForecastAPI"
  access_token_ttl_minutes: 15
  clock_skew: 5s
  keys:
    private_key: "env:WEATHER_PRIVATE_KEY"
    public_key: "file:/etc/weather/public.pem"
directory:
  path: /var/lib/weather/clients.yaml
  cache_ttl: 0s
upstream:
  url: "http://127.0.0.1:8081"
  timeout: 500ms
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.auth.issuer, "WeatherForecastAPI");
        assert_eq!(config.auth.access_token_ttl_minutes, 15);
        assert_eq!(config.auth.clock_skew, Duration::from_secs(5));
        assert_eq!(config.auth.keys.private_key, "env:WEATHER_PRIVATE_KEY");
        assert_eq!(config.directory.cache_ttl, Duration::ZERO);
        assert_eq!(config.upstream.timeout, Duration::from_millis(500));
        // unspecified sections keep their defaults
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let mut config = Config::default();
        config.auth.access_token_ttl_minutes = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        // disabled auth ignores token settings
        config.auth.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duration_units_and_overflow() {
        let parse = |value: &str| {
            serde_yaml::from_str::<DirectoryConfig>(&format!("cache_ttl: \"{value}\""))
                .map(|c| c.cache_ttl)
        };

        assert_eq!(parse("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse("45").unwrap(), Duration::from_secs(45));

        // minutes that overflow u64 seconds are rejected, not wrapped
        let too_many_minutes = u64::MAX / 60 + 1;
        let err = parse(&format!("{too_many_minutes}m")).unwrap_err();
        assert!(err.to_string().contains("duration too large"));
    }

    #[test]
    fn test_expand_string_with_default() {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();
        let value = Config::expand_string(&re, "${WEATHER_AUTH_UNSET_VAR_XYZ:-clients.yaml}");
        assert_eq!(value, "clients.yaml");
    }
}
