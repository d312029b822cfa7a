//! Provider configuration.
//!
//! Configuration is read from an optional TOML file and overridden by
//! environment variables. Durations use humantime notation (`"10m"`, `"1d"`).
//!
//! # Example (TOML)
//!
//! ```toml
//! issuer = "https://id.example.com"
//! code_lifetime = "10m"
//! token_lifetime = "1h"
//! grant_type_password = false
//!
//! [registration]
//! open = false
//! registration_key = "let-me-in"
//!
//! [keys]
//! default_algorithm = "ES256"
//! retention = "1d"
//! private_keys = ["/etc/oidc/rsa.pem", "/etc/oidc/ec.pem"]
//!
//! [storage]
//! backend = "redis"
//!
//! [storage.redis]
//! url = "redis://127.0.0.1:6379"
//! ```
//!
//! Environment overrides use the `OIDC` prefix and `__` as separator, e.g.
//! `OIDC__KEYS__DEFAULT_ALGORITHM=RS256`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::types::SigningAlgorithm;

/// Default config file looked up when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "oidc-provider.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "OIDC";

/// Root provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Issuer URL placed in the `iss` claim.
    pub issuer: String,

    /// Authorization code lifetime.
    #[serde(with = "humantime_serde")]
    pub code_lifetime: Duration,

    /// Access and ID token lifetime.
    #[serde(with = "humantime_serde")]
    pub token_lifetime: Duration,

    /// Refresh token lifetime.
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,

    /// Issue a refresh token alongside access tokens.
    pub issue_refresh_tokens: bool,

    /// Enable the legacy resource owner password grant.
    pub grant_type_password: bool,

    /// Client registration policy.
    pub registration: RegistrationConfig,

    /// Signing key configuration.
    pub keys: KeysConfig,

    /// Storage backend selection.
    pub storage: StorageConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:8000".to_string(),
            code_lifetime: Duration::from_secs(86400),
            token_lifetime: Duration::from_secs(86400),
            refresh_token_lifetime: Duration::from_secs(30 * 86400),
            issue_refresh_tokens: true,
            grant_type_password: false,
            registration: RegistrationConfig::default(),
            keys: KeysConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Client registration policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Anyone may register a client.
    pub open: bool,

    /// Key that unlocks registration when it is not open.
    pub registration_key: Option<String>,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            open: true,
            registration_key: None,
        }
    }
}

impl RegistrationConfig {
    /// Returns `true` if a registration presenting `key` is allowed.
    #[must_use]
    pub fn permits(&self, key: Option<&str>) -> bool {
        if self.open {
            return true;
        }
        match (&self.registration_key, key) {
            (Some(expected), Some(presented)) => {
                expected.as_bytes().ct_eq(presented.as_bytes()).into()
            }
            _ => false,
        }
    }
}

/// Signing key configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Algorithm for newly registered clients.
    pub default_algorithm: SigningAlgorithm,

    /// How long a rotated-out key keeps verifying tokens.
    #[serde(with = "humantime_serde")]
    pub retention: Duration,

    /// PEM files with RSA or P-256 private keys to load at startup.
    pub private_keys: Vec<PathBuf>,

    /// Shared secret for HS256.
    pub hs256_secret: Option<String>,

    /// Generate a key for every asymmetric family that has none after loading.
    pub generate_missing: bool,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            default_algorithm: SigningAlgorithm::RS256,
            retention: Duration::from_secs(86400),
            private_keys: Vec::new(),
            hs256_secret: None,
            generate_missing: true,
        }
    }
}

/// Which storage backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    /// Volatile in-process maps.
    #[default]
    Memory,
    /// Remote Redis server.
    Redis,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Selected backend.
    pub backend: StorageBackendKind,

    /// Redis connection settings, used when `backend = "redis"`.
    pub redis: RedisSettings,
}

/// Redis connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedisSettings {
    /// Connection URL.
    pub url: String,

    /// Maximum pool size.
    pub pool_size: usize,

    /// Pool wait/create/recycle timeout in milliseconds.
    pub timeout_ms: u64,

    /// Namespace prepended to every key.
    pub key_prefix: String,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 16,
            timeout_ms: 2000,
            key_prefix: "oidc".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, overridden by `RUST_LOG`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),

    /// The configuration sources could not be read or merged.
    #[error("Failed to load configuration: {0}")]
    Load(String),
}

impl ProviderConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the issuer is empty or a
    /// lifetime is zero, and `ConfigError::Missing` if HS256 is the default
    /// algorithm without a secret or Redis is selected without a URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::InvalidValue(
                "issuer cannot be empty".to_string(),
            ));
        }

        for (name, value) in [
            ("code_lifetime", self.code_lifetime),
            ("token_lifetime", self.token_lifetime),
            ("refresh_token_lifetime", self.refresh_token_lifetime),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue(format!("{name} must be > 0")));
            }
        }

        if self.keys.default_algorithm.is_symmetric() && self.keys.hs256_secret.is_none() {
            return Err(ConfigError::Missing("keys.hs256_secret".to_string()));
        }

        if self.storage.backend == StorageBackendKind::Redis {
            if self.storage.redis.url.is_empty() {
                return Err(ConfigError::Missing("storage.redis.url".to_string()));
            }
            if self.storage.redis.pool_size == 0 {
                return Err(ConfigError::InvalidValue(
                    "storage.redis.pool_size must be > 0".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Code lifetime in whole seconds.
    #[must_use]
    pub fn code_lifetime_secs(&self) -> u64 {
        self.code_lifetime.as_secs()
    }

    /// Token lifetime in whole seconds.
    #[must_use]
    pub fn token_lifetime_secs(&self) -> u64 {
        self.token_lifetime.as_secs()
    }
}

pub mod loader {
    use super::{ConfigError, DEFAULT_CONFIG_FILE, ENV_PREFIX, Path, PathBuf, ProviderConfig};
    use config::{Config, Environment, File};

    /// Loads and validates the provider configuration.
    ///
    /// Sources, lowest precedence first: built-in defaults, the TOML file at
    /// `path` (or `oidc-provider.toml` if present), `OIDC__*` environment
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a source cannot be parsed or validation fails.
    pub fn load_config(path: Option<&Path>) -> Result<ProviderConfig, ConfigError> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                if !p.exists() {
                    return Err(ConfigError::Load(format!(
                        "config file not found: {}",
                        p.display()
                    )));
                }
                builder = builder.add_source(File::from(p.to_path_buf()));
            }
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., OIDC__KEYS__RETENTION=2d
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| ConfigError::Load(format!("config build error: {e}")))?;
        let merged: ProviderConfig = cfg
            .try_deserialize()
            .map_err(|e| ConfigError::Load(format!("config deserialize error: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ProviderConfig::default();
        assert_eq!(config.code_lifetime_secs(), 86400);
        assert_eq!(config.token_lifetime_secs(), 86400);
        assert!(!config.grant_type_password);
        assert!(config.registration.open);
        assert_eq!(config.keys.default_algorithm, SigningAlgorithm::RS256);
        assert_eq!(config.storage.backend, StorageBackendKind::Memory);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_issuer() {
        let config = ProviderConfig {
            issuer: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::InvalidValue(_)
        ));
    }

    #[test]
    fn test_validate_hs256_needs_secret() {
        let mut config = ProviderConfig::default();
        config.keys.default_algorithm = SigningAlgorithm::HS256;
        assert!(matches!(config.validate().unwrap_err(), ConfigError::Missing(_)));

        config.keys.hs256_secret = Some("shared".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_lifetime() {
        let config = ProviderConfig {
            code_lifetime: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_registration_policy() {
        let open = RegistrationConfig::default();
        assert!(open.permits(None));

        let closed = RegistrationConfig {
            open: false,
            registration_key: Some("let-me-in".to_string()),
        };
        assert!(closed.permits(Some("let-me-in")));
        assert!(!closed.permits(Some("let-me-out")));
        assert!(!closed.permits(None));

        let locked = RegistrationConfig {
            open: false,
            registration_key: None,
        };
        assert!(!locked.permits(Some("anything")));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
issuer = "https://id.example.com"
code_lifetime = "10m"
grant_type_password = true

[registration]
open = false
registration_key = "k"

[keys]
default_algorithm = "ES256"
retention = "2h"
"#
        )
        .unwrap();

        let config = loader::load_config(Some(file.path())).unwrap();
        assert_eq!(config.issuer, "https://id.example.com");
        assert_eq!(config.code_lifetime, Duration::from_secs(600));
        assert!(config.grant_type_password);
        assert!(!config.registration.open);
        assert_eq!(config.keys.default_algorithm, SigningAlgorithm::ES256);
        assert_eq!(config.keys.retention, Duration::from_secs(7200));
        // untouched sections keep their defaults
        assert_eq!(config.token_lifetime, Duration::from_secs(86400));
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = loader::load_config(Some(Path::new("/nonexistent/oidc.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }
}
