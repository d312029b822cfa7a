//! Redis storage backend for the OIDC provider core.
//!
//! Provides durable storage for:
//!
//! - Authorization codes, with an atomic Lua check-and-mark for redemption
//! - Refresh token records
//! - Client registrations
//!
//! Every key is namespaced by the configured prefix (`oidc` by default):
//!
//! | Key                         | Type   | Content                              |
//! |-----------------------------|--------|--------------------------------------|
//! | `{prefix}:code:{id}`        | hash   | `data` (JSON), `used`, `expires_at`  |
//! | `{prefix}:token:{id}`       | string | JSON token record                    |
//! | `{prefix}:client:{id}`      | string | JSON client record                   |
//! | `{prefix}:clients`          | set    | registered client IDs                |
//!
//! Redis TTLs only reclaim space. Expiry is decided by the provider engines,
//! which compare `expires_at` against their clock.
//!
//! # Example
//!
//! ```ignore
//! use oidc_provider_redis::RedisStorage;
//!
//! let storage = RedisStorage::connect(&config.storage.redis).await?;
//! let provider = storage
//!     .install(Provider::builder(config, keys))
//!     .build()?;
//! ```

pub mod client;
pub mod code;
pub mod token;

use std::sync::Arc;
use std::time::Duration;

use deadpool_redis::{Pool, PoolConfig, Runtime};
use oidc_provider::ProviderError;
use oidc_provider::config::RedisSettings;
use oidc_provider::provider::ProviderBuilder;

pub use client::RedisClientStorage;
pub use code::RedisCodeStorage;
pub use token::RedisTokenStorage;

/// Seconds a record outlives its `expires_at` in Redis, so the engine still
/// sees it and reports `Expired` rather than `NotFound`.
pub const EXPIRY_GRACE_SECS: i64 = 300;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during Redis storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The pool could not be created or no connection was available.
    #[error("Redis connection error: {0}")]
    Connection(String),

    /// A Redis command failed.
    #[error("Redis command error: {0}")]
    Command(#[from] redis::RedisError),

    /// A stored record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Redis answered with a reply outside the expected contract.
    #[error("Unexpected Redis reply: {0}")]
    UnexpectedReply(String),
}

impl StorageError {
    /// Create a `Connection` error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }
}

impl From<deadpool_redis::PoolError> for StorageError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::Connection(err.to_string())
    }
}

impl From<StorageError> for ProviderError {
    fn from(err: StorageError) -> Self {
        ProviderError::storage(err.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

// =============================================================================
// Redis Storage
// =============================================================================

/// Holds the connection pool and hands out the three provider stores.
#[derive(Clone)]
pub struct RedisStorage {
    pool: Pool,
    prefix: String,
}

impl RedisStorage {
    /// Create storage over an existing pool.
    #[must_use]
    pub fn new(pool: Pool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    /// Build a pool from settings and check that Redis answers.
    ///
    /// A provider configured for Redis must not quietly run on volatile
    /// storage, so an unreachable server is an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the pool cannot be created or
    /// the server does not answer `PING`.
    pub async fn connect(settings: &RedisSettings) -> StorageResult<Self> {
        tracing::info!(url = %settings.url, "Connecting to Redis");

        let timeout = Duration::from_millis(settings.timeout_ms);
        let mut redis_config = deadpool_redis::Config::from_url(&settings.url);
        let pool_config = redis_config
            .pool
            .get_or_insert_with(|| PoolConfig::new(settings.pool_size));
        pool_config.max_size = settings.pool_size;
        pool_config.timeouts.wait = Some(timeout);
        pool_config.timeouts.create = Some(timeout);
        pool_config.timeouts.recycle = Some(timeout);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StorageError::connection(e.to_string()))?;

        let mut conn = pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        tracing::info!(prefix = %settings.key_prefix, "Connected to Redis");
        Ok(Self::new(pool, settings.key_prefix.clone()))
    }

    /// Get a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Authorization code store.
    #[must_use]
    pub fn codes(&self) -> RedisCodeStorage {
        RedisCodeStorage::new(self.pool.clone(), self.prefix.clone())
    }

    /// Refresh token store.
    #[must_use]
    pub fn tokens(&self) -> RedisTokenStorage {
        RedisTokenStorage::new(self.pool.clone(), self.prefix.clone())
    }

    /// Client store.
    #[must_use]
    pub fn clients(&self) -> RedisClientStorage {
        RedisClientStorage::new(self.pool.clone(), self.prefix.clone())
    }

    /// Wires all three stores into a provider builder.
    #[must_use]
    pub fn install(&self, builder: ProviderBuilder) -> ProviderBuilder {
        builder
            .with_code_storage(Arc::new(self.codes()))
            .with_token_storage(Arc::new(self.tokens()))
            .with_client_storage(Arc::new(self.clients()))
    }
}

/// Builds a namespaced key.
pub(crate) fn key(prefix: &str, kind: &str, id: &str) -> String {
    format!("{prefix}:{kind}:{id}")
}

/// Current unix time for TTL computation.
pub(crate) fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(key("oidc", "code", "abc"), "oidc:code:abc");
        assert_eq!(key("tenant-a", "client", "c1"), "tenant-a:client:c1");
    }

    #[test]
    fn test_storage_error_converts_to_server_error() {
        let err: ProviderError = StorageError::connection("refused").into();
        assert!(matches!(err, ProviderError::Storage { .. }));
        assert_eq!(err.oauth_error_code(), "server_error");

        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ProviderError = StorageError::from(err).into();
        assert!(err.is_server_error());
    }
}
