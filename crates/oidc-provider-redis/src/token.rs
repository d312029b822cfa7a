//! Refresh token record storage.

use async_trait::async_trait;
use deadpool_redis::Pool;
use oidc_provider::ProviderResult;
use oidc_provider::observability::mask;
use oidc_provider::storage::TokenStorage;
use oidc_provider::types::TokenRecord;
use redis::AsyncCommands;

use crate::{EXPIRY_GRACE_SECS, StorageResult, key, unix_now};

/// Redis-backed [`TokenStorage`].
#[derive(Clone)]
pub struct RedisTokenStorage {
    pool: Pool,
    prefix: String,
}

impl RedisTokenStorage {
    /// Create a token store.
    #[must_use]
    pub fn new(pool: Pool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    fn key(&self, id: &str) -> String {
        key(&self.prefix, "token", id)
    }

    async fn put_token(&self, token: &TokenRecord) -> StorageResult<()> {
        let data = serde_json::to_string(token)?;
        let ttl = token
            .expires_at
            .saturating_sub(unix_now())
            .saturating_add(EXPIRY_GRACE_SECS)
            .max(1);

        let mut conn = self.pool.get().await?;
        conn.set_ex::<_, _, ()>(self.key(&token.id), data, ttl.unsigned_abs())
            .await?;
        Ok(())
    }

    async fn get_token(&self, id: &str) -> StorageResult<Option<TokenRecord>> {
        let mut conn = self.pool.get().await?;
        let data: Option<String> = conn.get(self.key(id)).await?;
        data.map(|data| serde_json::from_str(&data))
            .transpose()
            .map_err(Into::into)
    }

    async fn revoke_token(&self, id: &str) -> StorageResult<bool> {
        let Some(mut token) = self.get_token(id).await? else {
            return Ok(false);
        };
        token.revoked = true;
        let data = serde_json::to_string(&token)?;

        // XX: a record deleted in the meantime stays deleted
        let mut conn = self.pool.get().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(id))
            .arg(data)
            .arg("KEEPTTL")
            .arg("XX")
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete_token(&self, id: &str) -> StorageResult<()> {
        let mut conn = self.pool.get().await?;
        conn.del::<_, ()>(self.key(id)).await?;
        Ok(())
    }
}

#[async_trait]
impl TokenStorage for RedisTokenStorage {
    async fn put(&self, token: &TokenRecord) -> ProviderResult<()> {
        self.put_token(token).await.map_err(|e| {
            tracing::warn!(token = %mask(&token.id), error = %e, "Redis token write failed");
            e.into()
        })
    }

    async fn get(&self, id: &str) -> ProviderResult<Option<TokenRecord>> {
        self.get_token(id).await.map_err(|e| {
            tracing::warn!(token = %mask(id), error = %e, "Redis token read failed");
            e.into()
        })
    }

    async fn revoke(&self, id: &str) -> ProviderResult<bool> {
        self.revoke_token(id).await.map_err(|e| {
            tracing::warn!(token = %mask(id), error = %e, "Redis token revoke failed");
            e.into()
        })
    }

    async fn delete(&self, id: &str) -> ProviderResult<()> {
        self.delete_token(id).await.map_err(|e| {
            tracing::warn!(token = %mask(id), error = %e, "Redis token delete failed");
            e.into()
        })
    }
}
