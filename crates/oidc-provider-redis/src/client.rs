//! Client registration storage.
//!
//! Clients are JSON strings; the `{prefix}:clients` set indexes their IDs
//! for listing.

use async_trait::async_trait;
use deadpool_redis::Pool;
use oidc_provider::ProviderResult;
use oidc_provider::storage::ClientStorage;
use oidc_provider::types::ClientRecord;
use redis::AsyncCommands;

use crate::{StorageResult, key};

/// Redis-backed [`ClientStorage`].
#[derive(Clone)]
pub struct RedisClientStorage {
    pool: Pool,
    prefix: String,
}

impl RedisClientStorage {
    /// Create a client store.
    #[must_use]
    pub fn new(pool: Pool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    fn key(&self, id: &str) -> String {
        key(&self.prefix, "client", id)
    }

    fn index_key(&self) -> String {
        format!("{}:clients", self.prefix)
    }

    async fn put_client(&self, client: &ClientRecord) -> StorageResult<()> {
        let data = serde_json::to_string(client)?;
        let mut conn = self.pool.get().await?;
        let _: () = redis::pipe()
            .atomic()
            .set(self.key(&client.id), data)
            .ignore()
            .sadd(self.index_key(), &client.id)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_client(&self, id: &str) -> StorageResult<Option<ClientRecord>> {
        let mut conn = self.pool.get().await?;
        let data: Option<String> = conn.get(self.key(id)).await?;
        data.map(|data| serde_json::from_str(&data))
            .transpose()
            .map_err(Into::into)
    }

    async fn delete_client(&self, id: &str) -> StorageResult<bool> {
        let mut conn = self.pool.get().await?;
        let (deleted, _): (i64, i64) = redis::pipe()
            .atomic()
            .del(self.key(id))
            .srem(self.index_key(), id)
            .query_async(&mut conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn list_clients(&self) -> StorageResult<Vec<ClientRecord>> {
        let mut conn = self.pool.get().await?;
        let ids: Vec<String> = conn.smembers(self.index_key()).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| self.key(id)).collect();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        let mut clients = values
            .into_iter()
            .flatten()
            .map(|data| serde_json::from_str::<ClientRecord>(&data))
            .collect::<Result<Vec<_>, _>>()?;
        clients.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(clients)
    }
}

#[async_trait]
impl ClientStorage for RedisClientStorage {
    async fn put(&self, client: &ClientRecord) -> ProviderResult<()> {
        self.put_client(client).await.map_err(|e| {
            tracing::warn!(client_id = %client.id, error = %e, "Redis client write failed");
            e.into()
        })
    }

    async fn get(&self, id: &str) -> ProviderResult<Option<ClientRecord>> {
        self.get_client(id).await.map_err(|e| {
            tracing::warn!(client_id = %id, error = %e, "Redis client read failed");
            e.into()
        })
    }

    async fn delete(&self, id: &str) -> ProviderResult<bool> {
        self.delete_client(id).await.map_err(|e| {
            tracing::warn!(client_id = %id, error = %e, "Redis client delete failed");
            e.into()
        })
    }

    async fn list(&self) -> ProviderResult<Vec<ClientRecord>> {
        Ok(self.list_clients().await?)
    }
}
