//! Authorization code storage.
//!
//! Each code is a hash holding the JSON record in `data` alongside `used`
//! and `expires_at`. The hash fields are authoritative for the redemption
//! state; `used` inside `data` is ignored on read.

use std::collections::HashMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use deadpool_redis::Pool;
use oidc_provider::ProviderResult;
use oidc_provider::observability::mask;
use oidc_provider::storage::{CodeStorage, MarkUsed};
use oidc_provider::types::AuthorizationCode;
use redis::{AsyncCommands, Script};

use crate::{EXPIRY_GRACE_SECS, StorageError, StorageResult, key};

const STATUS_NOT_FOUND: i64 = 0;
const STATUS_ALREADY_USED: i64 = 1;
const STATUS_EXPIRED: i64 = 2;
const STATUS_MARKED: i64 = 3;

/// Atomic check-and-mark. Redis runs scripts without interleaving other
/// commands, so the checks and the `HSET` are one step per code.
///
/// KEYS[1] = code key, ARGV[1] = now (unix seconds)
static MARK_USED_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
local data = redis.call('HGET', KEYS[1], 'data')
if not data then
  return {0, ''}
end
local expires_at = tonumber(redis.call('HGET', KEYS[1], 'expires_at'))
if expires_at and tonumber(ARGV[1]) > expires_at then
  redis.call('DEL', KEYS[1])
  return {2, ''}
end
if redis.call('HGET', KEYS[1], 'used') == '1' then
  return {1, ''}
end
redis.call('HSET', KEYS[1], 'used', '1')
return {3, data}
",
    )
});

/// Redis-backed [`CodeStorage`].
#[derive(Clone)]
pub struct RedisCodeStorage {
    pool: Pool,
    prefix: String,
}

impl RedisCodeStorage {
    /// Create a code store.
    #[must_use]
    pub fn new(pool: Pool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    fn key(&self, id: &str) -> String {
        key(&self.prefix, "code", id)
    }

    async fn put_code(&self, code: &AuthorizationCode) -> StorageResult<()> {
        let key = self.key(&code.id);
        let data = serde_json::to_string(code)?;
        let used = if code.used { "1" } else { "0" };

        let mut conn = self.pool.get().await?;
        let _: () = redis::pipe()
            .atomic()
            .del(&key)
            .ignore()
            .hset_multiple(
                &key,
                &[
                    ("data", data),
                    ("used", used.to_string()),
                    ("expires_at", code.expires_at.to_string()),
                ],
            )
            .ignore()
            .expire_at(&key, code.expires_at.saturating_add(EXPIRY_GRACE_SECS))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_code(&self, id: &str) -> StorageResult<Option<AuthorizationCode>> {
        let mut conn = self.pool.get().await?;
        let fields: HashMap<String, String> = conn.hgetall(self.key(id)).await?;
        let Some(data) = fields.get("data") else {
            return Ok(None);
        };

        let mut code: AuthorizationCode = serde_json::from_str(data)?;
        code.used = fields.get("used").is_some_and(|used| used == "1");
        Ok(Some(code))
    }

    async fn mark_used(&self, id: &str, now: i64) -> StorageResult<MarkUsed> {
        let mut conn = self.pool.get().await?;
        let (status, data): (i64, String) = MARK_USED_SCRIPT
            .key(self.key(id))
            .arg(now)
            .invoke_async(&mut conn)
            .await?;

        decode_mark_used(status, &data)
    }

    async fn delete_code(&self, id: &str) -> StorageResult<()> {
        let mut conn = self.pool.get().await?;
        conn.del::<_, ()>(self.key(id)).await?;
        Ok(())
    }
}

/// Maps the script's `{status, data}` reply to a [`MarkUsed`] outcome.
fn decode_mark_used(status: i64, data: &str) -> StorageResult<MarkUsed> {
    match status {
        STATUS_MARKED => {
            let mut code: AuthorizationCode = serde_json::from_str(data)?;
            code.used = false;
            Ok(MarkUsed::Marked(code))
        }
        STATUS_ALREADY_USED => Ok(MarkUsed::AlreadyUsed),
        STATUS_EXPIRED => Ok(MarkUsed::Expired),
        STATUS_NOT_FOUND => Ok(MarkUsed::NotFound),
        other => Err(StorageError::UnexpectedReply(format!(
            "mark-used script returned status {other}"
        ))),
    }
}

#[async_trait]
impl CodeStorage for RedisCodeStorage {
    async fn put(&self, code: &AuthorizationCode) -> ProviderResult<()> {
        self.put_code(code).await.map_err(|e| {
            tracing::warn!(code = %mask(&code.id), error = %e, "Redis code write failed");
            e.into()
        })
    }

    async fn get(&self, id: &str) -> ProviderResult<Option<AuthorizationCode>> {
        self.get_code(id).await.map_err(|e| {
            tracing::warn!(code = %mask(id), error = %e, "Redis code read failed");
            e.into()
        })
    }

    async fn mark_used_if_unused(&self, id: &str, now: i64) -> ProviderResult<MarkUsed> {
        self.mark_used(id, now).await.map_err(|e| {
            tracing::warn!(code = %mask(id), error = %e, "Redis mark-used failed");
            e.into()
        })
    }

    async fn delete(&self, id: &str) -> ProviderResult<()> {
        self.delete_code(id).await.map_err(|e| {
            tracing::warn!(code = %mask(id), error = %e, "Redis code delete failed");
            e.into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oidc_provider::types::Scopes;

    #[test]
    fn test_decode_mark_used_statuses() {
        assert_eq!(
            decode_mark_used(STATUS_NOT_FOUND, "").unwrap(),
            MarkUsed::NotFound
        );
        assert_eq!(
            decode_mark_used(STATUS_ALREADY_USED, "").unwrap(),
            MarkUsed::AlreadyUsed
        );
        assert_eq!(
            decode_mark_used(STATUS_EXPIRED, "").unwrap(),
            MarkUsed::Expired
        );

        let data = r#"{"code":"X","client":"c1","user":"alice","scope":["openid"],"expires_at":5,"used":true}"#;
        match decode_mark_used(STATUS_MARKED, data).unwrap() {
            MarkUsed::Marked(code) => {
                assert_eq!(code.id, "X");
                assert_eq!(code.scopes, Scopes::parse("openid"));
                assert!(!code.used);
            }
            other => panic!("expected Marked, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_mark_used_rejects_unknown_status() {
        let err = decode_mark_used(7, "").unwrap_err();
        assert!(matches!(err, StorageError::UnexpectedReply(_)));
    }
}
