//! In-process storage backed by `DashMap`.
//!
//! Suitable for single-instance deployments and tests. Nothing survives a
//! restart.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::ProviderResult;
use crate::observability::mask;
use crate::storage::{ClientStorage, CodeStorage, MarkUsed, TokenStorage};
use crate::types::{AuthorizationCode, ClientRecord, TokenRecord};

/// In-memory authorization code store.
///
/// The map shard lock held by an entry guard is the mutual-exclusion domain
/// for a code id, so check-and-mark runs under a single lock.
#[derive(Debug, Default)]
pub struct InMemoryCodeStorage {
    codes: DashMap<String, AuthorizationCode>,
}

impl InMemoryCodeStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored codes, including used and expired ones not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Returns `true` if no codes are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

#[async_trait]
impl CodeStorage for InMemoryCodeStorage {
    async fn put(&self, code: &AuthorizationCode) -> ProviderResult<()> {
        self.codes.insert(code.id.clone(), code.clone());
        tracing::debug!(code = %mask(&code.id), "saved code");
        Ok(())
    }

    async fn get(&self, id: &str) -> ProviderResult<Option<AuthorizationCode>> {
        Ok(self.codes.get(id).map(|entry| entry.value().clone()))
    }

    async fn mark_used_if_unused(&self, id: &str, now: i64) -> ProviderResult<MarkUsed> {
        match self.codes.entry(id.to_string()) {
            Entry::Vacant(_) => Ok(MarkUsed::NotFound),
            Entry::Occupied(mut entry) => {
                if entry.get().is_expired_at(now) {
                    entry.remove();
                    tracing::debug!(code = %mask(id), "evicted expired code");
                    return Ok(MarkUsed::Expired);
                }
                if entry.get().used {
                    return Ok(MarkUsed::AlreadyUsed);
                }
                let before = entry.get().clone();
                entry.get_mut().used = true;
                Ok(MarkUsed::Marked(before))
            }
        }
    }

    async fn delete(&self, id: &str) -> ProviderResult<()> {
        self.codes.remove(id);
        Ok(())
    }
}

/// In-memory token record store.
#[derive(Debug, Default)]
pub struct InMemoryTokenStorage {
    tokens: DashMap<String, TokenRecord>,
}

impl InMemoryTokenStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStorage for InMemoryTokenStorage {
    async fn put(&self, token: &TokenRecord) -> ProviderResult<()> {
        self.tokens.insert(token.id.clone(), token.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> ProviderResult<Option<TokenRecord>> {
        Ok(self.tokens.get(id).map(|entry| entry.value().clone()))
    }

    async fn revoke(&self, id: &str) -> ProviderResult<bool> {
        match self.tokens.get_mut(id) {
            Some(mut entry) => {
                entry.revoked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: &str) -> ProviderResult<()> {
        self.tokens.remove(id);
        Ok(())
    }
}

/// In-memory client registry store.
#[derive(Debug, Default)]
pub struct InMemoryClientStorage {
    clients: DashMap<String, ClientRecord>,
}

impl InMemoryClientStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with clients.
    #[must_use]
    pub fn with_clients(clients: impl IntoIterator<Item = ClientRecord>) -> Self {
        let store = Self::new();
        for client in clients {
            store.clients.insert(client.id.clone(), client);
        }
        store
    }
}

#[async_trait]
impl ClientStorage for InMemoryClientStorage {
    async fn put(&self, client: &ClientRecord) -> ProviderResult<()> {
        self.clients.insert(client.id.clone(), client.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> ProviderResult<Option<ClientRecord>> {
        Ok(self.clients.get(id).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, id: &str) -> ProviderResult<bool> {
        Ok(self.clients.remove(id).is_some())
    }

    async fn list(&self) -> ProviderResult<Vec<ClientRecord>> {
        let mut clients: Vec<ClientRecord> =
            self.clients.iter().map(|entry| entry.value().clone()).collect();
        clients.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(clients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Scopes, SigningAlgorithm};
    use std::sync::Arc;
    use time::OffsetDateTime;

    fn create_test_code(id: &str, expires_at: i64) -> AuthorizationCode {
        AuthorizationCode {
            id: id.to_string(),
            client_id: "c1".to_string(),
            subject: "alice".to_string(),
            scopes: Scopes::parse("openid"),
            nonce: None,
            code_challenge: None,
            code_challenge_method: None,
            specific_claims: serde_json::Map::new(),
            expires_at,
            used: false,
        }
    }

    #[tokio::test]
    async fn test_mark_used_once() {
        let store = InMemoryCodeStorage::new();
        store.put(&create_test_code("a", 100)).await.unwrap();

        let first = store.mark_used_if_unused("a", 50).await.unwrap();
        assert!(matches!(first, MarkUsed::Marked(ref c) if !c.used));

        let second = store.mark_used_if_unused("a", 50).await.unwrap();
        assert_eq!(second, MarkUsed::AlreadyUsed);

        assert!(store.get("a").await.unwrap().unwrap().used);
    }

    #[tokio::test]
    async fn test_mark_used_missing_and_expired() {
        let store = InMemoryCodeStorage::new();
        assert_eq!(
            store.mark_used_if_unused("nope", 0).await.unwrap(),
            MarkUsed::NotFound
        );

        store.put(&create_test_code("old", 100)).await.unwrap();
        assert_eq!(
            store.mark_used_if_unused("old", 101).await.unwrap(),
            MarkUsed::Expired
        );
        assert!(store.get("old").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mark_used_single_winner() {
        let store = Arc::new(InMemoryCodeStorage::new());
        store.put(&create_test_code("race", 100)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.mark_used_if_unused("race", 1).await.unwrap()
            }));
        }

        let mut marked = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), MarkUsed::Marked(_)) {
                marked += 1;
            }
        }
        assert_eq!(marked, 1);
    }

    #[tokio::test]
    async fn test_token_revoke() {
        let store = InMemoryTokenStorage::new();
        let record = TokenRecord {
            id: "t1".to_string(),
            subject: "alice".to_string(),
            client_id: "c1".to_string(),
            scopes: Scopes::parse("openid"),
            issued_at: 0,
            expires_at: 100,
            refreshable: true,
            revoked: false,
            parent_code_id: None,
        };
        store.put(&record).await.unwrap();

        assert!(store.revoke("t1").await.unwrap());
        assert!(store.get("t1").await.unwrap().unwrap().revoked);
        assert!(!store.revoke("missing").await.unwrap());

        store.delete("t1").await.unwrap();
        assert!(store.get("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_client_list_sorted() {
        let make = |id: &str| ClientRecord {
            id: id.to_string(),
            secret: None,
            name: None,
            redirect_uris: vec![],
            signature_algorithm: SigningAlgorithm::RS256,
            scopes_allowed: Scopes::new(),
            created_at: OffsetDateTime::UNIX_EPOCH,
        };
        let store = InMemoryClientStorage::with_clients([make("b"), make("a")]);

        let ids: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
    }
}
