//! Client registry.
//!
//! Resolves registered clients and checks what they present: redirect URIs
//! by exact match, secrets in constant time.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use url::Url;

use crate::storage::ClientStorage;
use crate::types::{ClientRecord, Scopes, SigningAlgorithm, generate_opaque_id};
use crate::{ProviderError, ProviderResult};

/// A client registration request.
#[derive(Debug, Clone)]
pub struct RegisterClient {
    /// Display name.
    pub name: Option<String>,
    /// Redirect URIs; at least one, each an absolute URL.
    pub redirect_uris: Vec<String>,
    /// Signing algorithm for the client's tokens.
    pub signature_algorithm: SigningAlgorithm,
    /// Scopes the client may request.
    pub scopes_allowed: Scopes,
    /// Register a public client (no secret).
    pub public: bool,
}

impl RegisterClient {
    /// Creates a confidential client registration.
    #[must_use]
    pub fn new(redirect_uris: Vec<String>, scopes_allowed: Scopes) -> Self {
        Self {
            name: None,
            redirect_uris,
            signature_algorithm: SigningAlgorithm::default(),
            scopes_allowed,
            public: false,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the signing algorithm.
    #[must_use]
    pub fn with_signature_algorithm(mut self, algorithm: SigningAlgorithm) -> Self {
        self.signature_algorithm = algorithm;
        self
    }

    /// Registers a public client.
    #[must_use]
    pub fn public(mut self) -> Self {
        self.public = true;
        self
    }
}

/// Resolves and validates registered clients.
pub struct ClientRegistry {
    storage: Arc<dyn ClientStorage>,
}

impl ClientRegistry {
    /// Creates a registry over the given store.
    pub fn new(storage: Arc<dyn ClientStorage>) -> Self {
        Self { storage }
    }

    /// Looks up a client.
    ///
    /// # Errors
    ///
    /// Returns `UnknownClient` if no client has that ID.
    pub async fn resolve(&self, client_id: &str) -> ProviderResult<ClientRecord> {
        self.storage
            .get(client_id)
            .await?
            .ok_or_else(|| ProviderError::unknown_client(client_id))
    }

    /// Checks a redirect URI against the client's registered URIs.
    ///
    /// # Errors
    ///
    /// Returns `RedirectMismatch` unless the URI matches a registered one
    /// exactly.
    pub fn validate_redirect(&self, client: &ClientRecord, redirect_uri: &str) -> ProviderResult<()> {
        if client.is_redirect_uri_allowed(redirect_uri) {
            Ok(())
        } else {
            tracing::warn!(client_id = %client.id, redirect_uri = %redirect_uri, "redirect URI mismatch");
            Err(ProviderError::redirect_mismatch(redirect_uri))
        }
    }

    /// Checks a presented client secret.
    ///
    /// Public clients need no secret. Both values are hashed before the
    /// constant-time comparison so the length of the stored secret does
    /// not leak either.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSecret` if a confidential client presents a wrong or
    /// missing secret.
    pub fn validate_secret(
        &self,
        client: &ClientRecord,
        presented: Option<&str>,
    ) -> ProviderResult<()> {
        let Some(expected) = &client.secret else {
            return Ok(());
        };
        let Some(presented) = presented else {
            return Err(ProviderError::InvalidSecret);
        };

        let expected = Sha256::digest(expected.as_bytes());
        let presented = Sha256::digest(presented.as_bytes());
        if bool::from(expected.as_slice().ct_eq(presented.as_slice())) {
            Ok(())
        } else {
            tracing::warn!(client_id = %client.id, "invalid client secret");
            Err(ProviderError::InvalidSecret)
        }
    }

    /// Resolves a client and checks its secret.
    ///
    /// # Errors
    ///
    /// `UnknownClient` or `InvalidSecret`.
    pub async fn authenticate(
        &self,
        client_id: &str,
        secret: Option<&str>,
    ) -> ProviderResult<ClientRecord> {
        let client = self.resolve(client_id).await?;
        self.validate_secret(&client, secret)?;
        Ok(client)
    }

    /// Registers a new client with a server-generated ID and secret.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if no redirect URI is given or one is not an
    /// absolute URL, and a storage error if the write fails.
    pub async fn register(&self, request: RegisterClient) -> ProviderResult<ClientRecord> {
        if request.redirect_uris.is_empty() {
            return Err(ProviderError::invalid_request(
                "at least one redirect_uri is required",
            ));
        }
        for uri in &request.redirect_uris {
            let parsed = Url::parse(uri).map_err(|e| {
                ProviderError::invalid_request(format!("invalid redirect_uri {uri}: {e}"))
            })?;
            if parsed.fragment().is_some() {
                return Err(ProviderError::invalid_request(format!(
                    "redirect_uri must not contain a fragment: {uri}"
                )));
            }
        }

        let client = ClientRecord {
            id: uuid::Uuid::new_v4().to_string(),
            secret: (!request.public).then(generate_opaque_id),
            name: request.name,
            redirect_uris: request.redirect_uris,
            signature_algorithm: request.signature_algorithm,
            scopes_allowed: request.scopes_allowed,
            created_at: OffsetDateTime::now_utc(),
        };

        self.storage.put(&client).await?;
        tracing::info!(
            client_id = %client.id,
            public = client.is_public(),
            algorithm = %client.signature_algorithm,
            "registered client"
        );
        Ok(client)
    }

    /// Lists registered clients.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the backend fails.
    pub async fn list(&self) -> ProviderResult<Vec<ClientRecord>> {
        self.storage.list().await
    }

    /// Removes a client. Returns `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the backend fails.
    pub async fn remove(&self, client_id: &str) -> ProviderResult<bool> {
        let removed = self.storage.delete(client_id).await?;
        if removed {
            tracing::info!(client_id = %client_id, "removed client");
        }
        Ok(removed)
    }
}
