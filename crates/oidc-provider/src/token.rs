//! Token minting and refresh.
//!
//! Access and ID tokens are signed JWTs and are not stored. Refresh tokens
//! are opaque values backed by a [`TokenRecord`] in [`TokenStorage`], so a
//! refresh token is valid only while its record is present, unrevoked and
//! unexpired.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::clock::Clock;
use crate::keys::KeyManager;
use crate::observability::mask;
use crate::storage::TokenStorage;
use crate::types::{ClientRecord, Scopes, TokenRecord, generate_opaque_id};
use crate::{ProviderError, ProviderResult};

/// Claims the engine always sets itself. Caller-supplied claims with these
/// names are dropped.
pub const RESERVED_CLAIMS: [&str; 5] = ["sub", "aud", "iss", "exp", "iat"];

// =============================================================================
// Claims
// =============================================================================

/// Claims carried by access and ID tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer.
    pub iss: String,
    /// Subject.
    pub sub: String,
    /// Audience: the client ID.
    pub aud: String,
    /// Issued at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds.
    pub exp: i64,
    /// Space-delimited scopes (access tokens).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Nonce echo (ID tokens).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Any other claims.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A signed token and the key that signed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedToken {
    /// Compact JWS.
    pub token: String,
    /// Signing key ID.
    pub kid: String,
    /// Expiry, unix seconds.
    pub expires_at: i64,
}

/// Result of a refresh.
#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    /// New access token.
    pub access_token: SignedToken,
    /// New ID token, when `openid` is among the granted scopes.
    pub id_token: Option<SignedToken>,
    /// Scopes carried by the new tokens.
    pub scopes: Scopes,
}

// =============================================================================
// Token Engine
// =============================================================================

/// Token engine settings.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Issuer placed in `iss`.
    pub issuer: String,
    /// Refresh token lifetime in seconds.
    pub refresh_token_lifetime_secs: u64,
}

impl TokenConfig {
    /// Creates settings with a 30 day refresh token lifetime.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            refresh_token_lifetime_secs: 30 * 86400,
        }
    }

    /// Sets the refresh token lifetime.
    #[must_use]
    pub fn with_refresh_token_lifetime(mut self, secs: u64) -> Self {
        self.refresh_token_lifetime_secs = secs;
        self
    }
}

/// Mints signed tokens and manages refresh token records.
pub struct TokenEngine {
    keys: Arc<KeyManager>,
    storage: Arc<dyn TokenStorage>,
    clock: Arc<dyn Clock>,
    config: TokenConfig,
}

impl TokenEngine {
    /// Creates a token engine.
    pub fn new(
        keys: Arc<KeyManager>,
        storage: Arc<dyn TokenStorage>,
        clock: Arc<dyn Clock>,
        config: TokenConfig,
    ) -> Self {
        Self {
            keys,
            storage,
            clock,
            config,
        }
    }

    /// Returns the engine settings.
    #[must_use]
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Mints an access token `{sub, aud, scope, iat, exp, iss}` signed with
    /// the client's algorithm.
    ///
    /// # Errors
    ///
    /// Returns `NoActiveKey` if the client's algorithm has no key.
    pub fn issue_access_token(
        &self,
        subject: &str,
        client: &ClientRecord,
        scopes: &Scopes,
        lifetime_secs: u64,
    ) -> ProviderResult<SignedToken> {
        let (iat, exp) = self.validity(lifetime_secs);
        let claims = Claims {
            iss: self.config.issuer.clone(),
            sub: subject.to_string(),
            aud: client.id.clone(),
            iat,
            exp,
            scope: Some(scopes.to_string()),
            nonce: None,
            extra: Map::new(),
        };

        let (token, kid) = self.keys.sign(client.signature_algorithm, &claims)?;
        tracing::debug!(client_id = %client.id, kid = %kid, "issued access token");
        Ok(SignedToken {
            token,
            kid,
            expires_at: exp,
        })
    }

    /// Mints an ID token.
    ///
    /// `specific_claims` are merged over the standard claims, except the
    /// reserved `sub`, `aud`, `iss`, `exp` and `iat`, which always carry the
    /// engine's values.
    ///
    /// # Errors
    ///
    /// Returns `NoActiveKey` if the client's algorithm has no key.
    pub fn issue_id_token(
        &self,
        subject: &str,
        client: &ClientRecord,
        nonce: Option<&str>,
        specific_claims: &Map<String, Value>,
        lifetime_secs: u64,
    ) -> ProviderResult<SignedToken> {
        let (iat, exp) = self.validity(lifetime_secs);

        let mut claims = Map::new();
        if let Some(nonce) = nonce {
            claims.insert("nonce".to_string(), Value::from(nonce));
        }
        for (name, value) in specific_claims {
            if RESERVED_CLAIMS.contains(&name.as_str()) {
                tracing::debug!(client_id = %client.id, claim = %name, "dropped reserved claim");
                continue;
            }
            claims.insert(name.clone(), value.clone());
        }
        claims.insert("iss".to_string(), Value::from(self.config.issuer.clone()));
        claims.insert("sub".to_string(), Value::from(subject));
        claims.insert("aud".to_string(), Value::from(client.id.clone()));
        claims.insert("iat".to_string(), Value::from(iat));
        claims.insert("exp".to_string(), Value::from(exp));

        let (token, kid) = self.keys.sign(client.signature_algorithm, &claims)?;
        tracing::debug!(client_id = %client.id, kid = %kid, "issued id token");
        Ok(SignedToken {
            token,
            kid,
            expires_at: exp,
        })
    }

    /// Creates and stores an opaque refresh token.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the record cannot be written.
    pub async fn issue_refresh_token(
        &self,
        subject: &str,
        client_id: &str,
        scopes: &Scopes,
        parent_code_id: Option<&str>,
    ) -> ProviderResult<TokenRecord> {
        let (issued_at, expires_at) = self.validity(self.config.refresh_token_lifetime_secs);
        let record = TokenRecord {
            id: generate_opaque_id(),
            subject: subject.to_string(),
            client_id: client_id.to_string(),
            scopes: scopes.clone(),
            issued_at,
            expires_at,
            refreshable: true,
            revoked: false,
            parent_code_id: parent_code_id.map(str::to_string),
        };

        self.storage.put(&record).await?;
        tracing::info!(
            token = %mask(&record.id),
            client_id = %client_id,
            "issued refresh token"
        );
        Ok(record)
    }

    /// Exchanges a refresh token for new tokens.
    ///
    /// `requested` narrows the scopes; `None` keeps the original grant.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the token does not exist
    /// - `Revoked` if it was revoked
    /// - `Expired` if it is past its expiry (the record is removed)
    /// - `ClientMismatch` if it belongs to another client
    /// - `ScopeEscalation` if `requested` is not a subset of the original scopes
    pub async fn refresh(
        &self,
        refresh_token_id: &str,
        client: &ClientRecord,
        requested: Option<&Scopes>,
        lifetime_secs: u64,
    ) -> ProviderResult<RefreshedTokens> {
        let Some(record) = self.storage.get(refresh_token_id).await? else {
            tracing::info!(token = %mask(refresh_token_id), "refresh token not found");
            return Err(ProviderError::NotFound);
        };

        if record.revoked {
            tracing::warn!(token = %mask(refresh_token_id), client_id = %client.id, "revoked refresh token presented");
            return Err(ProviderError::Revoked);
        }

        if record.is_expired_at(self.clock.unix_timestamp()) {
            self.storage.delete(refresh_token_id).await?;
            tracing::info!(token = %mask(refresh_token_id), "refresh token expired, removing");
            return Err(ProviderError::Expired);
        }

        if !record.refreshable {
            return Err(ProviderError::invalid_request("token is not refreshable"));
        }

        if record.client_id != client.id {
            tracing::warn!(
                token = %mask(refresh_token_id),
                client_id = %client.id,
                "refresh token presented by another client"
            );
            return Err(ProviderError::ClientMismatch);
        }

        let scopes = match requested {
            Some(requested) if !requested.is_empty() => {
                if !requested.is_subset(&record.scopes) {
                    return Err(ProviderError::ScopeEscalation);
                }
                requested.clone()
            }
            _ => record.scopes.clone(),
        };

        let access_token =
            self.issue_access_token(&record.subject, client, &scopes, lifetime_secs)?;
        let id_token = if scopes.is_openid() {
            Some(self.issue_id_token(&record.subject, client, None, &Map::new(), lifetime_secs)?)
        } else {
            None
        };

        tracing::info!(token = %mask(refresh_token_id), client_id = %client.id, "refreshed tokens");
        Ok(RefreshedTokens {
            access_token,
            id_token,
            scopes,
        })
    }

    /// Revokes a refresh token held by `client`.
    ///
    /// Returns `false` if the token does not exist or was issued to another
    /// client. The second case is indistinguishable from the first to the
    /// caller.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the backend fails.
    pub async fn revoke(
        &self,
        refresh_token_id: &str,
        client: &ClientRecord,
    ) -> ProviderResult<bool> {
        let Some(record) = self.storage.get(refresh_token_id).await? else {
            return Ok(false);
        };
        if record.client_id != client.id {
            tracing::warn!(
                token = %mask(refresh_token_id),
                client_id = %client.id,
                "revocation requested by another client"
            );
            return Ok(false);
        }

        let revoked = self.storage.revoke(refresh_token_id).await?;
        if revoked {
            tracing::info!(token = %mask(refresh_token_id), "revoked refresh token");
        }
        Ok(revoked)
    }

    /// Verifies a token minted by this provider.
    ///
    /// # Errors
    ///
    /// Everything [`KeyManager::verify`] returns, plus `SignatureInvalid`
    /// when the issuer is not this provider.
    pub fn verify(&self, token: &str) -> ProviderResult<Claims> {
        let claims: Claims = self.keys.verify(token)?;
        if claims.iss != self.config.issuer {
            return Err(ProviderError::signature_invalid("issuer mismatch"));
        }
        Ok(claims)
    }

    fn validity(&self, lifetime_secs: u64) -> (i64, i64) {
        let now = self.clock.unix_timestamp();
        let lifetime = i64::try_from(lifetime_secs).unwrap_or(i64::MAX);
        (now, now.saturating_add(lifetime))
    }
}
