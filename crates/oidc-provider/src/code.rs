//! Authorization code lifecycle.
//!
//! [`CodeEngine`] issues codes, redeems them exactly once, and expires them
//! lazily: an expired code is evicted the first time anyone touches it, so
//! no background sweeper is needed.
//!
//! # States
//!
//! ```text
//! issued ──redeem──▶ used      (terminal)
//!    └───expiry───▶ expired   (terminal, evicted on first access)
//! ```

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::clock::Clock;
use crate::observability::mask;
use crate::pkce::PkceMethod;
use crate::storage::{CodeStorage, MarkUsed};
use crate::types::{AuthorizationCode, ClientRecord, Scopes, generate_opaque_id};
use crate::{ProviderError, ProviderResult};

/// Parameters for a new authorization code.
#[derive(Debug, Clone)]
pub struct CodeRequest {
    /// Authenticated principal.
    pub subject: String,
    /// Granted scopes.
    pub scopes: Scopes,
    /// Lifetime in seconds.
    pub lifetime_secs: u64,
    /// Client nonce to echo in the ID token.
    pub nonce: Option<String>,
    /// PKCE challenge.
    pub code_challenge: Option<String>,
    /// PKCE transform. Defaults to `plain` when a challenge is given alone.
    pub code_challenge_method: Option<PkceMethod>,
    /// Extra ID token claims.
    pub specific_claims: Map<String, Value>,
}

impl CodeRequest {
    /// Creates a request with no nonce, PKCE binding or extra claims.
    #[must_use]
    pub fn new(subject: impl Into<String>, scopes: Scopes, lifetime_secs: u64) -> Self {
        Self {
            subject: subject.into(),
            scopes,
            lifetime_secs,
            nonce: None,
            code_challenge: None,
            code_challenge_method: None,
            specific_claims: Map::new(),
        }
    }

    /// Sets the nonce.
    #[must_use]
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    /// Binds the code to a PKCE challenge.
    #[must_use]
    pub fn with_pkce(mut self, challenge: impl Into<String>, method: PkceMethod) -> Self {
        self.code_challenge = Some(challenge.into());
        self.code_challenge_method = Some(method);
        self
    }

    /// Sets the claims merged into the ID token.
    #[must_use]
    pub fn with_specific_claims(mut self, claims: Map<String, Value>) -> Self {
        self.specific_claims = claims;
        self
    }
}

/// Issues, redeems and expires authorization codes.
pub struct CodeEngine {
    storage: Arc<dyn CodeStorage>,
    clock: Arc<dyn Clock>,
}

impl CodeEngine {
    /// Creates an engine over the given store.
    pub fn new(storage: Arc<dyn CodeStorage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    /// Issues and persists a new code for `client`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the code could not be persisted. The code
    /// must not reach the client in that case.
    pub async fn issue(
        &self,
        client: &ClientRecord,
        request: CodeRequest,
    ) -> ProviderResult<AuthorizationCode> {
        let now = self.clock.unix_timestamp();
        let lifetime = i64::try_from(request.lifetime_secs).unwrap_or(i64::MAX);

        let code_challenge_method = match (&request.code_challenge, request.code_challenge_method)
        {
            (Some(_), method) => Some(method.unwrap_or_default()),
            (None, _) => None,
        };

        let code = AuthorizationCode {
            id: generate_opaque_id(),
            client_id: client.id.clone(),
            subject: request.subject,
            scopes: request.scopes,
            nonce: request.nonce,
            code_challenge: request.code_challenge,
            code_challenge_method,
            specific_claims: request.specific_claims,
            expires_at: now.saturating_add(lifetime),
            used: false,
        };

        if let Err(e) = self.storage.put(&code).await {
            tracing::error!(
                code = %mask(&code.id),
                client_id = %client.id,
                error = %e,
                "failed to save authorization code"
            );
            return Err(e);
        }

        tracing::info!(
            code = %mask(&code.id),
            client_id = %client.id,
            expires_at = code.expires_at,
            "issued authorization code"
        );
        Ok(code)
    }

    /// Redeems a code exactly once.
    ///
    /// Checks, in order: existence, expiry, prior use, PKCE. The used flag
    /// is set by the storage layer's atomic check-and-mark, so concurrent
    /// redemptions of one code yield exactly one success.
    ///
    /// A PKCE mismatch leaves the code unused.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Expired` (the code is evicted), `AlreadyUsed`,
    /// `PkceMismatch`, or a storage error.
    pub async fn redeem(
        &self,
        code_id: &str,
        code_verifier: Option<&str>,
    ) -> ProviderResult<AuthorizationCode> {
        let now = self.clock.unix_timestamp();

        // 1. Look up and run the read-only checks
        let Some(current) = self.storage.get(code_id).await? else {
            tracing::info!(code = %mask(code_id), "code not found");
            return Err(ProviderError::NotFound);
        };

        if current.is_expired_at(now) {
            self.evict(code_id).await?;
            return Err(ProviderError::Expired);
        }

        if current.used {
            tracing::warn!(
                code = %mask(code_id),
                client_id = %current.client_id,
                "authorization code replayed"
            );
            return Err(ProviderError::AlreadyUsed);
        }

        // 2. PKCE
        if let Some(challenge) = &current.code_challenge {
            let method = current.code_challenge_method.unwrap_or_default();
            let verifier = code_verifier.unwrap_or_default();
            if !method.verify(challenge, verifier) {
                tracing::info!(code = %mask(code_id), method = %method, "PKCE verification failed");
                return Err(ProviderError::PkceMismatch);
            }
        }

        // 3. Atomic check-and-mark; another request may have won the race
        match self.storage.mark_used_if_unused(code_id, now).await? {
            MarkUsed::Marked(mut code) => {
                code.used = true;
                tracing::info!(code = %mask(code_id), client_id = %code.client_id, "marked code as used");
                Ok(code)
            }
            MarkUsed::AlreadyUsed => {
                tracing::warn!(code = %mask(code_id), "authorization code replayed");
                Err(ProviderError::AlreadyUsed)
            }
            MarkUsed::Expired => {
                tracing::info!(code = %mask(code_id), "code expired, removing");
                Err(ProviderError::Expired)
            }
            MarkUsed::NotFound => Err(ProviderError::NotFound),
        }
    }

    /// Returns a live code, or `None` if it is missing or expired.
    ///
    /// Expired codes are evicted. Used codes are still returned.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the backend fails.
    pub async fn get_by_id(&self, code_id: &str) -> ProviderResult<Option<AuthorizationCode>> {
        let Some(code) = self.storage.get(code_id).await? else {
            return Ok(None);
        };
        if code.is_expired_at(self.clock.unix_timestamp()) {
            self.evict(code_id).await?;
            return Ok(None);
        }
        Ok(Some(code))
    }

    /// Marks a code used without redeeming it.
    ///
    /// Missing, expired and already-used codes are a no-op.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the backend fails.
    pub async fn mark_used_by_id(&self, code_id: &str) -> ProviderResult<()> {
        let now = self.clock.unix_timestamp();
        if let MarkUsed::Marked(_) = self.storage.mark_used_if_unused(code_id, now).await? {
            tracing::info!(code = %mask(code_id), "marked code as used");
        }
        Ok(())
    }

    async fn evict(&self, code_id: &str) -> ProviderResult<()> {
        tracing::info!(code = %mask(code_id), "code expired, removing");
        self.storage.delete(code_id).await
    }
}
