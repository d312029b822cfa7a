//! Protocol orchestration.
//!
//! [`Provider`] composes the client registry, code engine, token engine and
//! key manager into the two protocol exchanges the HTTP layer exposes:
//! `authorize` and `token`.
//!
//! # Authorization transaction
//!
//! ```text
//! Requested → ClientValidated → Authenticated → CodeIssued
//!                                                  ├─▶ Redeemed → TokensIssued
//!                                                  ├─▶ Expired
//!                                                  └─▶ Abandoned
//! ```
//!
//! The host application authenticates the user before calling
//! [`Provider::authorize`]; the provider only ever sees the resulting subject.
//!
//! # Example
//!
//! ```ignore
//! let config = ProviderConfig::default();
//! let provider = Provider::from_config(config)?;
//!
//! let response = provider
//!     .authorize(request.with_subject(session.user_id()))
//!     .await?;
//! redirect_to(response.to_redirect_url()?);
//! ```

pub mod protocol;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::client::{ClientRegistry, RegisterClient};
use crate::clock::{Clock, SystemClock};
use crate::code::{CodeEngine, CodeRequest};
use crate::config::{ProviderConfig, StorageBackendKind};
use crate::keys::{Jwks, KeyManager, SigningKey};
use crate::observability::{self, mask};
use crate::pkce::PkceMethod;
use crate::storage::{
    ClientStorage, CodeStorage, InMemoryClientStorage, InMemoryCodeStorage, InMemoryTokenStorage,
    TokenStorage,
};
use crate::token::{Claims, TokenConfig, TokenEngine};
use crate::types::{ClientRecord, GrantType, Scopes, SigningAlgorithm};
use crate::{ProviderError, ProviderResult};

pub use protocol::{
    AuthorizationRequest, AuthorizationResponse, ErrorResponse, TokenRequest, TokenResponse,
};

/// Only response type the provider issues.
pub const RESPONSE_TYPE_CODE: &str = "code";

// =============================================================================
// Password grant
// =============================================================================

/// A resource owner authenticated by the host application.
#[derive(Debug, Clone, Default)]
pub struct AuthenticatedUser {
    /// Subject placed in `sub`.
    pub subject: String,
    /// Extra ID token claims.
    pub claims: Map<String, Value>,
}

impl AuthenticatedUser {
    /// Creates a user with no extra claims.
    #[must_use]
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            claims: Map::new(),
        }
    }
}

/// Checks resource owner credentials for the password grant.
///
/// Credential checking belongs to the host application. Return `Ok(None)`
/// for wrong credentials and reserve errors for backend failures.
#[async_trait]
pub trait PasswordAuthenticator: Send + Sync {
    /// Authenticates a username and password.
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> ProviderResult<Option<AuthenticatedUser>>;
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`Provider`].
///
/// Storage defaults to the in-memory backend. Selecting the Redis backend in
/// configuration requires all three stores to be supplied.
pub struct ProviderBuilder {
    config: ProviderConfig,
    keys: Arc<KeyManager>,
    code_storage: Option<Arc<dyn CodeStorage>>,
    token_storage: Option<Arc<dyn TokenStorage>>,
    client_storage: Option<Arc<dyn ClientStorage>>,
    clock: Arc<dyn Clock>,
    password_authenticator: Option<Arc<dyn PasswordAuthenticator>>,
}

impl ProviderBuilder {
    /// Sets the authorization code store.
    #[must_use]
    pub fn with_code_storage(mut self, storage: Arc<dyn CodeStorage>) -> Self {
        self.code_storage = Some(storage);
        self
    }

    /// Sets the token record store.
    #[must_use]
    pub fn with_token_storage(mut self, storage: Arc<dyn TokenStorage>) -> Self {
        self.token_storage = Some(storage);
        self
    }

    /// Sets the client store.
    #[must_use]
    pub fn with_client_storage(mut self, storage: Arc<dyn ClientStorage>) -> Self {
        self.client_storage = Some(storage);
        self
    }

    /// Sets the clock used by the code and token engines.
    ///
    /// The key manager keeps the clock it was built with.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Installs the password grant authenticator.
    #[must_use]
    pub fn with_password_authenticator(
        mut self,
        authenticator: Arc<dyn PasswordAuthenticator>,
    ) -> Self {
        self.password_authenticator = Some(authenticator);
        self
    }

    /// Builds the provider.
    ///
    /// # Errors
    ///
    /// - `Configuration` if the Redis backend is configured but a store is
    ///   missing
    /// - `NoActiveKey` if the default algorithm has no signing key
    pub fn build(self) -> ProviderResult<Provider> {
        let durable = self.config.storage.backend == StorageBackendKind::Redis;
        if durable
            && (self.code_storage.is_none()
                || self.token_storage.is_none()
                || self.client_storage.is_none())
        {
            return Err(ProviderError::configuration(
                "redis storage backend selected but no redis stores were supplied",
            ));
        }

        self.keys.ensure_active(&[self.config.keys.default_algorithm])?;

        let code_storage = self
            .code_storage
            .unwrap_or_else(|| Arc::new(InMemoryCodeStorage::new()));
        let token_storage = self
            .token_storage
            .unwrap_or_else(|| Arc::new(InMemoryTokenStorage::new()));
        let client_storage = self
            .client_storage
            .unwrap_or_else(|| Arc::new(InMemoryClientStorage::new()));

        let token_config = TokenConfig::new(self.config.issuer.clone())
            .with_refresh_token_lifetime(self.config.refresh_token_lifetime.as_secs());

        tracing::info!(
            issuer = %self.config.issuer,
            backend = ?self.config.storage.backend,
            default_algorithm = %self.config.keys.default_algorithm,
            password_grant = self.config.grant_type_password,
            "provider initialized"
        );

        Ok(Provider {
            clients: ClientRegistry::new(client_storage),
            codes: CodeEngine::new(code_storage, self.clock.clone()),
            tokens: TokenEngine::new(
                self.keys.clone(),
                token_storage,
                self.clock,
                token_config,
            ),
            keys: self.keys,
            password_authenticator: self.password_authenticator,
            config: self.config,
        })
    }
}

// =============================================================================
// Provider
// =============================================================================

/// The OpenID Connect provider core.
///
/// Construct once at startup and share it (e.g. in an `Arc`) with request
/// handlers. It holds no per-request state.
pub struct Provider {
    config: ProviderConfig,
    clients: ClientRegistry,
    codes: CodeEngine,
    tokens: TokenEngine,
    keys: Arc<KeyManager>,
    password_authenticator: Option<Arc<dyn PasswordAuthenticator>>,
}

impl Provider {
    /// Starts building a provider around an existing key manager.
    pub fn builder(config: ProviderConfig, keys: Arc<KeyManager>) -> ProviderBuilder {
        ProviderBuilder {
            config,
            keys,
            code_storage: None,
            token_storage: None,
            client_storage: None,
            clock: Arc::new(SystemClock),
            password_authenticator: None,
        }
    }

    /// Builds an in-memory provider with keys loaded from configuration.
    ///
    /// Also installs the tracing subscriber at `logging.level` unless
    /// `RUST_LOG` is set or a subscriber is already installed.
    ///
    /// # Errors
    ///
    /// Key loading errors, plus everything [`ProviderBuilder::build`] returns.
    pub fn from_config(config: ProviderConfig) -> ProviderResult<Self> {
        observability::init_tracing_with_level(&config.logging.level);

        let keys = KeyManager::from_config(&config.keys, Arc::new(SystemClock))?;
        Self::builder(config, Arc::new(keys)).build()
    }

    // -------------------------------------------------------------------------
    // Authorization endpoint
    // -------------------------------------------------------------------------

    /// Issues an authorization code for an authenticated subject.
    ///
    /// `UnknownClient` and `RedirectMismatch` must be shown to the user
    /// rather than redirected, since the redirect target is not trusted.
    ///
    /// # Errors
    ///
    /// - `UnknownClient` if the client is not registered
    /// - `RedirectMismatch` if the redirect URI is not registered exactly
    /// - `InvalidRequest` for a response type other than `code`, a missing
    ///   subject, or a bad PKCE method
    /// - `InvalidScope` if a scope is not allowed for the client
    /// - a storage error if the code could not be persisted
    pub async fn authorize(
        &self,
        request: AuthorizationRequest,
    ) -> ProviderResult<AuthorizationResponse> {
        // 1. Client and redirect
        let client = self.clients.resolve(&request.client_id).await?;
        self.clients
            .validate_redirect(&client, &request.redirect_uri)?;

        // 2. Request parameters
        if request.response_type != RESPONSE_TYPE_CODE {
            return Err(ProviderError::invalid_request(format!(
                "unsupported response_type: {}",
                request.response_type
            )));
        }
        if request.subject.is_empty() {
            return Err(ProviderError::invalid_request("no authenticated subject"));
        }

        let scopes = Scopes::parse(&request.scope);
        Self::check_allowed_scopes(&client, &scopes)?;

        let method = match (&request.code_challenge, &request.code_challenge_method) {
            (Some(_), Some(method)) => Some(PkceMethod::parse(method)?),
            (Some(_), None) => None,
            (None, Some(_)) => {
                return Err(ProviderError::invalid_request(
                    "code_challenge_method without code_challenge",
                ));
            }
            (None, None) => None,
        };

        // 3. Issue
        let mut code_request =
            CodeRequest::new(request.subject, scopes, self.config.code_lifetime_secs())
                .with_specific_claims(request.specific_claims);
        code_request.nonce = request.nonce;
        code_request.code_challenge = request.code_challenge;
        code_request.code_challenge_method = method;

        let code = self.codes.issue(&client, code_request).await?;

        Ok(AuthorizationResponse {
            code: code.id,
            state: request.state,
            redirect_uri: request.redirect_uri,
        })
    }

    // -------------------------------------------------------------------------
    // Token endpoint
    // -------------------------------------------------------------------------

    /// Exchanges a grant for tokens.
    ///
    /// # Errors
    ///
    /// - `UnsupportedGrantType` for unknown grants, or `password` when it is
    ///   disabled
    /// - `InvalidRequest` for missing parameters
    /// - `UnknownClient` or `InvalidSecret` if client authentication fails
    /// - the grant-specific errors of [`CodeEngine::redeem`] and
    ///   [`TokenEngine::refresh`]
    pub async fn token(&self, request: TokenRequest) -> ProviderResult<TokenResponse> {
        let grant_type = GrantType::parse(&request.grant_type)?;

        let client_id = required(request.client_id.as_deref(), "client_id")?;
        let client = self
            .clients
            .authenticate(client_id, request.client_secret.as_deref())
            .await?;
        // Fail before a grant is consumed, not after
        self.keys.ensure_active(&[client.signature_algorithm])?;

        let result = match grant_type {
            GrantType::AuthorizationCode => self.exchange_code(&client, &request).await,
            GrantType::RefreshToken => self.exchange_refresh_token(&client, &request).await,
            GrantType::Password => self.exchange_password(&client, &request).await,
        };

        if let Err(e) = &result {
            tracing::info!(
                client_id = %client.id,
                grant_type = %grant_type,
                error = %e,
                "token request failed"
            );
        }
        result
    }

    async fn exchange_code(
        &self,
        client: &ClientRecord,
        request: &TokenRequest,
    ) -> ProviderResult<TokenResponse> {
        let code_id = required(request.code.as_deref(), "code")?;
        if let Some(redirect_uri) = &request.redirect_uri {
            self.clients.validate_redirect(client, redirect_uri)?;
        }

        let code = self
            .codes
            .redeem(code_id, request.code_verifier.as_deref())
            .await?;

        // The code is spent at this point, even for the wrong client
        if code.client_id != client.id {
            tracing::warn!(
                code = %mask(code_id),
                client_id = %client.id,
                "authorization code presented by another client"
            );
            return Err(ProviderError::ClientMismatch);
        }

        let lifetime = self.config.token_lifetime_secs();
        let access_token =
            self.tokens
                .issue_access_token(&code.subject, client, &code.scopes, lifetime)?;
        let id_token = if code.scopes.is_openid() {
            Some(self.tokens.issue_id_token(
                &code.subject,
                client,
                code.nonce.as_deref(),
                &code.specific_claims,
                lifetime,
            )?)
        } else {
            None
        };
        let refresh_token = if self.config.issue_refresh_tokens {
            Some(
                self.tokens
                    .issue_refresh_token(&code.subject, &client.id, &code.scopes, Some(&code.id))
                    .await?
                    .id,
            )
        } else {
            None
        };

        Ok(
            TokenResponse::new(access_token.token, lifetime, code.scopes.to_string())
                .with_id_token(id_token.map(|t| t.token))
                .with_refresh_token(refresh_token),
        )
    }

    async fn exchange_refresh_token(
        &self,
        client: &ClientRecord,
        request: &TokenRequest,
    ) -> ProviderResult<TokenResponse> {
        let refresh_token = required(request.refresh_token.as_deref(), "refresh_token")?;
        let requested = request.scope.as_deref().map(Scopes::parse);
        let lifetime = self.config.token_lifetime_secs();

        let refreshed = self
            .tokens
            .refresh(refresh_token, client, requested.as_ref(), lifetime)
            .await?;

        // Refresh tokens are not rotated; the client keeps using the same one
        Ok(TokenResponse::new(
            refreshed.access_token.token,
            lifetime,
            refreshed.scopes.to_string(),
        )
        .with_id_token(refreshed.id_token.map(|t| t.token))
        .with_refresh_token(Some(refresh_token.to_string())))
    }

    async fn exchange_password(
        &self,
        client: &ClientRecord,
        request: &TokenRequest,
    ) -> ProviderResult<TokenResponse> {
        let authenticator = match &self.password_authenticator {
            Some(authenticator) if self.config.grant_type_password => authenticator,
            _ => return Err(ProviderError::unsupported_grant_type(GrantType::Password.as_str())),
        };

        let username = required(request.username.as_deref(), "username")?;
        let password = required(request.password.as_deref(), "password")?;

        let scopes = match request.scope.as_deref() {
            Some(scope) => Scopes::parse(scope),
            None => client.scopes_allowed.clone(),
        };
        Self::check_allowed_scopes(client, &scopes)?;

        let Some(user) = authenticator.authenticate(username, password).await? else {
            tracing::warn!(client_id = %client.id, "password grant rejected");
            return Err(ProviderError::InvalidCredentials);
        };

        let lifetime = self.config.token_lifetime_secs();
        let access_token =
            self.tokens
                .issue_access_token(&user.subject, client, &scopes, lifetime)?;
        let id_token = if scopes.is_openid() {
            Some(self.tokens.issue_id_token(
                &user.subject,
                client,
                None,
                &user.claims,
                lifetime,
            )?)
        } else {
            None
        };
        let refresh_token = if self.config.issue_refresh_tokens {
            Some(
                self.tokens
                    .issue_refresh_token(&user.subject, &client.id, &scopes, None)
                    .await?
                    .id,
            )
        } else {
            None
        };

        Ok(TokenResponse::new(access_token.token, lifetime, scopes.to_string())
            .with_id_token(id_token.map(|t| t.token))
            .with_refresh_token(refresh_token))
    }

    fn check_allowed_scopes(client: &ClientRecord, scopes: &Scopes) -> ProviderResult<()> {
        match scopes.first_outside(&client.scopes_allowed) {
            Some(scope) => Err(ProviderError::invalid_scope(scope)),
            None => Ok(()),
        }
    }

    // -------------------------------------------------------------------------
    // Tokens and clients
    // -------------------------------------------------------------------------

    /// Revokes a refresh token on behalf of an authenticated client.
    ///
    /// Returns `false` if the token does not exist or belongs to another
    /// client.
    ///
    /// # Errors
    ///
    /// `UnknownClient`, `InvalidSecret`, or a storage error.
    pub async fn revoke_token(
        &self,
        token: &str,
        client_id: &str,
        client_secret: Option<&str>,
    ) -> ProviderResult<bool> {
        let client = self.clients.authenticate(client_id, client_secret).await?;
        self.tokens.revoke(token, &client).await
    }

    /// Verifies an access or ID token issued by this provider.
    ///
    /// # Errors
    ///
    /// See [`TokenEngine::verify`].
    pub fn verify_token(&self, token: &str) -> ProviderResult<Claims> {
        self.tokens.verify(token)
    }

    /// Registers a client under the configured registration policy.
    ///
    /// # Errors
    ///
    /// - `RegistrationDenied` if registration is closed and the key is wrong
    /// - `NoActiveKey` if the requested algorithm has no signing key
    /// - the validation errors of [`ClientRegistry::register`]
    pub async fn register_client(
        &self,
        request: RegisterClient,
        registration_key: Option<&str>,
    ) -> ProviderResult<ClientRecord> {
        if !self.config.registration.permits(registration_key) {
            tracing::warn!("client registration denied");
            return Err(ProviderError::RegistrationDenied);
        }
        if !self.keys.has_active(request.signature_algorithm) {
            return Err(ProviderError::no_active_key(request.signature_algorithm));
        }
        self.clients.register(request).await
    }

    // -------------------------------------------------------------------------
    // Keys
    // -------------------------------------------------------------------------

    /// Public keys for the JWK-publishing endpoint.
    #[must_use]
    pub fn public_key_set(&self) -> Jwks {
        self.keys.public_key_set()
    }

    /// Generates a fresh key for `algorithm` and rotates it in.
    ///
    /// Returns the new kid.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if key generation fails or the kid is taken.
    pub fn rotate_key(&self, algorithm: SigningAlgorithm) -> ProviderResult<String> {
        let key = SigningKey::generate(algorithm)?;
        let kid = key.kid().to_string();
        self.keys.rotate(key)?;
        Ok(kid)
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Returns the provider configuration.
    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    #[must_use]
    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    #[must_use]
    pub fn codes(&self) -> &CodeEngine {
        &self.codes
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenEngine {
        &self.tokens
    }

    #[must_use]
    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }
}

fn required<'a>(value: Option<&'a str>, name: &str) -> ProviderResult<&'a str> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ProviderError::invalid_request(format!("{name} is required"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::keys::SymmetricKey;
    use crate::pkce::challenge_for;
    use std::time::Duration;

    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

    struct StaticAuthenticator;

    #[async_trait]
    impl PasswordAuthenticator for StaticAuthenticator {
        async fn authenticate(
            &self,
            username: &str,
            password: &str,
        ) -> ProviderResult<Option<AuthenticatedUser>> {
            if username == "alice" && password == "wonderland" {
                let mut user = AuthenticatedUser::new("alice");
                user.claims
                    .insert("email".to_string(), Value::from("alice@example.com"));
                Ok(Some(user))
            } else {
                Ok(None)
            }
        }
    }

    fn test_config() -> ProviderConfig {
        let mut config = ProviderConfig {
            issuer: "https://id.example.com".to_string(),
            code_lifetime: Duration::from_secs(600),
            token_lifetime: Duration::from_secs(3600),
            ..Default::default()
        };
        config.keys.default_algorithm = SigningAlgorithm::ES256;
        config
    }

    fn test_provider(config: ProviderConfig) -> (Provider, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let keys = Arc::new(KeyManager::new(clock.clone(), Duration::from_secs(86400)));
        keys.generate(SigningAlgorithm::ES256).unwrap();
        keys.insert(SymmetricKey::new("hs", b"0123456789abcdef0123456789abcdef")).unwrap();

        let provider = Provider::builder(config, keys)
            .with_clock(clock.clone())
            .with_password_authenticator(Arc::new(StaticAuthenticator))
            .build()
            .unwrap();
        (provider, clock)
    }

    async fn register(provider: &Provider) -> ClientRecord {
        provider
            .register_client(
                RegisterClient::new(
                    vec!["https://app/cb".to_string()],
                    Scopes::parse("openid profile email"),
                )
                .with_signature_algorithm(SigningAlgorithm::ES256),
                None,
            )
            .await
            .unwrap()
    }

    fn authorization_request(client: &ClientRecord) -> AuthorizationRequest {
        AuthorizationRequest {
            client_id: client.id.clone(),
            redirect_uri: "https://app/cb".to_string(),
            scope: "openid profile".to_string(),
            response_type: "code".to_string(),
            nonce: Some("n-1".to_string()),
            state: Some("s-1".to_string()),
            ..Default::default()
        }
        .with_subject("alice")
    }

    fn code_request(client: &ClientRecord, code: &str) -> TokenRequest {
        TokenRequest::authorization_code(code)
            .with_client(&client.id, client.secret.as_deref())
            .with_redirect_uri("https://app/cb")
    }

    #[tokio::test]
    async fn test_authorization_code_flow() {
        let (provider, _) = test_provider(test_config());
        let client = register(&provider).await;

        let authorized = provider
            .authorize(authorization_request(&client))
            .await
            .unwrap();
        assert_eq!(authorized.state.as_deref(), Some("s-1"));
        assert!(
            authorized
                .to_redirect_url()
                .unwrap()
                .starts_with("https://app/cb?code=")
        );

        let response = provider
            .token(code_request(&client, &authorized.code))
            .await
            .unwrap();
        assert_eq!(response.token_type, "Bearer");
        assert_eq!(response.expires_in, 3600);
        assert_eq!(response.scope, "openid profile");
        assert!(response.refresh_token.is_some());

        let access = provider.verify_token(&response.access_token).unwrap();
        assert_eq!(access.sub, "alice");
        assert_eq!(access.aud, client.id);

        let id_token = provider
            .verify_token(response.id_token.as_deref().unwrap())
            .unwrap();
        assert_eq!(id_token.nonce.as_deref(), Some("n-1"));

        let err = provider
            .token(code_request(&client, &authorized.code))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AlreadyUsed));
        assert_eq!(err.oauth_error_code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_authorize_validation() {
        let (provider, _) = test_provider(test_config());
        let client = register(&provider).await;

        let mut request = authorization_request(&client);
        request.client_id = "unknown".to_string();
        let err = provider.authorize(request).await.unwrap_err();
        assert!(matches!(err, ProviderError::UnknownClient { .. }));

        let mut request = authorization_request(&client);
        request.redirect_uri = "https://app/cb/../evil".to_string();
        let err = provider.authorize(request).await.unwrap_err();
        assert!(matches!(err, ProviderError::RedirectMismatch { .. }));

        let mut request = authorization_request(&client);
        request.response_type = "token".to_string();
        let err = provider.authorize(request).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest { .. }));

        let mut request = authorization_request(&client);
        request.scope = "openid admin".to_string();
        let err = provider.authorize(request).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidScope { ref scope } if scope == "admin"));

        let mut request = authorization_request(&client);
        request.code_challenge = Some("abc".to_string());
        request.code_challenge_method = Some("S512".to_string());
        let err = provider.authorize(request).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest { .. }));

        let mut request = authorization_request(&client);
        request.subject = String::new();
        let err = provider.authorize(request).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_pkce_through_token_endpoint() {
        let (provider, _) = test_provider(test_config());
        let client = register(&provider).await;

        let mut request = authorization_request(&client);
        request.code_challenge = Some(challenge_for(VERIFIER, PkceMethod::S256));
        request.code_challenge_method = Some("S256".to_string());
        let authorized = provider.authorize(request).await.unwrap();

        let err = provider
            .token(code_request(&client, &authorized.code).with_code_verifier("wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::PkceMismatch));

        let response = provider
            .token(code_request(&client, &authorized.code).with_code_verifier(VERIFIER))
            .await;
        assert!(response.is_ok());
    }

    #[tokio::test]
    async fn test_token_client_authentication() {
        let (provider, _) = test_provider(test_config());
        let client = register(&provider).await;
        let authorized = provider
            .authorize(authorization_request(&client))
            .await
            .unwrap();

        let err = provider
            .token(TokenRequest::authorization_code(&authorized.code).with_client(&client.id, Some("nope")))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidSecret));

        let err = provider
            .token(TokenRequest::authorization_code(&authorized.code))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest { .. }));

        let err = provider
            .token(code_request(&client, &authorized.code).with_redirect_uri("https://other/cb"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::RedirectMismatch { .. }));

        // failed client checks leave the code redeemable
        assert!(provider.token(code_request(&client, &authorized.code)).await.is_ok());
    }

    #[tokio::test]
    async fn test_code_presented_by_other_client() {
        let (provider, _) = test_provider(test_config());
        let owner = register(&provider).await;
        let thief = register(&provider).await;
        let authorized = provider
            .authorize(authorization_request(&owner))
            .await
            .unwrap();

        let err = provider
            .token(code_request(&thief, &authorized.code))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ClientMismatch));

        let err = provider
            .token(code_request(&owner, &authorized.code))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AlreadyUsed));
    }

    #[tokio::test]
    async fn test_expired_code() {
        let (provider, clock) = test_provider(test_config());
        let client = register(&provider).await;
        let authorized = provider
            .authorize(authorization_request(&client))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(700));

        let err = provider
            .token(code_request(&client, &authorized.code))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Expired));
        assert!(provider.codes().get_by_id(&authorized.code).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_grant() {
        let (provider, _) = test_provider(test_config());
        let client = register(&provider).await;
        let authorized = provider
            .authorize(authorization_request(&client))
            .await
            .unwrap();
        let first = provider
            .token(code_request(&client, &authorized.code))
            .await
            .unwrap();
        let refresh_token = first.refresh_token.unwrap();

        let refreshed = provider
            .token(
                TokenRequest::refresh_token(&refresh_token)
                    .with_client(&client.id, client.secret.as_deref())
                    .with_scope("profile"),
            )
            .await
            .unwrap();
        assert_eq!(refreshed.scope, "profile");
        assert!(refreshed.id_token.is_none());
        assert_eq!(refreshed.refresh_token.as_deref(), Some(refresh_token.as_str()));

        let err = provider
            .token(
                TokenRequest::refresh_token(&refresh_token)
                    .with_client(&client.id, client.secret.as_deref())
                    .with_scope("openid email"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ScopeEscalation));

        assert!(
            provider
                .revoke_token(&refresh_token, &client.id, client.secret.as_deref())
                .await
                .unwrap()
        );
        let err = provider
            .token(
                TokenRequest::refresh_token(&refresh_token)
                    .with_client(&client.id, client.secret.as_deref()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Revoked));
    }

    #[tokio::test]
    async fn test_revoke_token_requires_owning_client() {
        let (provider, _) = test_provider(test_config());
        let owner = register(&provider).await;
        let other = register(&provider).await;
        let authorized = provider
            .authorize(authorization_request(&owner))
            .await
            .unwrap();
        let refresh_token = provider
            .token(code_request(&owner, &authorized.code))
            .await
            .unwrap()
            .refresh_token
            .unwrap();

        assert!(
            !provider
                .revoke_token(&refresh_token, &other.id, other.secret.as_deref())
                .await
                .unwrap()
        );

        let refreshed = provider
            .token(
                TokenRequest::refresh_token(&refresh_token)
                    .with_client(&owner.id, owner.secret.as_deref()),
            )
            .await
            .unwrap();
        assert_eq!(refreshed.scope, "openid profile");
    }

    #[tokio::test]
    async fn test_missing_signing_key_leaves_code_redeemable() {
        let clock = Arc::new(ManualClock::starting_now());
        let keys = Arc::new(KeyManager::new(clock.clone(), Duration::from_secs(86400)));
        keys.generate(SigningAlgorithm::ES256).unwrap();

        let seeded = ClientRecord {
            id: "seeded".to_string(),
            secret: Some("secret".to_string()),
            name: None,
            redirect_uris: vec!["https://app/cb".to_string()],
            signature_algorithm: SigningAlgorithm::HS256,
            scopes_allowed: Scopes::parse("openid profile"),
            created_at: time::OffsetDateTime::UNIX_EPOCH,
        };
        let provider = Provider::builder(test_config(), keys.clone())
            .with_clock(clock)
            .with_client_storage(Arc::new(InMemoryClientStorage::with_clients([
                seeded.clone(),
            ])))
            .build()
            .unwrap();

        let authorized = provider
            .authorize(authorization_request(&seeded))
            .await
            .unwrap();
        let err = provider
            .token(code_request(&seeded, &authorized.code))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NoActiveKey { .. }));
        assert!(
            !provider
                .codes()
                .get_by_id(&authorized.code)
                .await
                .unwrap()
                .unwrap()
                .used
        );

        keys.insert(SymmetricKey::new("hs", b"0123456789abcdef0123456789abcdef")).unwrap();
        let response = provider
            .token(code_request(&seeded, &authorized.code))
            .await
            .unwrap();
        assert!(response.id_token.is_some());
    }

    #[tokio::test]
    async fn test_refresh_tokens_disabled() {
        let mut config = test_config();
        config.issue_refresh_tokens = false;
        let (provider, _) = test_provider(config);
        let client = register(&provider).await;
        let authorized = provider
            .authorize(authorization_request(&client))
            .await
            .unwrap();

        let response = provider
            .token(code_request(&client, &authorized.code))
            .await
            .unwrap();
        assert!(response.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_password_grant() {
        let (provider, _) = test_provider(test_config());
        let client = register(&provider).await;
        let request = || {
            TokenRequest::password("alice", "wonderland")
                .with_client(&client.id, client.secret.as_deref())
                .with_scope("openid email")
        };

        // disabled by default
        let err = provider.token(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::UnsupportedGrantType { .. }));

        let mut config = test_config();
        config.grant_type_password = true;
        let (provider, _) = test_provider(config);
        let client = register(&provider).await;
        let request = |password: &str| {
            TokenRequest::password("alice", password)
                .with_client(&client.id, client.secret.as_deref())
                .with_scope("openid email")
        };

        let response = provider.token(request("wonderland")).await.unwrap();
        let id_token = provider
            .verify_token(response.id_token.as_deref().unwrap())
            .unwrap();
        assert_eq!(id_token.sub, "alice");
        assert_eq!(id_token.extra["email"], "alice@example.com");

        let err = provider.token(request("guess")).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_unsupported_grant_type() {
        let (provider, _) = test_provider(test_config());
        let err = provider
            .token(TokenRequest {
                grant_type: "client_credentials".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "unsupported_grant_type");
    }

    #[tokio::test]
    async fn test_registration_policy() {
        let mut config = test_config();
        config.registration.open = false;
        config.registration.registration_key = Some("let-me-in".to_string());
        let (provider, _) = test_provider(config);
        let request = || RegisterClient::new(vec!["https://app/cb".to_string()], Scopes::parse("openid"));

        let err = provider.register_client(request(), None).await.unwrap_err();
        assert!(matches!(err, ProviderError::RegistrationDenied));
        let err = provider
            .register_client(request(), Some("wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::RegistrationDenied));

        // RS256 has no key in the test ring
        let err = provider
            .register_client(request(), Some("let-me-in"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NoActiveKey { .. }));

        let client = provider
            .register_client(
                request().with_signature_algorithm(SigningAlgorithm::HS256),
                Some("let-me-in"),
            )
            .await
            .unwrap();
        assert_eq!(client.signature_algorithm, SigningAlgorithm::HS256);
    }

    #[tokio::test]
    async fn test_rotate_key_keeps_old_tokens_valid() {
        let (provider, _) = test_provider(test_config());
        let client = register(&provider).await;
        let authorized = provider
            .authorize(authorization_request(&client))
            .await
            .unwrap();
        let before = provider
            .token(code_request(&client, &authorized.code))
            .await
            .unwrap();

        let new_kid = provider.rotate_key(SigningAlgorithm::ES256).unwrap();
        assert_eq!(provider.keys().active_kid(SigningAlgorithm::ES256), Some(new_kid));
        assert_eq!(provider.public_key_set().keys.len(), 2);
        assert!(provider.verify_token(&before.access_token).is_ok());
    }

    #[test]
    fn test_build_requires_active_default_key() {
        let clock = Arc::new(ManualClock::starting_now());
        let keys = Arc::new(KeyManager::new(clock, Duration::from_secs(60)));
        let err = Provider::builder(test_config(), keys).build().err().unwrap();
        assert!(matches!(err, ProviderError::NoActiveKey { .. }));
    }

    #[tokio::test]
    async fn test_from_config_bootstrap() {
        let mut config = test_config();
        config.logging.level = "debug".to_string();
        config.keys.hs256_secret = Some("0123456789abcdef0123456789abcdef".to_string());

        let provider = Provider::from_config(config).unwrap();
        assert!(provider.keys().has_active(SigningAlgorithm::ES256));
        assert!(provider.keys().has_active(SigningAlgorithm::HS256));
        assert_eq!(provider.public_key_set().keys.len(), 2);

        let client = register(&provider).await;
        let authorized = provider
            .authorize(authorization_request(&client))
            .await
            .unwrap();
        assert!(
            provider
                .token(code_request(&client, &authorized.code))
                .await
                .is_ok()
        );
    }

    #[test]
    fn test_build_redis_without_stores() {
        let mut config = test_config();
        config.storage.backend = StorageBackendKind::Redis;
        let clock = Arc::new(ManualClock::starting_now());
        let keys = Arc::new(KeyManager::new(clock, Duration::from_secs(60)));
        keys.generate(SigningAlgorithm::ES256).unwrap();

        let err = Provider::builder(config, keys).build().err().unwrap();
        assert!(matches!(err, ProviderError::Configuration { .. }));
    }
}
