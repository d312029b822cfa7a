//! Provider error types.
//!
//! Every component of the provider core reports failures through
//! [`ProviderError`]. The HTTP layer that sits in front of the core maps
//! errors to OAuth 2.0 error responses via [`ProviderError::oauth_error_code`].

use std::fmt;

/// Errors raised by the provider core.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    // -------------------------------------------------------------------------
    // Client errors
    // -------------------------------------------------------------------------
    /// No client is registered under the presented identifier.
    #[error("Unknown client: {client_id}")]
    UnknownClient {
        /// The client identifier that was looked up.
        client_id: String,
    },

    /// The redirect URI does not exactly match any registered URI.
    #[error("Redirect URI mismatch: {redirect_uri}")]
    RedirectMismatch {
        /// The redirect URI that was presented.
        redirect_uri: String,
    },

    /// The presented client secret is wrong or missing.
    #[error("Invalid client secret")]
    InvalidSecret,

    // -------------------------------------------------------------------------
    // Grant errors
    // -------------------------------------------------------------------------
    /// The code or token does not exist.
    #[error("Grant not found")]
    NotFound,

    /// The code or token is past its expiry instant.
    #[error("Grant expired")]
    Expired,

    /// The authorization code was already redeemed.
    #[error("Authorization code already used")]
    AlreadyUsed,

    /// The code verifier does not match the recorded challenge.
    #[error("PKCE verification failed")]
    PkceMismatch,

    /// A refresh asked for scopes outside the original grant.
    #[error("Requested scope exceeds original grant")]
    ScopeEscalation,

    /// The refresh token was revoked.
    #[error("Token revoked")]
    Revoked,

    /// The grant was issued to a different client.
    #[error("Grant was issued to another client")]
    ClientMismatch,

    /// The host authenticator rejected the resource owner credentials.
    #[error("Invalid resource owner credentials")]
    InvalidCredentials,

    // -------------------------------------------------------------------------
    // Request errors
    // -------------------------------------------------------------------------
    /// The request is malformed or missing a required parameter.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of what is wrong with the request.
        message: String,
    },

    /// The client is not allowed to request this scope.
    #[error("Invalid scope: {scope}")]
    InvalidScope {
        /// The offending scope value.
        scope: String,
    },

    /// The grant type is unknown or disabled.
    #[error("Unsupported grant type: {grant_type}")]
    UnsupportedGrantType {
        /// The grant type that was requested.
        grant_type: String,
    },

    /// The signing algorithm is not one of HS256, RS256 or ES256.
    #[error("Unsupported signing algorithm: {algorithm}")]
    UnsupportedAlgorithm {
        /// The algorithm name that was requested.
        algorithm: String,
    },

    /// Client registration is closed or the registration key is wrong.
    #[error("Client registration denied")]
    RegistrationDenied,

    // -------------------------------------------------------------------------
    // Key errors
    // -------------------------------------------------------------------------
    /// No active signing key is configured for the algorithm.
    #[error("No active signing key for {algorithm}")]
    NoActiveKey {
        /// The algorithm that has no active key.
        algorithm: String,
    },

    /// The token header names a key that is not (or no longer) known.
    #[error("Unknown signing key: {kid}")]
    UnknownKey {
        /// The key identifier from the token header.
        kid: String,
    },

    /// The token is malformed or its signature does not verify.
    #[error("Invalid token signature: {message}")]
    SignatureInvalid {
        /// Description of the verification failure.
        message: String,
    },

    /// Key material could not be generated or parsed.
    #[error("Invalid key material: {message}")]
    InvalidKey {
        /// Description of the key error.
        message: String,
    },

    // -------------------------------------------------------------------------
    // Server errors
    // -------------------------------------------------------------------------
    /// The storage backend failed or is unreachable.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// The provider is misconfigured.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },
}

impl ProviderError {
    // -------------------------------------------------------------------------
    // Constructor Methods
    // -------------------------------------------------------------------------

    /// Create an `UnknownClient` error.
    #[must_use]
    pub fn unknown_client(client_id: impl Into<String>) -> Self {
        Self::UnknownClient {
            client_id: client_id.into(),
        }
    }

    /// Create a `RedirectMismatch` error.
    #[must_use]
    pub fn redirect_mismatch(redirect_uri: impl Into<String>) -> Self {
        Self::RedirectMismatch {
            redirect_uri: redirect_uri.into(),
        }
    }

    /// Create an `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create an `InvalidScope` error.
    #[must_use]
    pub fn invalid_scope(scope: impl Into<String>) -> Self {
        Self::InvalidScope {
            scope: scope.into(),
        }
    }

    /// Create an `UnsupportedGrantType` error.
    #[must_use]
    pub fn unsupported_grant_type(grant_type: impl Into<String>) -> Self {
        Self::UnsupportedGrantType {
            grant_type: grant_type.into(),
        }
    }

    /// Create an `UnsupportedAlgorithm` error.
    #[must_use]
    pub fn unsupported_algorithm(algorithm: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm {
            algorithm: algorithm.into(),
        }
    }

    /// Create a `NoActiveKey` error.
    #[must_use]
    pub fn no_active_key(algorithm: impl fmt::Display) -> Self {
        Self::NoActiveKey {
            algorithm: algorithm.to_string(),
        }
    }

    /// Create an `UnknownKey` error.
    #[must_use]
    pub fn unknown_key(kid: impl Into<String>) -> Self {
        Self::UnknownKey { kid: kid.into() }
    }

    /// Create a `SignatureInvalid` error.
    #[must_use]
    pub fn signature_invalid(message: impl Into<String>) -> Self {
        Self::SignatureInvalid {
            message: message.into(),
        }
    }

    /// Create an `InvalidKey` error.
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Create a `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    // -------------------------------------------------------------------------
    // Predicate Methods
    // -------------------------------------------------------------------------

    /// Returns `true` if the failure was caused by the request or the client.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Returns `true` if the failure is on the provider side.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::NoActiveKey { .. }
                | Self::UnknownKey { .. }
                | Self::SignatureInvalid { .. }
                | Self::InvalidKey { .. }
                | Self::Storage { .. }
                | Self::Configuration { .. }
        )
    }

    /// Returns `true` if the grant can never succeed again.
    ///
    /// Used codes, expired grants and revoked tokens fall into this bucket.
    #[must_use]
    pub fn is_terminal_grant_state(&self) -> bool {
        matches!(self, Self::AlreadyUsed | Self::Expired | Self::Revoked)
    }

    /// Get the OAuth 2.0 error code for this error.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::UnknownClient { .. } | Self::InvalidSecret => "invalid_client",
            Self::NotFound
            | Self::Expired
            | Self::AlreadyUsed
            | Self::PkceMismatch
            | Self::ScopeEscalation
            | Self::Revoked
            | Self::ClientMismatch
            | Self::InvalidCredentials
            | Self::RedirectMismatch { .. } => "invalid_grant",
            Self::InvalidRequest { .. } | Self::UnsupportedAlgorithm { .. } => "invalid_request",
            Self::InvalidScope { .. } => "invalid_scope",
            Self::UnsupportedGrantType { .. } => "unsupported_grant_type",
            Self::RegistrationDenied => "access_denied",
            Self::NoActiveKey { .. }
            | Self::UnknownKey { .. }
            | Self::SignatureInvalid { .. }
            | Self::InvalidKey { .. }
            | Self::Storage { .. }
            | Self::Configuration { .. } => "server_error",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for ProviderError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidKeyFormat => Self::invalid_key(err.to_string()),
            _ => Self::signature_invalid(err.to_string()),
        }
    }
}
