//! Request and response shapes exchanged with the HTTP layer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ProviderError;

// =============================================================================
// Authorization endpoint
// =============================================================================

/// An authorization request for a principal the host has already
/// authenticated.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizationRequest {
    /// Client identifier.
    pub client_id: String,

    /// Redirect URI; must be registered exactly.
    pub redirect_uri: String,

    /// Space-delimited scopes.
    #[serde(default)]
    pub scope: String,

    /// Must be `code`.
    pub response_type: String,

    /// Authenticated principal, supplied by the host application.
    #[serde(skip)]
    pub subject: String,

    /// Client nonce, echoed in the ID token.
    #[serde(default)]
    pub nonce: Option<String>,

    /// PKCE code challenge.
    #[serde(default)]
    pub code_challenge: Option<String>,

    /// PKCE method (`plain` or `S256`).
    #[serde(default)]
    pub code_challenge_method: Option<String>,

    /// Opaque client state, returned unchanged.
    #[serde(default)]
    pub state: Option<String>,

    /// Extra ID token claims chosen by the host.
    #[serde(skip)]
    pub specific_claims: Map<String, Value>,
}

impl AuthorizationRequest {
    /// Sets the authenticated subject.
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Sets the extra ID token claims.
    #[must_use]
    pub fn with_specific_claims(mut self, claims: Map<String, Value>) -> Self {
        self.specific_claims = claims;
        self
    }
}

/// A successful authorization decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationResponse {
    /// The authorization code.
    pub code: String,

    /// State from the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// The validated redirect URI.
    #[serde(skip)]
    pub redirect_uri: String,
}

impl AuthorizationResponse {
    /// Builds the redirect URL carrying `code` and `state`.
    ///
    /// # Errors
    ///
    /// Returns a parse error if the redirect URI is not a valid URL.
    pub fn to_redirect_url(&self) -> Result<String, url::ParseError> {
        let mut url = url::Url::parse(&self.redirect_uri)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("code", &self.code);
            if let Some(ref state) = self.state {
                pairs.append_pair("state", state);
            }
        }
        Ok(url.to_string())
    }
}

// =============================================================================
// Token endpoint
// =============================================================================

/// Token request (form fields of the token endpoint).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    /// One of `authorization_code`, `refresh_token`, `password`.
    pub grant_type: String,

    /// Authorization code (authorization_code grant).
    #[serde(default)]
    pub code: Option<String>,

    /// Redirect URI used at authorization.
    #[serde(default)]
    pub redirect_uri: Option<String>,

    /// PKCE code verifier.
    #[serde(default)]
    pub code_verifier: Option<String>,

    /// Refresh token (refresh_token grant).
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Requested scope (refresh_token and password grants).
    #[serde(default)]
    pub scope: Option<String>,

    /// Username (password grant).
    #[serde(default)]
    pub username: Option<String>,

    /// Password (password grant).
    #[serde(default)]
    pub password: Option<String>,

    /// Client ID.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Client secret.
    #[serde(default)]
    pub client_secret: Option<String>,
}

impl TokenRequest {
    /// Creates an authorization_code token request.
    #[must_use]
    pub fn authorization_code(code: impl Into<String>) -> Self {
        Self {
            grant_type: "authorization_code".to_string(),
            code: Some(code.into()),
            ..Default::default()
        }
    }

    /// Creates a refresh_token token request.
    #[must_use]
    pub fn refresh_token(token: impl Into<String>) -> Self {
        Self {
            grant_type: "refresh_token".to_string(),
            refresh_token: Some(token.into()),
            ..Default::default()
        }
    }

    /// Creates a password token request.
    #[must_use]
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            grant_type: "password".to_string(),
            username: Some(username.into()),
            password: Some(password.into()),
            ..Default::default()
        }
    }

    /// Sets the client credentials.
    #[must_use]
    pub fn with_client(mut self, client_id: impl Into<String>, secret: Option<&str>) -> Self {
        self.client_id = Some(client_id.into());
        self.client_secret = secret.map(str::to_string);
        self
    }

    /// Sets the redirect URI.
    #[must_use]
    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    /// Sets the PKCE code verifier.
    #[must_use]
    pub fn with_code_verifier(mut self, verifier: impl Into<String>) -> Self {
        self.code_verifier = Some(verifier.into());
        self
    }

    /// Sets the requested scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }
}

/// Successful token response.
///
/// # Example Response
///
/// ```json
/// {
///   "access_token": "eyJhbG...",
///   "token_type": "Bearer",
///   "expires_in": 3600,
///   "scope": "openid profile",
///   "id_token": "eyJhbG...",
///   "refresh_token": "q2Vh..."
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct TokenResponse {
    /// The access token (JWT).
    pub access_token: String,

    /// Token type, always "Bearer".
    pub token_type: String,

    /// Access token lifetime in seconds.
    pub expires_in: u64,

    /// Granted scopes (space-separated).
    pub scope: String,

    /// Refresh token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// ID token (if openid scope was granted).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl TokenResponse {
    /// Creates a bearer token response.
    #[must_use]
    pub fn new(access_token: String, expires_in: u64, scope: String) -> Self {
        Self {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in,
            scope,
            refresh_token: None,
            id_token: None,
        }
    }

    /// Adds a refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, token: Option<String>) -> Self {
        self.refresh_token = token;
        self
    }

    /// Adds an ID token.
    #[must_use]
    pub fn with_id_token(mut self, token: Option<String>) -> Self {
        self.id_token = token;
        self
    }
}

/// OAuth 2.0 error response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    /// OAuth 2.0 error code.
    pub error: String,

    /// Human-readable description. Server errors get a generic text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl From<&ProviderError> for ErrorResponse {
    fn from(err: &ProviderError) -> Self {
        let description = if err.is_server_error() {
            "The authorization server encountered an unexpected condition".to_string()
        } else {
            err.to_string()
        };
        Self {
            error: err.oauth_error_code().to_string(),
            error_description: Some(description),
        }
    }
}
