//! Token endpoint grant types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProviderError;

/// Grant types accepted at the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// Authorization Code flow.
    AuthorizationCode,
    /// Refresh Token flow.
    RefreshToken,
    /// Resource Owner Password Credentials flow.
    /// WARNING: legacy. Disabled unless the provider explicitly enables it.
    Password,
}

impl GrantType {
    /// Parses the `grant_type` parameter.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedGrantType` for any other value.
    pub fn parse(value: &str) -> Result<Self, ProviderError> {
        match value {
            "authorization_code" => Ok(Self::AuthorizationCode),
            "refresh_token" => Ok(Self::RefreshToken),
            "password" => Ok(Self::Password),
            other => Err(ProviderError::unsupported_grant_type(other)),
        }
    }

    /// Returns the OAuth 2.0 grant_type parameter value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::RefreshToken => "refresh_token",
            Self::Password => "password",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
