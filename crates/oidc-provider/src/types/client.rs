//! Registered client records.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::types::{Scopes, SigningAlgorithm};

/// A registered OAuth 2.0 client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRecord {
    /// Client identifier.
    pub id: String,

    /// Shared secret. `None` marks a public client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    /// Human-readable display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Registered redirect URIs. Matching is exact.
    pub redirect_uris: Vec<String>,

    /// Algorithm the client's tokens are signed with.
    #[serde(default)]
    pub signature_algorithm: SigningAlgorithm,

    /// Scopes the client may request.
    pub scopes_allowed: Scopes,

    /// Registration instant.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl ClientRecord {
    /// Returns `true` if the client has no secret.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.secret.is_none()
    }

    /// Checks a redirect URI against the registered set.
    ///
    /// Exact string comparison only. No prefix or normalised matching.
    #[must_use]
    pub fn is_redirect_uri_allowed(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|registered| registered == uri)
    }

    /// Returns `true` if every requested scope is allowed for this client.
    #[must_use]
    pub fn allows_scopes(&self, scopes: &Scopes) -> bool {
        scopes.is_subset(&self.scopes_allowed)
    }
}
