//! Stored token records.

use serde::{Deserialize, Serialize};

use crate::types::Scopes;

/// The stored side of an opaque (refresh) token.
///
/// Signed access and ID tokens are self-contained and never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// The opaque token value. Primary key.
    #[serde(rename = "token")]
    pub id: String,

    /// Principal the token was issued for.
    #[serde(rename = "user")]
    pub subject: String,

    /// Client the token was issued to.
    #[serde(rename = "client")]
    pub client_id: String,

    /// Scopes granted to the token.
    #[serde(rename = "scope")]
    pub scopes: Scopes,

    /// Issue instant, unix seconds.
    pub issued_at: i64,

    /// Expiry instant, unix seconds.
    pub expires_at: i64,

    /// Whether the token may be exchanged at the token endpoint.
    #[serde(default = "default_refreshable")]
    pub refreshable: bool,

    /// Set once the token has been revoked.
    #[serde(default)]
    pub revoked: bool,

    /// Authorization code the grant originated from.
    #[serde(rename = "parent_code", default)]
    pub parent_code_id: Option<String>,
}

fn default_refreshable() -> bool {
    true
}

impl TokenRecord {
    /// Returns `true` if the token is expired at `now` (unix seconds).
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        now > self.expires_at
    }
}
