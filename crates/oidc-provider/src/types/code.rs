//! Authorization code records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::pkce::PkceMethod;
use crate::types::Scopes;

/// An issued authorization code.
///
/// Field names are the storage contract shared with existing durable
/// stores, so the serialized shape must not change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationCode {
    /// The opaque code value handed to the client. Primary key.
    #[serde(rename = "code")]
    pub id: String,

    /// Client the code was issued to.
    #[serde(rename = "client")]
    pub client_id: String,

    /// Authenticated principal.
    #[serde(rename = "user")]
    pub subject: String,

    /// Granted scopes.
    #[serde(rename = "scope")]
    pub scopes: Scopes,

    /// Client-supplied nonce, echoed in the ID token.
    #[serde(default)]
    pub nonce: Option<String>,

    /// PKCE code challenge.
    #[serde(default)]
    pub code_challenge: Option<String>,

    /// PKCE transform used to derive the challenge.
    #[serde(default)]
    pub code_challenge_method: Option<PkceMethod>,

    /// Extra claims merged into the ID token.
    #[serde(default)]
    pub specific_claims: Map<String, Value>,

    /// Expiry instant, unix seconds.
    pub expires_at: i64,

    /// Set once the code has been redeemed.
    #[serde(default)]
    pub used: bool,
}

impl AuthorizationCode {
    /// Returns `true` if the code is expired at `now` (unix seconds).
    ///
    /// A code is still valid during the second it expires in.
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        now > self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AuthorizationCode {
        AuthorizationCode {
            id: "abc".to_string(),
            client_id: "c1".to_string(),
            subject: "alice".to_string(),
            scopes: Scopes::parse("openid profile"),
            nonce: Some("n-0S6_WzA2Mj".to_string()),
            code_challenge: None,
            code_challenge_method: None,
            specific_claims: Map::new(),
            expires_at: 1_000,
            used: false,
        }
    }

    #[test]
    fn test_storage_field_names() {
        let json = serde_json::to_value(sample()).unwrap();
        let obj = json.as_object().unwrap();
        for field in [
            "code",
            "client",
            "user",
            "scope",
            "nonce",
            "code_challenge",
            "code_challenge_method",
            "specific_claims",
            "expires_at",
            "used",
        ] {
            assert!(obj.contains_key(field), "missing field {field}");
        }
        assert_eq!(obj["scope"], serde_json::json!(["openid", "profile"]));
    }

    #[test]
    fn test_reads_minimal_stored_record() {
        let json = r#"{"code":"x","client":"c1","user":"bob","scope":["openid"],"expires_at":5}"#;
        let code: AuthorizationCode = serde_json::from_str(json).unwrap();
        assert!(!code.used);
        assert!(code.nonce.is_none());
        assert!(code.specific_claims.is_empty());
    }

    #[test]
    fn test_expiry_boundary() {
        let code = sample();
        assert!(!code.is_expired_at(999));
        assert!(!code.is_expired_at(1_000));
        assert!(code.is_expired_at(1_001));
    }
}
