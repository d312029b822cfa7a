//! JSON Web Key Set types (RFC 7517).

use serde::{Deserialize, Serialize};

/// JSON Web Key Set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    /// The keys in the set.
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Finds a key by ID.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|key| key.kid == kid)
    }
}

/// A single public JSON Web Key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type (`RSA` or `EC`).
    pub kty: String,

    /// Key ID.
    pub kid: String,

    /// Public key use.
    #[serde(rename = "use")]
    pub use_: String,

    /// Algorithm.
    pub alg: String,

    /// RSA modulus.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA exponent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// EC curve.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// EC x coordinate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// EC y coordinate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jwk_serialization_skips_empty_members() {
        let jwk = Jwk {
            kty: "EC".to_string(),
            kid: "k1".to_string(),
            use_: "sig".to_string(),
            alg: "ES256".to_string(),
            n: None,
            e: None,
            crv: Some("P-256".to_string()),
            x: Some("xx".to_string()),
            y: Some("yy".to_string()),
        };

        let json = serde_json::to_value(Jwks { keys: vec![jwk] }).unwrap();
        let key = &json["keys"][0];
        assert_eq!(key["use"], "sig");
        assert!(key.get("n").is_none());
        assert!(key.get("use_").is_none());
    }
}
