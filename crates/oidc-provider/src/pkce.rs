//! PKCE (Proof Key for Code Exchange) verification.
//!
//! Implements RFC 7636 with both the `plain` and `S256` transforms. A code
//! issued with a challenge can only be redeemed by presenting the verifier
//! whose transform equals the recorded challenge.
//!
//! # Example
//!
//! ```
//! use oidc_provider::pkce::{PkceMethod, challenge_for};
//!
//! let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
//! let challenge = challenge_for(verifier, PkceMethod::S256);
//! assert!(PkceMethod::S256.verify(&challenge, verifier));
//! ```

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::ProviderError;

// =============================================================================
// PKCE Challenge Method
// =============================================================================

/// PKCE challenge transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PkceMethod {
    /// The challenge is the verifier itself.
    #[serde(rename = "plain")]
    #[default]
    Plain,
    /// The challenge is `BASE64URL(SHA256(verifier))`.
    #[serde(rename = "S256")]
    S256,
}

impl PkceMethod {
    /// Parses the `code_challenge_method` parameter.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for any method other than `plain` or `S256`.
    pub fn parse(value: &str) -> Result<Self, ProviderError> {
        match value {
            "plain" => Ok(Self::Plain),
            "S256" => Ok(Self::S256),
            other => Err(ProviderError::invalid_request(format!(
                "unsupported code_challenge_method: {other}"
            ))),
        }
    }

    /// Returns the method string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::S256 => "S256",
        }
    }

    /// Applies the transform to a verifier.
    #[must_use]
    pub fn transform(&self, verifier: &str) -> String {
        challenge_for(verifier, *self)
    }

    /// Verifies a presented verifier against a recorded challenge.
    ///
    /// The comparison runs in constant time.
    #[must_use]
    pub fn verify(&self, challenge: &str, verifier: &str) -> bool {
        let computed = self.transform(verifier);
        computed.as_bytes().ct_eq(challenge.as_bytes()).into()
    }
}

impl fmt::Display for PkceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Computes the challenge for a verifier under the given method.
#[must_use]
pub fn challenge_for(verifier: &str, method: PkceMethod) -> String {
    match method {
        PkceMethod::Plain => verifier.to_string(),
        PkceMethod::S256 => {
            let digest = Sha256::digest(verifier.as_bytes());
            URL_SAFE_NO_PAD.encode(digest)
        }
    }
}
