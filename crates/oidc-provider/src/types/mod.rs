//! Provider data model.
//!
//! - [`AuthorizationCode`] - single-use code bound to a client, subject and PKCE challenge
//! - [`TokenRecord`] - stored record behind an opaque refresh token
//! - [`ClientRecord`] - a registered OAuth 2.0 client
//! - [`Scopes`] - ordered scope set
//! - [`SigningAlgorithm`] and [`GrantType`] - closed protocol vocabularies

pub mod algorithm;
pub mod client;
pub mod code;
pub mod grant;
pub mod scope;
pub mod token;

pub use algorithm::SigningAlgorithm;
pub use client::ClientRecord;
pub use code::AuthorizationCode;
pub use grant::GrantType;
pub use scope::Scopes;
pub use token::TokenRecord;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;

/// Generates an opaque, URL-safe credential from 32 bytes of OS randomness.
pub(crate) fn generate_opaque_id() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
