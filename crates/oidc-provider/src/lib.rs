//! # oidc-provider
//!
//! OpenID Connect / OAuth 2.0 authorization server core.
//!
//! This crate provides:
//! - Authorization code issuance, single-use redemption and lazy expiry
//! - PKCE (`plain` and `S256`) binding
//! - Signed access and ID tokens (HS256, RS256, ES256) with key rotation
//! - Opaque refresh tokens with scope narrowing and revocation
//! - Client registration and validation
//!
//! ## Overview
//!
//! The crate holds the protocol state and its invariants. HTTP routing,
//! consent pages, discovery documents and user login are left to the host
//! application, which calls [`Provider::authorize`] and [`Provider::token`]
//! and maps [`ProviderError`] to OAuth 2.0 error responses.
//!
//! ## Modules
//!
//! - [`provider`] - Protocol orchestration (`authorize`, `token`)
//! - [`code`] - Authorization code lifecycle
//! - [`token`] - Token minting and refresh
//! - [`keys`] - Signing keys, rotation and JWKS
//! - [`client`] - Client registry
//! - [`storage`] - Storage traits and the in-memory backend
//! - [`pkce`] - Proof Key for Code Exchange
//! - [`config`] - Provider configuration
//! - [`observability`] - Tracing bootstrap and credential masking

pub mod client;
pub mod clock;
pub mod code;
pub mod config;
pub mod error;
pub mod keys;
pub mod observability;
pub mod pkce;
pub mod provider;
pub mod storage;
pub mod token;
pub mod types;

pub use client::{ClientRegistry, RegisterClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use code::{CodeEngine, CodeRequest};
pub use config::{ConfigError, ProviderConfig};
pub use error::ProviderError;
pub use keys::{Jwk, Jwks, KeyManager, SigningKey};
pub use pkce::PkceMethod;
pub use provider::{
    AuthenticatedUser, AuthorizationRequest, AuthorizationResponse, ErrorResponse,
    PasswordAuthenticator, Provider, ProviderBuilder, TokenRequest, TokenResponse,
};
pub use storage::{ClientStorage, CodeStorage, MarkUsed, TokenStorage};
pub use token::{Claims, SignedToken, TokenEngine};
pub use types::{
    AuthorizationCode, ClientRecord, GrantType, Scopes, SigningAlgorithm, TokenRecord,
};

/// Type alias for provider results.
pub type ProviderResult<T> = Result<T, ProviderError>;
