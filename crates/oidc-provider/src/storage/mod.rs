//! Storage traits for provider records.
//!
//! The provider persists three kinds of records: authorization codes,
//! opaque token records and client registrations. Each kind has its own
//! trait so backends can be mixed (e.g. clients in a durable store, codes
//! in memory).
//!
//! # Implementations
//!
//! - In-memory maps ([`memory`]), the default
//! - Redis (in the `oidc-provider-redis` crate)
//!
//! # Security Considerations
//!
//! - Never log raw codes or tokens; use [`crate::observability::mask`]
//! - [`CodeStorage::mark_used_if_unused`] must be atomic per code

pub mod memory;

use async_trait::async_trait;

use crate::ProviderResult;
use crate::types::{AuthorizationCode, ClientRecord, TokenRecord};

pub use memory::{InMemoryClientStorage, InMemoryCodeStorage, InMemoryTokenStorage};

/// Outcome of the atomic check-and-mark on a code.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkUsed {
    /// The code was unused and unexpired; it is now marked used.
    /// Carries the record as it was before the mark.
    Marked(AuthorizationCode),
    /// The code had already been marked used.
    AlreadyUsed,
    /// The code was past its expiry instant. The backend has removed it.
    Expired,
    /// No code with that id exists.
    NotFound,
}

/// Storage trait for authorization codes.
#[async_trait]
pub trait CodeStorage: Send + Sync {
    /// Stores a newly issued code.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write fails. The caller must not hand
    /// the code to the client in that case.
    async fn put(&self, code: &AuthorizationCode) -> ProviderResult<()>;

    /// Fetches a code by id.
    ///
    /// Returns the record regardless of its used/expired state.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    async fn get(&self, id: &str) -> ProviderResult<Option<AuthorizationCode>>;

    /// Marks a code used if, and only if, it exists, is unused and has not
    /// expired at `now` (unix seconds).
    ///
    /// # Atomicity
    ///
    /// The existence, expiry and used checks and the mark form one
    /// linearizable step per code id. Of N concurrent calls for the same
    /// unused code, exactly one returns [`MarkUsed::Marked`].
    ///
    /// # Errors
    ///
    /// Returns a storage error if the backend fails.
    async fn mark_used_if_unused(&self, id: &str, now: i64) -> ProviderResult<MarkUsed>;

    /// Removes a code. Removing a missing code is not an error.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the delete fails.
    async fn delete(&self, id: &str) -> ProviderResult<()>;
}

/// Storage trait for opaque token records.
#[async_trait]
pub trait TokenStorage: Send + Sync {
    /// Stores a token record.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write fails.
    async fn put(&self, token: &TokenRecord) -> ProviderResult<()>;

    /// Fetches a token record by id.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    async fn get(&self, id: &str) -> ProviderResult<Option<TokenRecord>>;

    /// Marks a token revoked.
    ///
    /// Returns `false` if the token does not exist.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the update fails.
    async fn revoke(&self, id: &str) -> ProviderResult<bool>;

    /// Removes a token record.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the delete fails.
    async fn delete(&self, id: &str) -> ProviderResult<()>;
}

/// Storage trait for registered clients.
#[async_trait]
pub trait ClientStorage: Send + Sync {
    /// Creates or replaces a client registration.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write fails.
    async fn put(&self, client: &ClientRecord) -> ProviderResult<()>;

    /// Fetches a client by id.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    async fn get(&self, id: &str) -> ProviderResult<Option<ClientRecord>>;

    /// Removes a client registration.
    ///
    /// Returns `false` if the client did not exist.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the delete fails.
    async fn delete(&self, id: &str) -> ProviderResult<bool>;

    /// Lists all registered clients.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    async fn list(&self) -> ProviderResult<Vec<ClientRecord>>;
}
