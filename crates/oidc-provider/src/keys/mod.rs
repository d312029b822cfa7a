//! Signing key management with rotation.
//!
//! [`KeyManager`] keeps one active key per algorithm family plus the keys
//! it has rotated out. The whole key ring is an immutable snapshot behind an
//! [`ArcSwap`]: signers and verifiers load the current snapshot without
//! locking, and a rotation publishes a new snapshot in one pointer swap. A
//! reader therefore sees either the old or the new active key, never a
//! partially updated ring.
//!
//! Retired keys keep verifying until the end of the retention window, after
//! which tokens signed by them fail with `UnknownKey`.

pub mod jwks;
pub mod key;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use jsonwebtoken::{Header, Validation, decode, decode_header, encode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::clock::Clock;
use crate::config::KeysConfig;
use crate::types::SigningAlgorithm;
use crate::{ProviderError, ProviderResult};

pub use jwks::{Jwk, Jwks};
pub use key::{AsymmetricKey, PublicKey, PublicKeyMaterial, SigningKey, SymmetricKey};

/// Lifecycle position of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    /// Used for new signatures.
    Active,
    /// Only used to verify tokens signed before rotation.
    Retired,
}

/// Description of a key in the ring, without key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    /// Key ID.
    pub kid: String,
    /// Algorithm the key signs with.
    pub algorithm: SigningAlgorithm,
    /// Whether the key still signs or only verifies.
    pub status: KeyStatus,
    /// When the key entered the ring.
    pub not_before: OffsetDateTime,
    /// End of the retention window, `None` while active.
    pub not_after: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
struct KeyEntry {
    key: Arc<SigningKey>,
    not_before: OffsetDateTime,
    not_after: Option<OffsetDateTime>,
}

impl KeyEntry {
    fn is_usable_at(&self, now: OffsetDateTime) -> bool {
        self.not_after.is_none_or(|not_after| now <= not_after)
    }
}

#[derive(Debug, Clone, Default)]
struct KeyRing {
    active: HashMap<SigningAlgorithm, KeyEntry>,
    retired: Vec<KeyEntry>,
}

impl KeyRing {
    fn find(&self, kid: &str, now: OffsetDateTime) -> Option<&KeyEntry> {
        self.active
            .values()
            .chain(self.retired.iter())
            .find(|entry| entry.key.kid() == kid)
            .filter(|entry| entry.is_usable_at(now))
    }
}

/// Holds the signing keys and performs rotation-aware signing and
/// verification.
pub struct KeyManager {
    ring: ArcSwap<KeyRing>,
    clock: Arc<dyn Clock>,
    retention: Duration,
}

impl KeyManager {
    /// Creates an empty key manager.
    pub fn new(clock: Arc<dyn Clock>, retention: Duration) -> Self {
        Self {
            ring: ArcSwap::from_pointee(KeyRing::default()),
            clock,
            retention,
        }
    }

    /// Builds a key manager from configuration.
    ///
    /// Loads the configured PEM files, installs the HS256 secret, generates
    /// keys for asymmetric families that have none when `generate_missing`
    /// is set, and checks that the default algorithm has an active key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` for unreadable key files and `NoActiveKey` if the
    /// default algorithm ends up without a key.
    pub fn from_config(config: &KeysConfig, clock: Arc<dyn Clock>) -> ProviderResult<Self> {
        let manager = Self::new(clock, config.retention);

        manager.load_pem_files(config.private_keys.as_slice())?;

        if let Some(secret) = &config.hs256_secret {
            manager.insert(SymmetricKey::new("hs256", secret.as_bytes()))?;
        }

        if config.generate_missing {
            for algorithm in [SigningAlgorithm::RS256, SigningAlgorithm::ES256] {
                if !manager.has_active(algorithm) {
                    manager.generate(algorithm)?;
                }
            }
        }

        manager.ensure_active(&[config.default_algorithm])?;
        Ok(manager)
    }

    // -------------------------------------------------------------------------
    // Key loading
    // -------------------------------------------------------------------------

    /// Loads private keys from PEM files. The kid is the file stem.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if a file cannot be read or parsed.
    pub fn load_pem_files(&self, paths: &[impl AsRef<Path>]) -> ProviderResult<()> {
        for path in paths {
            let path = path.as_ref();
            let pem = std::fs::read_to_string(path).map_err(|e| {
                ProviderError::invalid_key(format!("cannot read {}: {e}", path.display()))
            })?;
            let kid = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            self.add_pem(kid, &pem)?;
        }
        Ok(())
    }

    /// Parses a PEM private key and makes it the active key of its family.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if the PEM cannot be parsed or the kid is taken.
    pub fn add_pem(&self, kid: impl Into<String>, pem: &str) -> ProviderResult<String> {
        let key = AsymmetricKey::from_pem(kid, pem)?;
        self.insert(key)
    }

    /// Generates a fresh key and rotates it in.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if key generation fails.
    pub fn generate(&self, algorithm: SigningAlgorithm) -> ProviderResult<String> {
        let key = SigningKey::generate(algorithm)?;
        self.insert(key)
    }

    /// Makes `key` the active key of its family and returns its kid.
    ///
    /// # Errors
    ///
    /// See [`KeyManager::rotate`].
    pub fn insert(&self, key: impl Into<SigningKey>) -> ProviderResult<String> {
        let key = key.into();
        let kid = key.kid().to_string();
        self.rotate(key)?;
        Ok(kid)
    }

    // -------------------------------------------------------------------------
    // Rotation
    // -------------------------------------------------------------------------

    /// Atomically swaps the active key of `new_key`'s family.
    ///
    /// The previous active key is retired and keeps verifying until
    /// `now + retention`. Returns the kid of the retired key, if any.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if a usable key with the same kid is already in
    /// the ring.
    pub fn rotate(&self, new_key: SigningKey) -> ProviderResult<Option<String>> {
        let now = self.clock.now();
        let new_kid = new_key.kid().to_string();
        if self.ring.load().find(&new_kid, now).is_some() {
            return Err(ProviderError::invalid_key(format!(
                "key id {new_kid} is already in use"
            )));
        }

        let retire_at = now + self.retention;
        let algorithm = new_key.algorithm();
        let entry = KeyEntry {
            key: Arc::new(new_key),
            not_before: now,
            not_after: None,
        };

        let previous = self.ring.rcu(|ring| {
            let mut next = KeyRing::clone(ring);
            if let Some(mut old) = next.active.insert(algorithm, entry.clone()) {
                old.not_after = Some(retire_at);
                next.retired.push(old);
            }
            next.retired
                .retain(|retired| retired.is_usable_at(now) && retired.key.kid() != new_kid);
            next
        });

        let retired_kid = previous
            .active
            .get(&algorithm)
            .map(|old| old.key.kid().to_string());

        tracing::info!(
            algorithm = %algorithm,
            kid = %entry.key.kid(),
            retired_kid = retired_kid.as_deref().unwrap_or("-"),
            "rotated signing key"
        );
        Ok(retired_kid)
    }

    /// Drops retired keys whose retention window has elapsed.
    ///
    /// Returns the number of keys removed.
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let previous = self.ring.rcu(|ring| {
            let mut next = KeyRing::clone(ring);
            next.retired.retain(|retired| retired.is_usable_at(now));
            next
        });
        let remaining = self.ring.load().retired.len();
        previous.retired.len().saturating_sub(remaining)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Returns `true` if the family has an active key.
    #[must_use]
    pub fn has_active(&self, algorithm: SigningAlgorithm) -> bool {
        self.ring.load().active.contains_key(&algorithm)
    }

    /// Returns the kid of the family's active key.
    #[must_use]
    pub fn active_kid(&self, algorithm: SigningAlgorithm) -> Option<String> {
        self.ring
            .load()
            .active
            .get(&algorithm)
            .map(|entry| entry.key.kid().to_string())
    }

    /// Fails unless every listed family has an active key.
    ///
    /// # Errors
    ///
    /// Returns `NoActiveKey` for the first family without a key.
    pub fn ensure_active(&self, algorithms: &[SigningAlgorithm]) -> ProviderResult<()> {
        let ring = self.ring.load();
        match algorithms
            .iter()
            .find(|algorithm| !ring.active.contains_key(algorithm))
        {
            Some(missing) => Err(ProviderError::no_active_key(missing)),
            None => Ok(()),
        }
    }

    /// Lists keys in the ring, active first.
    #[must_use]
    pub fn keys(&self) -> Vec<KeyInfo> {
        let ring = self.ring.load();
        let describe = |entry: &KeyEntry, status| KeyInfo {
            kid: entry.key.kid().to_string(),
            algorithm: entry.key.algorithm(),
            status,
            not_before: entry.not_before,
            not_after: entry.not_after,
        };

        let mut active: Vec<KeyInfo> = ring
            .active
            .values()
            .map(|entry| describe(entry, KeyStatus::Active))
            .collect();
        active.sort_by_key(|info| info.algorithm.as_str());

        active
            .into_iter()
            .chain(
                ring.retired
                    .iter()
                    .map(|entry| describe(entry, KeyStatus::Retired)),
            )
            .collect()
    }

    /// Public keys of all asymmetric keys that can still verify, for the
    /// JWK-publishing endpoint. Shared secrets are never included.
    #[must_use]
    pub fn public_key_set(&self) -> Jwks {
        let now = self.clock.now();
        let ring = self.ring.load();

        let mut active: Vec<&KeyEntry> = ring.active.values().collect();
        active.sort_by_key(|entry| entry.key.algorithm().as_str());

        let keys = active
            .into_iter()
            .chain(ring.retired.iter().filter(|entry| entry.is_usable_at(now)))
            .filter_map(|entry| entry.key.public_key())
            .map(|public| public.to_jwk())
            .collect();

        Jwks { keys }
    }

    // -------------------------------------------------------------------------
    // Signing and verification
    // -------------------------------------------------------------------------

    /// Signs `claims` with the active key of `algorithm`.
    ///
    /// Returns the compact JWS and the kid it carries.
    ///
    /// # Errors
    ///
    /// Returns `NoActiveKey` if the family has no key.
    pub fn sign<T: Serialize>(
        &self,
        algorithm: SigningAlgorithm,
        claims: &T,
    ) -> ProviderResult<(String, String)> {
        let ring = self.ring.load();
        let entry = ring
            .active
            .get(&algorithm)
            .ok_or_else(|| ProviderError::no_active_key(algorithm))?;

        let kid = entry.key.kid().to_string();
        let mut header = Header::new(algorithm.to_jwt_algorithm());
        header.kid = Some(kid.clone());

        let token = encode(&header, claims, entry.key.encoding_key())?;
        Ok((token, kid))
    }

    /// Verifies a compact JWS and returns its claims.
    ///
    /// # Errors
    ///
    /// - `SignatureInvalid` if the token is malformed, lacks a kid, uses an
    ///   algorithm other than its key's, or fails signature verification
    /// - `UnknownKey` if the kid is not in the ring or its retention elapsed
    /// - `Expired` if the signature is good but the `exp` claim has passed
    pub fn verify<T: DeserializeOwned>(&self, token: &str) -> ProviderResult<T> {
        let header = decode_header(token)
            .map_err(|e| ProviderError::signature_invalid(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| ProviderError::signature_invalid("token header has no kid"))?;

        let now = self.clock.now();
        let ring = self.ring.load();
        let entry = ring
            .find(&kid, now)
            .ok_or_else(|| ProviderError::unknown_key(kid.as_str()))?;

        let algorithm = entry.key.algorithm();
        if SigningAlgorithm::from_jwt_algorithm(header.alg) != Some(algorithm) {
            return Err(ProviderError::signature_invalid(format!(
                "token algorithm does not match key {kid}"
            )));
        }

        // exp is checked below against the injected clock
        let mut validation = Validation::new(algorithm.to_jwt_algorithm());
        validation.validate_exp = false;
        validation.validate_aud = false;

        let data = decode::<Map<String, Value>>(token, entry.key.decoding_key(), &validation)
            .map_err(|e| ProviderError::signature_invalid(e.to_string()))?;

        let exp = data
            .claims
            .get("exp")
            .and_then(Value::as_i64)
            .ok_or_else(|| ProviderError::signature_invalid("missing exp claim"))?;
        if now.unix_timestamp() > exp {
            return Err(ProviderError::Expired);
        }

        serde_json::from_value(Value::Object(data.claims))
            .map_err(|e| ProviderError::signature_invalid(e.to_string()))
    }
}
