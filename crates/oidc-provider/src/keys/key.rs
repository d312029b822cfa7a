//! Signing key material.
//!
//! Symmetric and asymmetric keys are distinct types. Only
//! [`AsymmetricKey`] can produce a [`PublicKey`], so a shared secret has no
//! path onto a public key-publishing surface.

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{DecodingKey, EncodingKey};
use p256::SecretKey as EcSecretKey;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;

use crate::keys::jwks::Jwk;
use crate::types::SigningAlgorithm;
use crate::{ProviderError, ProviderResult};

const RSA_BITS: usize = 2048;
const HMAC_SECRET_LEN: usize = 32;

// ============================================================================
// Symmetric keys
// ============================================================================

/// An HS256 shared secret.
pub struct SymmetricKey {
    kid: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl SymmetricKey {
    /// Wraps an existing secret.
    #[must_use]
    pub fn new(kid: impl Into<String>, secret: &[u8]) -> Self {
        Self {
            kid: kid.into(),
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// Generates a random 256-bit secret.
    #[must_use]
    pub fn generate() -> Self {
        let mut secret = [0u8; HMAC_SECRET_LEN];
        OsRng.fill_bytes(&mut secret);
        Self::new(uuid::Uuid::new_v4().to_string(), &secret)
    }

    /// Key ID.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Asymmetric keys
// ============================================================================

/// Public half of an asymmetric key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKeyMaterial {
    /// RSA modulus and exponent, big-endian.
    Rsa { n: Vec<u8>, e: Vec<u8> },
    /// P-256 affine coordinates.
    Ec { x: Vec<u8>, y: Vec<u8> },
}

/// A publishable public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    /// Key ID.
    pub kid: String,
    /// Algorithm the key signs with.
    pub algorithm: SigningAlgorithm,
    /// Key material.
    pub material: PublicKeyMaterial,
}

impl PublicKey {
    /// Exports the key as a JWK.
    #[must_use]
    pub fn to_jwk(&self) -> Jwk {
        match &self.material {
            PublicKeyMaterial::Rsa { n, e } => Jwk {
                kty: "RSA".to_string(),
                kid: self.kid.clone(),
                use_: "sig".to_string(),
                alg: self.algorithm.as_str().to_string(),
                n: Some(URL_SAFE_NO_PAD.encode(n)),
                e: Some(URL_SAFE_NO_PAD.encode(e)),
                crv: None,
                x: None,
                y: None,
            },
            PublicKeyMaterial::Ec { x, y } => Jwk {
                kty: "EC".to_string(),
                kid: self.kid.clone(),
                use_: "sig".to_string(),
                alg: self.algorithm.as_str().to_string(),
                n: None,
                e: None,
                crv: Some("P-256".to_string()),
                x: Some(URL_SAFE_NO_PAD.encode(x)),
                y: Some(URL_SAFE_NO_PAD.encode(y)),
            },
        }
    }
}

/// An RS256 or ES256 key pair.
pub struct AsymmetricKey {
    kid: String,
    algorithm: SigningAlgorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    public: PublicKeyMaterial,
}

impl AsymmetricKey {
    /// Generates a new 2048-bit RSA key pair for RS256.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if key generation fails.
    pub fn generate_rsa() -> ProviderResult<Self> {
        let private_key = RsaPrivateKey::new(&mut OsRng, RSA_BITS)
            .map_err(|e| ProviderError::invalid_key(e.to_string()))?;
        Self::from_rsa(uuid::Uuid::new_v4().to_string(), &private_key)
    }

    /// Generates a new P-256 key pair for ES256.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if the key cannot be encoded.
    pub fn generate_ec() -> ProviderResult<Self> {
        let secret_key = EcSecretKey::random(&mut OsRng);
        Self::from_ec(uuid::Uuid::new_v4().to_string(), &secret_key)
    }

    /// Loads a private key from PEM.
    ///
    /// Accepts RSA keys as PKCS#8 or PKCS#1 and P-256 keys as PKCS#8 or
    /// SEC1. The algorithm follows from the key type.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if the PEM is not one of those formats.
    pub fn from_pem(kid: impl Into<String>, pem: &str) -> ProviderResult<Self> {
        let kid = kid.into();

        if pem.contains("BEGIN RSA PRIVATE KEY") {
            let key = RsaPrivateKey::from_pkcs1_pem(pem)
                .map_err(|e| ProviderError::invalid_key(e.to_string()))?;
            return Self::from_rsa(kid, &key);
        }

        if pem.contains("BEGIN EC PRIVATE KEY") {
            let key = EcSecretKey::from_sec1_pem(pem)
                .map_err(|e| ProviderError::invalid_key(e.to_string()))?;
            return Self::from_ec(kid, &key);
        }

        if let Ok(key) = RsaPrivateKey::from_pkcs8_pem(pem) {
            return Self::from_rsa(kid, &key);
        }

        match EcSecretKey::from_pkcs8_pem(pem) {
            Ok(key) => Self::from_ec(kid, &key),
            Err(_) => Err(ProviderError::invalid_key(
                "expected an RSA or P-256 private key in PEM format",
            )),
        }
    }

    fn from_rsa(kid: String, private_key: &RsaPrivateKey) -> ProviderResult<Self> {
        let public_key = private_key.to_public_key();
        let n = public_key.n().to_bytes_be();
        let e = public_key.e().to_bytes_be();

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| ProviderError::invalid_key(e.to_string()))?;

        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())?;
        let decoding_key = DecodingKey::from_rsa_components(
            &URL_SAFE_NO_PAD.encode(&n),
            &URL_SAFE_NO_PAD.encode(&e),
        )?;

        Ok(Self {
            kid,
            algorithm: SigningAlgorithm::RS256,
            encoding_key,
            decoding_key,
            public: PublicKeyMaterial::Rsa { n, e },
        })
    }

    fn from_ec(kid: String, secret_key: &EcSecretKey) -> ProviderResult<Self> {
        let point = secret_key.public_key().to_encoded_point(false);
        let x = point
            .x()
            .ok_or_else(|| ProviderError::invalid_key("Missing x coordinate"))?;
        let y = point
            .y()
            .ok_or_else(|| ProviderError::invalid_key("Missing y coordinate"))?;

        // Export to PKCS8 PEM (required by jsonwebtoken)
        let private_pem = secret_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| ProviderError::invalid_key(e.to_string()))?;

        let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())?;
        let decoding_key = DecodingKey::from_ec_components(
            &URL_SAFE_NO_PAD.encode(x.as_slice()),
            &URL_SAFE_NO_PAD.encode(y.as_slice()),
        )?;

        Ok(Self {
            kid,
            algorithm: SigningAlgorithm::ES256,
            encoding_key,
            decoding_key,
            public: PublicKeyMaterial::Ec {
                x: x.to_vec(),
                y: y.to_vec(),
            },
        })
    }

    /// Key ID.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Algorithm the key signs with.
    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    /// The publishable half of the key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            kid: self.kid.clone(),
            algorithm: self.algorithm,
            material: self.public.clone(),
        }
    }
}

impl fmt::Debug for AsymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsymmetricKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Signing key
// ============================================================================

/// Any key the key manager can sign with.
#[derive(Debug)]
pub enum SigningKey {
    /// Shared secret (HS256). Never published.
    Symmetric(SymmetricKey),
    /// Key pair (RS256 / ES256).
    Asymmetric(AsymmetricKey),
}

impl SigningKey {
    /// Generates a fresh key for the algorithm.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if generation fails.
    pub fn generate(algorithm: SigningAlgorithm) -> ProviderResult<Self> {
        Ok(match algorithm {
            SigningAlgorithm::HS256 => Self::Symmetric(SymmetricKey::generate()),
            SigningAlgorithm::RS256 => Self::Asymmetric(AsymmetricKey::generate_rsa()?),
            SigningAlgorithm::ES256 => Self::Asymmetric(AsymmetricKey::generate_ec()?),
        })
    }

    /// Key ID.
    #[must_use]
    pub fn kid(&self) -> &str {
        match self {
            Self::Symmetric(key) => key.kid(),
            Self::Asymmetric(key) => key.kid(),
        }
    }

    /// Algorithm family of the key.
    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        match self {
            Self::Symmetric(_) => SigningAlgorithm::HS256,
            Self::Asymmetric(key) => key.algorithm(),
        }
    }

    /// Publishable half, `None` for shared secrets.
    #[must_use]
    pub fn public_key(&self) -> Option<PublicKey> {
        match self {
            Self::Symmetric(_) => None,
            Self::Asymmetric(key) => Some(key.public_key()),
        }
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        match self {
            Self::Symmetric(key) => &key.encoding_key,
            Self::Asymmetric(key) => &key.encoding_key,
        }
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        match self {
            Self::Symmetric(key) => &key.decoding_key,
            Self::Asymmetric(key) => &key.decoding_key,
        }
    }
}

impl From<SymmetricKey> for SigningKey {
    fn from(key: SymmetricKey) -> Self {
        Self::Symmetric(key)
    }
}

impl From<AsymmetricKey> for SigningKey {
    fn from(key: AsymmetricKey) -> Self {
        Self::Asymmetric(key)
    }
}
