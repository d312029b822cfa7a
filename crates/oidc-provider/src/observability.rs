//! Tracing initialization and log redaction.

use std::sync::OnceLock;

use sha2::{Digest, Sha256};
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, tracing_subscriber::Registry>> =
    OnceLock::new();

/// Number of hex characters kept by [`mask`].
const MASK_LEN: usize = 8;

pub fn init_tracing() {
    init_tracing_with_level("info");
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init_tracing_with_level(level: &str) {
    // Prefer RUST_LOG from env, otherwise use provided level string.
    let base_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level));

    let (reload_layer, handle) = reload::Layer::new(base_filter);
    let _ = LOG_RELOAD_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer())
        .try_init();
}

/// Apply a new logging level at runtime if reload handle is configured.
pub fn apply_logging_level(level: &str) {
    if let Some(handle) = LOG_RELOAD_HANDLE.get() {
        let _ = handle.modify(|f| {
            *f = EnvFilter::new(level);
        });
    }
}

/// Redacts a credential for logging.
///
/// Returns a fixed-length prefix of the SHA-256 digest so log lines about the
/// same code or token can be correlated without revealing it.
#[must_use]
pub fn mask(secret: &str) -> String {
    let digest = hex::encode(Sha256::digest(secret.as_bytes()));
    format!("sha256:{}", &digest[..MASK_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_is_fixed_length_and_hides_value() {
        let short = mask("x");
        let long = mask("a-very-long-authorization-code-value-0123456789");
        assert_eq!(short.len(), long.len());
        assert!(!long.contains("authorization"));
        assert_eq!(mask("x"), short);
        assert_ne!(mask("y"), short);
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing_with_level("debug");
        init_tracing();
        apply_logging_level("warn");
        tracing::info!(code = %mask("secret"), "tracing initialized twice");
    }
}
