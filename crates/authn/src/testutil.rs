//! Shared test utilities for authentication testing.
//!
//! Feature-gated behind `testutil` so it never leaks into production builds.
//! Provides a ready-made service over an in-memory store plus helpers for
//! tampering with tokens.
//!
//! ```toml
//! [dev-dependencies]
//! tollgate-authn = { path = "../authn", features = ["testutil"] }
//! ```

use std::sync::Arc;

use tollgate_storage::{MemoryBackend, StorageBackend};

use crate::{
    audit::NoopAuditLogger,
    codec,
    config::AuthConfig,
    error::Result,
    registry::{SigningKey, SigningKeyRegistry},
    service::AuthService,
    token::{TokenBody, TokenEnvelope},
};

/// Key id of the key in [`test_registry`].
pub const TEST_KEY_ID: &str = "k1";

/// Secret of the key in [`test_registry`].
pub const TEST_SECRET: &[u8] = b"tollgate-test-signing-secret-000";

/// Bitcoin base58 alphabet, used to keep tampered tokens decodable.
const BASE58_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// A registry holding one key, [`TEST_KEY_ID`], with a fixed secret.
///
/// # Panics
///
/// Never; the fixed key is always valid.
#[allow(clippy::expect_used)]
pub fn test_registry() -> SigningKeyRegistry {
    SigningKeyRegistry::builder()
        .keys(vec![SigningKey::new(TEST_KEY_ID, TEST_SECRET.to_vec()).expect("valid test key")])
        .build()
        .expect("valid test registry")
}

/// A service over a fresh in-memory store with audit output discarded.
///
/// Returns the backend too, so tests can inspect or share it.
///
/// # Errors
///
/// Returns [`AuthError::InvalidConfig`](crate::AuthError::InvalidConfig)
/// if `config` is invalid or does not use [`TEST_KEY_ID`] as default key.
pub fn test_service(config: AuthConfig) -> Result<(AuthService, Arc<MemoryBackend>)> {
    let backend = Arc::new(MemoryBackend::new());
    let service = AuthService::builder()
        .backend(Arc::clone(&backend) as Arc<dyn StorageBackend>)
        .registry(test_registry())
        .config(config)
        .audit_logger(Arc::new(NoopAuditLogger))
        .build()?;
    Ok((service, backend))
}

/// Replaces the character at `index` with a different base58 character.
///
/// The result is still valid base58, so it exercises the checks after the
/// base58 decode rather than the alphabet check.
///
/// # Panics
///
/// Panics if `index` is out of bounds.
#[allow(clippy::panic)]
pub fn flip_char(token: &str, index: usize) -> String {
    let mut bytes = token.as_bytes().to_vec();
    let Some(current) = bytes.get(index).copied() else {
        panic!("index {index} out of bounds for token of length {}", token.len());
    };
    let position = BASE58_ALPHABET.iter().position(|&c| c == current).unwrap_or(0);
    bytes[index] = BASE58_ALPHABET[(position + 1) % BASE58_ALPHABET.len()];
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Signs `body` with a key that is not in any test registry and encodes it.
///
/// # Errors
///
/// Returns an error only if `secret` is empty.
pub fn craft_rogue_token(body: &TokenBody, key_id: &str, secret: &[u8]) -> Result<String> {
    let rogue = SigningKeyRegistry::default().with_key(SigningKey::new(key_id, secret.to_vec())?)?;
    let body = codec::encode_body(body)?;
    let signature = rogue.sign(key_id, &body)?;
    codec::encode(&TokenEnvelope { body, key_id: key_id.to_owned(), signature })
}

/// Re-signs the body of an existing token with a different secret under the
/// same key id.
///
/// # Errors
///
/// Returns [`AuthError::Decode`](crate::AuthError::Decode) if `token` does
/// not decode.
pub fn resign_token(token: &str, secret: &[u8]) -> Result<String> {
    let envelope = codec::decode(token)?;
    let rogue =
        SigningKeyRegistry::default().with_key(SigningKey::new(&envelope.key_id, secret.to_vec())?)?;
    let signature = rogue.sign(&envelope.key_id, &envelope.body)?;
    codec::encode(&TokenEnvelope { signature, ..envelope })
}
