//! Symmetric signing keys addressed by key id.
//!
//! The [`SigningKeyRegistry`] is built once at startup and shared read-only
//! behind an `Arc`. Signing and verification are HMAC-SHA256 over the exact
//! body bytes; verification compares MACs in constant time.
//!
//! # Provisioning
//!
//! Keys either come from configuration ([`SigningKeyRegistry::builder`]) or
//! from the store ([`SigningKeyRegistry::load_or_generate`]). The latter
//! creates the key on first run with an insert-if-absent compare-and-set, so
//! concurrently starting instances converge on one secret:
//!
//! ```text
//! get signing-keys/{id}
//!   ├─ present → use it
//!   └─ absent  → generate 32 random bytes
//!                → compare_and_set(expected = None)
//!                    ├─ Ok       → use ours
//!                    └─ Conflict → re-read, use the winner's
//! ```

use std::{collections::HashMap, fmt};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tollgate_storage::{StorageBackend, StorageError};
use zeroize::Zeroizing;

use crate::error::{AuthError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Length in bytes of generated secrets.
pub const GENERATED_SECRET_LEN: usize = 32;

/// Storage key prefix for persisted signing keys.
pub const SIGNING_KEY_PREFIX: &str = "signing-keys/";

/// Secret used to compute a MAC when the requested key id is unknown.
const THROWAWAY_SECRET: [u8; GENERATED_SECRET_LEN] = [0u8; GENERATED_SECRET_LEN];

/// A symmetric signing key.
///
/// The secret is zeroized on drop and never printed by `Debug`.
#[derive(Clone)]
pub struct SigningKey {
    id: String,
    secret: Zeroizing<Vec<u8>>,
}

impl SigningKey {
    /// Creates a key from existing secret material.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if the id or secret is empty.
    pub fn new(id: impl Into<String>, secret: impl Into<Vec<u8>>) -> Result<Self> {
        let id = id.into();
        let secret = Zeroizing::new(secret.into());
        if id.trim().is_empty() {
            return Err(AuthError::invalid_config("signing key id must not be empty"));
        }
        if secret.is_empty() {
            return Err(AuthError::invalid_config(format!("signing key '{id}' has an empty secret")));
        }
        Ok(Self { id, secret })
    }

    /// Generates a key with a fresh random secret.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if the id is empty.
    pub fn generate(id: impl Into<String>) -> Result<Self> {
        let mut secret = Zeroizing::new(vec![0u8; GENERATED_SECRET_LEN]);
        OsRng.fill_bytes(&mut secret);
        Self::new(id, secret.to_vec())
    }

    /// The key id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    fn mac(&self, body: &[u8]) -> Result<Vec<u8>> {
        compute_mac(&self.secret, body)
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey").field("id", &self.id).field("secret", &"<redacted>").finish()
    }
}

fn compute_mac(secret: &[u8], body: &[u8]) -> Result<Vec<u8>> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
        .map_err(|e| AuthError::invalid_config(format!("unusable signing secret: {e}")))?;
    mac.update(body);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// The set of signing keys this service can sign and verify with.
#[derive(Debug, Clone, Default)]
pub struct SigningKeyRegistry {
    keys: HashMap<String, SigningKey>,
}

#[bon::bon]
impl SigningKeyRegistry {
    /// Creates a registry from statically provisioned keys.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if two keys share an id.
    #[builder]
    pub fn new(#[builder(default)] keys: Vec<SigningKey>) -> Result<Self> {
        keys.into_iter().try_fold(Self::default(), Self::with_key)
    }
}

impl SigningKeyRegistry {
    /// Adds a key, typically one kept around to verify older tokens.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if a key with the same id is
    /// already registered.
    pub fn with_key(mut self, key: SigningKey) -> Result<Self> {
        if self.keys.contains_key(key.id()) {
            return Err(AuthError::invalid_config(format!("duplicate signing key id '{}'", key.id())));
        }
        self.keys.insert(key.id.clone(), key);
        Ok(self)
    }

    /// Builds a registry holding the persisted key `key_id`, generating and
    /// persisting it first if the store has none.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Storage`] if the store fails or the persisted record
    ///   cannot be parsed
    /// - [`AuthError::InvalidConfig`] if `key_id` is empty
    #[tracing::instrument(skip(backend))]
    pub async fn load_or_generate(backend: &dyn StorageBackend, key_id: &str) -> Result<Self> {
        let key = load_or_generate_key(backend, key_id).await?;
        Self::default().with_key(key)
    }

    /// Looks up a key by id.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnknownKey`] if no key has this id.
    pub fn lookup(&self, key_id: &str) -> Result<&SigningKey> {
        self.keys.get(key_id).ok_or_else(|| AuthError::unknown_key(key_id))
    }

    /// Whether a key with this id is registered.
    #[must_use]
    pub fn contains(&self, key_id: &str) -> bool {
        self.keys.contains_key(key_id)
    }

    /// Number of registered keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the registry holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Computes the MAC of `body` under key `key_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnknownKey`] if no key has this id.
    pub fn sign(&self, key_id: &str, body: &[u8]) -> Result<Vec<u8>> {
        self.lookup(key_id)?.mac(body)
    }

    /// Checks `signature` against the MAC of `body` under key `key_id`.
    ///
    /// An unknown key id still costs one MAC computation, so the time taken
    /// does not reveal whether the key exists.
    ///
    /// # Errors
    ///
    /// - [`AuthError::UnknownKey`] if no key has this id
    /// - [`AuthError::BadSignature`] if the MAC does not match
    pub fn verify(&self, key_id: &str, body: &[u8], signature: &[u8]) -> Result<()> {
        let (expected, known) = match self.keys.get(key_id) {
            Some(key) => (key.mac(body)?, true),
            None => (compute_mac(&THROWAWAY_SECRET, body)?, false),
        };

        let matches: bool = expected.ct_eq(signature).into();
        if !known {
            return Err(AuthError::unknown_key(key_id));
        }
        if !matches {
            return Err(AuthError::BadSignature);
        }
        Ok(())
    }
}

/// Persisted form of a signing key.
#[derive(Serialize, Deserialize)]
struct StoredSigningKey {
    id: String,
    secret: String,
    created_at: DateTime<Utc>,
}

impl StoredSigningKey {
    fn from_key(key: &SigningKey) -> Self {
        Self { id: key.id.clone(), secret: URL_SAFE_NO_PAD.encode(&*key.secret), created_at: Utc::now() }
    }

    fn into_key(self) -> Result<SigningKey> {
        let secret = Zeroizing::new(URL_SAFE_NO_PAD.decode(self.secret.as_bytes()).map_err(|e| {
            StorageError::serialization_with_source(format!("signing key '{}' secret", self.id), e)
        })?);
        SigningKey::new(self.id, secret.to_vec())
    }
}

fn storage_key(key_id: &str) -> Vec<u8> {
    format!("{SIGNING_KEY_PREFIX}{key_id}").into_bytes()
}

async fn read_key(backend: &dyn StorageBackend, key_id: &str) -> Result<Option<SigningKey>> {
    let Some(raw) = backend.get(&storage_key(key_id)).await? else {
        return Ok(None);
    };
    let stored: StoredSigningKey = serde_json::from_slice(&raw).map_err(|e| {
        StorageError::serialization_with_source(format!("signing key '{key_id}' record"), e)
    })?;
    if stored.id != key_id {
        return Err(StorageError::internal(format!(
            "signing key record under '{key_id}' names key '{}'",
            stored.id
        ))
        .into());
    }
    stored.into_key().map(Some)
}

async fn load_or_generate_key(backend: &dyn StorageBackend, key_id: &str) -> Result<SigningKey> {
    if let Some(key) = read_key(backend, key_id).await? {
        tracing::debug!(key_id, "loaded signing key");
        return Ok(key);
    }

    let key = SigningKey::generate(key_id)?;
    let record = serde_json::to_vec(&StoredSigningKey::from_key(&key))
        .map_err(|e| StorageError::serialization_with_source("signing key record", e))?;

    match backend.compare_and_set(&storage_key(key_id), None, record).await {
        Ok(()) => {
            tracing::info!(key_id, "generated signing key");
            Ok(key)
        },
        Err(StorageError::Conflict) => {
            tracing::debug!(key_id, "signing key created concurrently, using stored key");
            read_key(backend, key_id).await?.ok_or_else(|| {
                StorageError::internal(format!("signing key '{key_id}' vanished after conflict")).into()
            })
        },
        Err(e) => Err(e.into()),
    }
}
