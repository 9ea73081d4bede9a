//! In-memory storage backend implementation.
//!
//! [`MemoryBackend`] implements [`StorageBackend`] over a
//! [`parking_lot::RwLock`]-guarded [`BTreeMap`]. It is the backend used by
//! tests and single-process deployments.
//!
//! Transactions buffer their writes and verify every compare-and-set
//! precondition under the write lock at commit time, so two transactions
//! racing to insert the same absent key cannot both commit.
//!
//! # Example
//!
//! ```
//! use tollgate_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = MemoryBackend::new();
//!
//!     backend.set(b"greeting".to_vec(), b"hello".to_vec()).await.unwrap();
//!     let value = backend.get(b"greeting").await.unwrap();
//!
//!     assert_eq!(value.unwrap().as_ref(), b"hello");
//! }
//! ```
//!
//! # Limitations
//!
//! Data is not persisted; everything is lost when the process exits.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    transaction::Transaction,
};

/// In-memory storage backend using [`BTreeMap`].
///
/// # Cloning
///
/// `MemoryBackend` is cheaply cloneable via [`Arc`]. All clones share the
/// same underlying data, which is how tests simulate several service
/// instances talking to one store.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Bytes>>>,
}

impl MemoryBackend {
    /// Creates a new, empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the backend holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

/// Checks a compare-and-set precondition against the current value.
fn precondition_holds(expected: Option<&[u8]>, current: Option<&Bytes>) -> bool {
    match (expected, current) {
        (None, None) => true,
        (Some(exp), Some(cur)) => exp == &cur[..],
        _ => false,
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    #[tracing::instrument(skip(self, key), fields(key_len = key.len()))]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        let data = self.data.read();
        Ok(data.get(key).cloned())
    }

    #[tracing::instrument(skip(self, key, value), fields(key_len = key.len()))]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.data.write().insert(key, Bytes::from(value));
        Ok(())
    }

    #[tracing::instrument(skip(self, key, expected, new_value), fields(key_len = key.len()))]
    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()> {
        let mut data = self.data.write();

        if !precondition_holds(expected, data.get(key)) {
            return Err(StorageError::Conflict);
        }

        data.insert(key.to_vec(), Bytes::from(new_value));
        Ok(())
    }

    #[tracing::instrument(skip(self, key), fields(key_len = key.len()))]
    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        self.data.write().remove(key);
        Ok(())
    }

    #[tracing::instrument(skip(self, prefix), fields(prefix_len = prefix.len()))]
    async fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Bytes, Bytes)>> {
        let data = self.data.read();
        Ok(data
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (Bytes::copy_from_slice(key), value.clone()))
            .collect())
    }

    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction::new(self.clone())))
    }

    async fn health_check(&self) -> StorageResult<()> {
        // Acquiring the read lock proves we are not deadlocked.
        let _unused = self.data.read();
        Ok(())
    }
}

/// A compare-and-set operation to be verified at commit time.
#[derive(Debug, Clone)]
struct CasOperation {
    key: Vec<u8>,
    expected: Option<Vec<u8>>,
    new_value: Vec<u8>,
}

/// In-memory transaction implementation.
///
/// Buffers writes, deletes and CAS operations until commit.
struct MemoryTransaction {
    backend: MemoryBackend,
    pending_writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    pending_cas: Vec<CasOperation>,
}

impl MemoryTransaction {
    fn new(backend: MemoryBackend) -> Self {
        Self { backend, pending_writes: BTreeMap::new(), pending_cas: Vec::new() }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        if let Some(value) = self.pending_writes.get(key) {
            return Ok(value.as_ref().map(|v| Bytes::copy_from_slice(v)));
        }
        // Latest buffered CAS wins for read-your-writes.
        if let Some(cas) = self.pending_cas.iter().rev().find(|cas| cas.key == key) {
            return Ok(Some(Bytes::copy_from_slice(&cas.new_value)));
        }

        self.backend.get(key).await
    }

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.pending_writes.insert(key, Some(value));
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.pending_writes.insert(key, None);
    }

    fn compare_and_set(
        &mut self,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
    ) -> StorageResult<()> {
        self.pending_cas.push(CasOperation { key, expected, new_value });
        Ok(())
    }

    #[tracing::instrument(name = "commit", skip_all)]
    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let MemoryTransaction { backend, pending_writes, pending_cas } = *self;
        let mut data = backend.data.write();

        // Every precondition is checked before anything is applied.
        for cas in &pending_cas {
            if !precondition_holds(cas.expected.as_deref(), data.get(&cas.key)) {
                tracing::debug!("compare-and-set precondition failed at commit");
                return Err(StorageError::Conflict);
            }
        }

        for cas in pending_cas {
            data.insert(cas.key, Bytes::from(cas.new_value));
        }

        for (key, value) in pending_writes {
            match value {
                Some(v) => {
                    data.insert(key, Bytes::from(v));
                },
                None => {
                    data.remove(&key);
                },
            }
        }

        Ok(())
    }
}
