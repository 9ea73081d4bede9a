//! Storage backend trait definition.
//!
//! [`StorageBackend`] is the narrow persistence interface the auth layer
//! consumes: single-key reads and writes, an atomic compare-and-set, and
//! optimistic transactions. Keys and values are raw bytes; record encoding
//! lives with the callers.
//!
//! The trait is object safe so services can hold an
//! `Arc<dyn StorageBackend>` and swap the in-memory backend for a durable one
//! without touching the auth code.

use async_trait::async_trait;
use bytes::Bytes;

use crate::{error::StorageResult, transaction::Transaction};

/// Abstract storage backend for key-value operations.
///
/// Backends must be thread-safe (`Send + Sync`) and support concurrent
/// operations.
///
/// | Method | Description |
/// |--------|-------------|
/// | [`get`](StorageBackend::get) | Retrieve a single value by key |
/// | [`set`](StorageBackend::set) | Store a key-value pair |
/// | [`compare_and_set`](StorageBackend::compare_and_set) | Atomic compare-and-swap |
/// | [`delete`](StorageBackend::delete) | Remove a key |
/// | [`scan_prefix`](StorageBackend::scan_prefix) | List every pair under a key prefix |
/// | [`transaction`](StorageBackend::transaction) | Begin an atomic transaction |
/// | [`health_check`](StorageBackend::health_check) | Verify backend availability |
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use tollgate_storage::{MemoryBackend, StorageBackend};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let backend = MemoryBackend::new();
///
/// backend.set(b"key".to_vec(), b"value".to_vec()).await.unwrap();
/// let value = backend.get(b"key").await.unwrap();
/// assert_eq!(value, Some(Bytes::from("value")));
/// # });
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieves a value by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Stores a key-value pair, overwriting any existing value.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()>;

    /// Atomically sets a key's value if it matches the expected current value.
    ///
    /// - **`expected: None`**: insert-if-absent. Fails with
    ///   [`Conflict`](crate::StorageError::Conflict) if any value is present.
    /// - **`expected: Some(value)`**: update-if-unchanged. Fails with
    ///   [`Conflict`](crate::StorageError::Conflict) if the key is absent or holds different bytes.
    ///
    /// The comparison is an exact, length-sensitive byte equality check.
    ///
    /// `Conflict` is not transient. Callers that want to retry must re-read
    /// the key and decide again:
    ///
    /// ```no_run
    /// use tollgate_storage::{MemoryBackend, StorageBackend, StorageError};
    ///
    /// async fn increment(backend: &MemoryBackend, key: &[u8]) -> Result<(), StorageError> {
    ///     loop {
    ///         let current = backend.get(key).await?;
    ///         let (expected, new_value) = match current {
    ///             Some(bytes) => {
    ///                 let n: u64 = String::from_utf8_lossy(&bytes).parse().unwrap_or(0);
    ///                 (Some(bytes.to_vec()), (n + 1).to_string().into_bytes())
    ///             },
    ///             None => (None, b"1".to_vec()),
    ///         };
    ///         match backend.compare_and_set(key, expected.as_deref(), new_value).await {
    ///             Ok(()) => return Ok(()),
    ///             Err(StorageError::Conflict) => continue,
    ///             Err(e) => return Err(e),
    ///         }
    ///     }
    /// }
    /// ```
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()>;

    /// Deletes a key. Deleting a missing key is not an error.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete(&self, key: &[u8]) -> StorageResult<()>;

    /// Returns every key-value pair whose key starts with `prefix`, in key
    /// order.
    ///
    /// The result is a snapshot; callers that act on it must re-check each
    /// record, for example with a compare-and-set inside a transaction.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Bytes, Bytes)>>;

    /// Begins a new transaction.
    ///
    /// See [`Transaction`] for the isolation and commit semantics.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>>;

    /// Verifies that the backend is reachable and able to serve requests.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn health_check(&self) -> StorageResult<()>;
}
