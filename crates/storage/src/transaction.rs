//! Transaction trait for atomic storage operations.
//!
//! Transactions provide:
//! - **Atomicity**: all buffered operations are applied together or not at all
//! - **Read-your-writes**: reads within a transaction see pending writes
//! - **Commit-time preconditions**: compare-and-set operations are checked when the transaction
//!   commits, which is how read-check-set sequences stay race free
//!
//! # Example
//!
//! ```
//! use tollgate_storage::{MemoryBackend, StorageBackend};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let backend = MemoryBackend::new();
//!
//! // Insert a marker only if nobody else has.
//! let mut txn = backend.transaction().await.unwrap();
//! assert!(txn.get(b"setup/done").await.unwrap().is_none());
//! txn.compare_and_set(b"setup/done".to_vec(), None, b"1".to_vec()).unwrap();
//! txn.commit().await.unwrap();
//!
//! assert!(backend.get(b"setup/done").await.unwrap().is_some());
//! # });
//! ```

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageResult;

/// Transaction handle for atomic multi-operation commits.
///
/// A transaction buffers sets, deletes and compare-and-set operations until
/// [`commit`](Transaction::commit) is called.
///
/// # Concurrency
///
/// Transactions use optimistic concurrency control. If a buffered
/// compare-and-set precondition no longer holds at commit time (because
/// another transaction committed first), the commit fails with
/// [`StorageError::Conflict`](crate::StorageError::Conflict) and nothing is
/// applied.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Gets a value within the transaction.
    ///
    /// Pending writes in this transaction take precedence over the
    /// underlying store.
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Buffers a set operation.
    fn set(&mut self, key: Vec<u8>, value: Vec<u8>);

    /// Buffers a delete operation.
    fn delete(&mut self, key: Vec<u8>);

    /// Buffers a compare-and-set operation.
    ///
    /// The condition is checked at commit time, not when this method is
    /// called. Use `expected: None` to require that the key does not exist.
    fn compare_and_set(
        &mut self,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
    ) -> StorageResult<()>;

    /// Commits all buffered operations atomically.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Conflict`](crate::StorageError::Conflict) if any compare-and-set
    ///   precondition fails
    /// - Other [`StorageError`](crate::StorageError) variants on backend failures
    async fn commit(self: Box<Self>) -> StorageResult<()>;
}
