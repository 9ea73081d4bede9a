//! Storage error types and result alias.
//!
//! All storage backends map their internal failures to [`StorageError`].
//! Callers in the auth layer only need to distinguish two outcomes: a
//! [`StorageError::Conflict`] (another writer won an optimistic race) and
//! everything else (the store itself is unhealthy).
//!
//! # Example
//!
//! ```
//! use tollgate_storage::{StorageError, StorageResult};
//!
//! fn claim(won: bool) -> StorageResult<()> {
//!     if won { Ok(()) } else { Err(StorageError::conflict()) }
//! }
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// Errors preserve their source chain via `#[source]`, so structured logging
/// can display the full context.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match expressions
/// must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// Optimistic concurrency failure.
    ///
    /// Returned when a compare-and-set precondition does not hold, either
    /// directly or at transaction commit time.
    #[error("Transaction conflict")]
    Conflict,

    /// Connection or network error.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying error that caused this connection failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Serialization or deserialization error.
    ///
    /// Usually indicates a corrupted record or a schema mismatch.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error that caused serialization to fail.
        #[source]
        source: Option<BoxError>,
    },

    /// Internal storage backend error.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Operation timed out.
    #[error("Operation timeout")]
    Timeout,
}

impl StorageError {
    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict() -> Self {
        Self::Conflict
    }

    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Whether retrying the same operation may succeed.
    ///
    /// `Conflict` is not transient: the precondition failed because another
    /// writer committed, so the caller has to re-read before deciding again.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout)
    }
}
