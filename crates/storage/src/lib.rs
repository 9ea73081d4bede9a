//! Transactional key-value storage for Tollgate services.
//!
//! This crate provides the [`StorageBackend`] and [`Transaction`] traits the
//! authentication layer persists its small amount of state through: the
//! one-time bootstrap flag, provisioned signing keys and (optionally)
//! redeemed invite fingerprints.
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │              tollgate-authn                   │
//! │  bootstrap │ key provisioning │ redemptions   │
//! ├───────────────────────────────────────────────┤
//! │              tollgate-storage                 │
//! │   StorageBackend (get, set, cas, delete,      │
//! │                   transaction)                │
//! ├───────────────────────────────────────────────┤
//! │ MemoryBackend │   durable backends            │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use tollgate_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MemoryBackend::new();
//!
//!     backend.set(b"user:123".to_vec(), b"Alice".to_vec()).await?;
//!     let value = backend.get(b"user:123").await?;
//!     assert_eq!(value.map(|b| b.to_vec()), Some(b"Alice".to_vec()));
//!
//!     let mut txn = backend.transaction().await?;
//!     txn.set(b"counter".to_vec(), b"1".to_vec());
//!     txn.set(b"updated".to_vec(), b"true".to_vec());
//!     txn.commit().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Implementing a Backend
//!
//! 1. Implement the [`StorageBackend`] trait
//! 2. Implement a corresponding [`Transaction`] type that checks compare-and-set preconditions
//!    atomically at commit
//! 3. Map backend-specific errors to [`StorageError`]
//!
//! See the [`memory`] module source for a reference implementation.

#![deny(unsafe_code)]

pub mod backend;
pub mod error;
pub mod memory;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;
pub mod transaction;

pub use backend::StorageBackend;
pub use error::{BoxError, StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use transaction::Transaction;
