//! Shared test utilities for storage backend testing.
//!
//! Feature-gated behind `testutil` so it never leaks into production builds.
//!
//! ```toml
//! [dev-dependencies]
//! tollgate-storage = { path = "../storage", features = ["testutil"] }
//! ```

use crate::error::{StorageError, StorageResult};

/// Assert that a [`StorageResult`] is a [`StorageError::Conflict`].
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use tollgate_storage::assert_conflict;
/// use tollgate_storage::error::{StorageError, StorageResult};
///
/// let result: StorageResult<()> = Err(StorageError::Conflict);
/// assert_conflict!(result);
/// ```
#[macro_export]
macro_rules! assert_conflict {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::Conflict)),
            "expected StorageError::Conflict, got: {:?}",
            $result,
        );
    };
    ($result:expr, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::Conflict)),
            "{}: expected StorageError::Conflict, got: {:?}",
            $msg,
            $result,
        );
    };
}

/// Assert that a [`StorageResult`] is `Ok`, returning the inner value.
#[macro_export]
macro_rules! assert_storage_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StorageError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got StorageError: {e:?}", $msg),
        }
    };
}

/// Create a deterministic test key from a prefix and index, e.g. `"prefix:000042"`.
#[must_use]
pub fn make_key(prefix: &str, idx: usize) -> Vec<u8> {
    format!("{prefix}:{idx:06}").into_bytes()
}

/// Whether a result is a [`StorageError::Conflict`].
pub fn is_conflict<T>(result: &StorageResult<T>) -> bool {
    matches!(result, Err(StorageError::Conflict))
}
