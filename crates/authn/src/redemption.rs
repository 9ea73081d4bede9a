//! Single-use invite tracking.
//!
//! Invites are stateless by default: one stays exchangeable until it expires.
//! Passing an [`InviteRedemptions`] store to the
//! [`InviteExchanger`](crate::InviteExchanger) makes each invite single-use.
//!
//! Invites are identified by [`fingerprint`], a digest of the invite's
//! signature. Records only need to live until the invite expires, because
//! after that the exchange fails on expiry anyway. The in-memory tracker
//! drops them on its own; the storage-backed one removes them in
//! [`InviteRedemptions::purge_expired`], which the host runs periodically.
//!
//! Two implementations are provided:
//!
//! - [`MemoryInviteRedemptions`]: process-local, capacity-bounded, each entry expiring with its
//!   invite
//! - [`StorageInviteRedemptions`]: shared through a [`StorageBackend`], for deployments running
//!   several instances

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use moka::{future::Cache, policy::EvictionPolicy};
use sha2::{Digest, Sha256};
use tollgate_storage::{StorageBackend, StorageError, StorageResult};

use crate::error::{AuthError, Result};

/// Storage key prefix for redemption records.
pub const REDEMPTION_PREFIX: &str = "invite-redemptions/";

/// Default capacity of [`MemoryInviteRedemptions`].
pub const DEFAULT_REDEMPTION_CAPACITY: u64 = 100_000;

/// Stable identifier of an invite: unpadded base64url SHA-256 of its
/// signature.
#[must_use]
pub fn fingerprint(signature: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(signature))
}

/// Records which invites have been exchanged.
#[async_trait]
pub trait InviteRedemptions: Send + Sync {
    /// Marks the invite as redeemed, failing if it already was.
    ///
    /// `expires_at` bounds how long the record has to be kept.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InviteRedeemed`] if the invite was redeemed before
    /// - [`AuthError::Storage`] if the backing store fails
    async fn check_and_mark(&self, fingerprint: &str, expires_at: DateTime<Utc>) -> Result<()>;

    /// Removes records whose invite has expired, returning how many were
    /// removed.
    ///
    /// Trackers that expire records by themselves keep the default, which
    /// does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the backing store fails.
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
}

/// Per-entry expiry policy: the cached value is the absolute expiry instant.
struct RedemptionExpiry;

impl moka::Expiry<String, Instant> for RedemptionExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Instant,
        created_at: Instant,
    ) -> Option<Duration> {
        Some(value.saturating_duration_since(created_at))
    }
}

/// Process-local redemption tracking backed by a [`moka::future::Cache`].
pub struct MemoryInviteRedemptions {
    redeemed: Cache<String, Instant>,
}

impl MemoryInviteRedemptions {
    /// Creates a tracker holding at most `max_capacity` live records.
    ///
    /// Beyond capacity the least recently used record is evicted, which
    /// makes that invite exchangeable again until it expires. Size the
    /// capacity above the number of invites live at any time.
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        let redeemed = Cache::builder()
            .max_capacity(max_capacity)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(RedemptionExpiry)
            .build();
        Self { redeemed }
    }
}

impl Default for MemoryInviteRedemptions {
    fn default() -> Self {
        Self::new(DEFAULT_REDEMPTION_CAPACITY)
    }
}

#[async_trait]
impl InviteRedemptions for MemoryInviteRedemptions {
    async fn check_and_mark(&self, fingerprint: &str, expires_at: DateTime<Utc>) -> Result<()> {
        let remaining = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let expiry = Instant::now() + remaining;

        // `entry().or_insert` is atomic per key, so of two concurrent
        // redemptions exactly one observes a fresh entry.
        let entry = self.redeemed.entry(fingerprint.to_owned()).or_insert(expiry).await;
        if entry.is_fresh() { Ok(()) } else { Err(AuthError::InviteRedeemed) }
    }
}

/// Redemption tracking shared through a [`StorageBackend`].
///
/// Each record lives at `invite-redemptions/{fingerprint}` and holds the
/// invite's expiry as an RFC 3339 timestamp. A record whose invite has
/// expired is treated as absent and overwritten, and is deleted by
/// [`purge_expired`](InviteRedemptions::purge_expired). A record that does
/// not parse counts as redeemed and is never purged.
///
/// Transient store errors ([`StorageError::is_transient`]) and lost
/// compare-and-set races are retried a bounded number of times.
#[derive(Clone)]
pub struct StorageInviteRedemptions {
    backend: Arc<dyn StorageBackend>,
}

impl StorageInviteRedemptions {
    /// Creates a tracker over a backend.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// One read-check-write round.
    async fn try_mark(&self, key: &[u8], record: &[u8]) -> StorageResult<MarkOutcome> {
        let current = self.backend.get(key).await?;
        if let Some(existing) = &current {
            if !record_expired(existing, Utc::now()) {
                return Ok(MarkOutcome::AlreadyRedeemed);
            }
            tracing::debug!("replacing expired redemption record");
        }

        self.backend.compare_and_set(key, current.as_deref(), record.to_vec()).await?;
        Ok(MarkOutcome::Marked)
    }
}

enum MarkOutcome {
    Marked,
    AlreadyRedeemed,
}

/// Whether a stored record belongs to an invite expired at `now`.
///
/// Unparseable records are never expired.
fn record_expired(record: &[u8], now: DateTime<Utc>) -> bool {
    std::str::from_utf8(record)
        .ok()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .is_some_and(|recorded| recorded <= now)
}

/// Upper bound on attempts when records race or the store hiccups.
const MAX_MARK_ATTEMPTS: usize = 8;

#[async_trait]
impl InviteRedemptions for StorageInviteRedemptions {
    #[tracing::instrument(skip(self, expires_at))]
    async fn check_and_mark(&self, fingerprint: &str, expires_at: DateTime<Utc>) -> Result<()> {
        let key = format!("{REDEMPTION_PREFIX}{fingerprint}").into_bytes();
        let record = expires_at.to_rfc3339().into_bytes();

        let mut last_error = StorageError::internal("redemption record kept changing");
        for attempt in 1..=MAX_MARK_ATTEMPTS {
            match self.try_mark(&key, &record).await {
                Ok(MarkOutcome::Marked) => return Ok(()),
                Ok(MarkOutcome::AlreadyRedeemed) => return Err(AuthError::InviteRedeemed),
                Err(e) if e.is_transient() || matches!(e, StorageError::Conflict) => {
                    tracing::debug!(attempt, error = %e, "retrying redemption mark");
                    last_error = e;
                },
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_error.into())
    }

    #[tracing::instrument(skip(self))]
    async fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut purged = 0;

        for (key, value) in self.backend.scan_prefix(REDEMPTION_PREFIX.as_bytes()).await? {
            if !record_expired(&value, now) {
                continue;
            }

            // The compare-and-set guards the delete against a concurrent
            // replacement of the record.
            let mut txn = self.backend.transaction().await?;
            txn.compare_and_set(key.to_vec(), Some(value.to_vec()), value.to_vec())?;
            txn.delete(key.to_vec());
            match txn.commit().await {
                Ok(()) => purged += 1,
                Err(StorageError::Conflict) => {
                    tracing::debug!("redemption record changed during purge");
                },
                Err(e) => return Err(e.into()),
            }
        }

        tracing::debug!(purged, "purged expired redemption records");
        Ok(purged)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;
    use tollgate_storage::{MemoryBackend, Transaction};

    use super::*;

    /// Fails the first `failures` reads with `error`, then delegates.
    struct FlakyBackend {
        inner: MemoryBackend,
        failures: AtomicUsize,
        error: fn() -> StorageError,
    }

    impl FlakyBackend {
        fn new(failures: usize, error: fn() -> StorageError) -> Self {
            Self { inner: MemoryBackend::new(), failures: AtomicUsize::new(failures), error }
        }
    }

    #[async_trait]
    impl StorageBackend for FlakyBackend {
        async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err((self.error)());
            }
            self.inner.get(key).await
        }

        async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
            self.inner.set(key, value).await
        }

        async fn compare_and_set(
            &self,
            key: &[u8],
            expected: Option<&[u8]>,
            new_value: Vec<u8>,
        ) -> StorageResult<()> {
            self.inner.compare_and_set(key, expected, new_value).await
        }

        async fn delete(&self, key: &[u8]) -> StorageResult<()> {
            self.inner.delete(key).await
        }

        async fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Bytes, Bytes)>> {
            self.inner.scan_prefix(prefix).await
        }

        async fn transaction(&self) -> StorageResult<Box<dyn Transaction>> {
            self.inner.transaction().await
        }

        async fn health_check(&self) -> StorageResult<()> {
            Ok(())
        }
    }

    fn in_a_minute() -> DateTime<Utc> {
        Utc::now() + chrono::Duration::seconds(60)
    }

    #[test]
    fn test_fingerprint_is_stable_and_distinct() {
        assert_eq!(fingerprint(b"sig-a"), fingerprint(b"sig-a"));
        assert_ne!(fingerprint(b"sig-a"), fingerprint(b"sig-b"));
        assert_eq!(fingerprint(b"sig-a").len(), 43);
    }

    #[tokio::test]
    async fn test_memory_second_redemption_rejected() {
        let redemptions = MemoryInviteRedemptions::new(100);
        redemptions.check_and_mark("fp-1", in_a_minute()).await.unwrap();

        let result = redemptions.check_and_mark("fp-1", in_a_minute()).await;
        assert!(matches!(result, Err(AuthError::InviteRedeemed)));
        redemptions.check_and_mark("fp-2", in_a_minute()).await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_record_expires_with_invite() {
        let redemptions = MemoryInviteRedemptions::new(100);
        let expires_at = Utc::now() + chrono::Duration::milliseconds(50);
        redemptions.check_and_mark("fp-exp", expires_at).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        redemptions.redeemed.run_pending_tasks().await;

        redemptions.check_and_mark("fp-exp", in_a_minute()).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_memory_concurrent_redemptions_single_winner() {
        let redemptions = Arc::new(MemoryInviteRedemptions::new(100));
        let expires_at = in_a_minute();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let redemptions = Arc::clone(&redemptions);
            handles.push(tokio::spawn(async move {
                redemptions.check_and_mark("fp-race", expires_at).await.is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_storage_second_redemption_rejected() {
        let backend = Arc::new(MemoryBackend::new());
        let redemptions = StorageInviteRedemptions::new(backend.clone());
        redemptions.check_and_mark("fp-1", in_a_minute()).await.unwrap();

        let result = redemptions.check_and_mark("fp-1", in_a_minute()).await;
        assert!(matches!(result, Err(AuthError::InviteRedeemed)));

        let stored = backend.get(b"invite-redemptions/fp-1").await.unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn test_storage_shared_between_instances() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let a = StorageInviteRedemptions::new(Arc::clone(&backend));
        let b = StorageInviteRedemptions::new(backend);

        a.check_and_mark("fp-shared", in_a_minute()).await.unwrap();
        let result = b.check_and_mark("fp-shared", in_a_minute()).await;
        assert!(matches!(result, Err(AuthError::InviteRedeemed)));
    }

    #[tokio::test]
    async fn test_storage_expired_record_replaced() {
        let backend = Arc::new(MemoryBackend::new());
        let redemptions = StorageInviteRedemptions::new(backend.clone());
        let past = Utc::now() - chrono::Duration::seconds(5);
        backend
            .set(b"invite-redemptions/fp-old".to_vec(), past.to_rfc3339().into_bytes())
            .await
            .unwrap();

        redemptions.check_and_mark("fp-old", in_a_minute()).await.unwrap();
        let result = redemptions.check_and_mark("fp-old", in_a_minute()).await;
        assert!(matches!(result, Err(AuthError::InviteRedeemed)));
    }

    #[tokio::test]
    async fn test_storage_unparseable_record_counts_as_redeemed() {
        let backend = Arc::new(MemoryBackend::new());
        let redemptions = StorageInviteRedemptions::new(backend.clone());
        backend.set(b"invite-redemptions/fp-bad".to_vec(), b"???".to_vec()).await.unwrap();

        let result = redemptions.check_and_mark("fp-bad", in_a_minute()).await;
        assert!(matches!(result, Err(AuthError::InviteRedeemed)));
    }

    #[tokio::test]
    async fn test_storage_transient_errors_retried() {
        let backend = Arc::new(FlakyBackend::new(3, StorageError::timeout));
        let redemptions = StorageInviteRedemptions::new(backend.clone());

        redemptions.check_and_mark("fp-flaky", in_a_minute()).await.unwrap();
        assert!(backend.inner.get(b"invite-redemptions/fp-flaky").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_storage_persistent_transient_error_surfaces() {
        let backend = Arc::new(FlakyBackend::new(usize::MAX, StorageError::timeout));
        let redemptions = StorageInviteRedemptions::new(backend);

        let result = redemptions.check_and_mark("fp-down", in_a_minute()).await;
        assert!(matches!(result, Err(AuthError::Storage(StorageError::Timeout))));
    }

    #[tokio::test]
    async fn test_storage_permanent_error_not_retried() {
        let backend = Arc::new(FlakyBackend::new(1, || StorageError::internal("disk full")));
        let redemptions = StorageInviteRedemptions::new(backend.clone());

        let result = redemptions.check_and_mark("fp-broken", in_a_minute()).await;
        assert!(matches!(result, Err(AuthError::Storage(StorageError::Internal { .. }))));
        assert!(backend.inner.is_empty());
    }

    #[tokio::test]
    async fn test_storage_purge_removes_only_expired_records() {
        let backend = Arc::new(MemoryBackend::new());
        let redemptions = StorageInviteRedemptions::new(backend.clone());
        let past = Utc::now() - chrono::Duration::seconds(5);

        redemptions.check_and_mark("fp-live", in_a_minute()).await.unwrap();
        for fp in ["fp-old-1", "fp-old-2"] {
            let key = format!("{REDEMPTION_PREFIX}{fp}").into_bytes();
            backend.set(key, past.to_rfc3339().into_bytes()).await.unwrap();
        }
        backend.set(b"invite-redemptions/fp-bad".to_vec(), b"???".to_vec()).await.unwrap();
        backend.set(b"signing-keys/k1".to_vec(), past.to_rfc3339().into_bytes()).await.unwrap();

        assert_eq!(redemptions.purge_expired().await.unwrap(), 2);
        assert_eq!(redemptions.purge_expired().await.unwrap(), 0);

        assert!(backend.get(b"invite-redemptions/fp-old-1").await.unwrap().is_none());
        assert!(backend.get(b"invite-redemptions/fp-live").await.unwrap().is_some());
        assert!(backend.get(b"invite-redemptions/fp-bad").await.unwrap().is_some());
        assert!(backend.get(b"signing-keys/k1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_memory_purge_is_noop() {
        let redemptions = MemoryInviteRedemptions::new(100);
        redemptions.check_and_mark("fp-1", in_a_minute()).await.unwrap();
        assert_eq!(redemptions.purge_expired().await.unwrap(), 0);
    }
}
