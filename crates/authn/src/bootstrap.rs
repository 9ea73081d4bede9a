//! One-time bootstrap token.
//!
//! A fresh deployment has no credentials. The first caller of
//! [`BootstrapController::bootstrap`] receives a full login token; every
//! later caller, concurrent or not, gets `PermissionDenied`.
//!
//! The flag is a key in the transactional store:
//!
//! ```text
//! txn = backend.transaction()
//! txn.get(server-config/bootstrapped)       present → PermissionDenied
//! txn.compare_and_set(.., expected = None)  buffered
//! mint login token
//! txn.commit()                              Conflict → PermissionDenied
//! ```
//!
//! The compare-and-set is checked at commit under the store's write lock, so
//! of N racing callers exactly one commits. The token is only returned after
//! that commit succeeds.

use std::sync::Arc;

use chrono::Utc;
use fail::fail_point;
use tollgate_storage::{StorageBackend, StorageError};

use crate::{
    error::{AuthError, Result},
    issuer::TokenIssuer,
    token::Metadata,
};

/// Store key whose presence means the deployment has been bootstrapped.
pub const BOOTSTRAP_KEY: &[u8] = b"server-config/bootstrapped";

const ALREADY_BOOTSTRAPPED: &str = "server is already bootstrapped";

/// Issues the single bootstrap token of a deployment.
#[derive(Clone)]
pub struct BootstrapController {
    backend: Arc<dyn StorageBackend>,
    issuer: TokenIssuer,
}

impl BootstrapController {
    /// Creates a controller over the store holding the bootstrap flag.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>, issuer: TokenIssuer) -> Self {
        Self { backend, issuer }
    }

    /// Issues the bootstrap login token, at most once per store.
    ///
    /// # Errors
    ///
    /// - [`AuthError::PermissionDenied`] if the deployment is already
    ///   bootstrapped or another caller won the race
    /// - [`AuthError::Storage`] for any other store failure; no token is
    ///   returned and the flag is left unset
    #[tracing::instrument(skip(self))]
    pub async fn bootstrap(&self) -> Result<String> {
        let mut txn = self.backend.transaction().await?;

        if txn.get(BOOTSTRAP_KEY).await?.is_some() {
            tracing::warn!("bootstrap requested after completion");
            return Err(AuthError::permission_denied(ALREADY_BOOTSTRAPPED));
        }

        txn.compare_and_set(BOOTSTRAP_KEY.to_vec(), None, Utc::now().to_rfc3339().into_bytes())?;

        let token =
            self.issuer.new_login_token(self.issuer.default_key_id(), Metadata::new(), None)?;

        fail_point!("bootstrap-before-commit", |_| {
            Err(AuthError::Storage(StorageError::internal("injected failure before bootstrap commit")))
        });

        match txn.commit().await {
            Ok(()) => {
                tracing::info!("deployment bootstrapped");
                Ok(token)
            },
            Err(StorageError::Conflict) => {
                tracing::warn!("bootstrap lost race to a concurrent caller");
                Err(AuthError::permission_denied(ALREADY_BOOTSTRAPPED))
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a bootstrap token has already been issued.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the store cannot be read.
    pub async fn is_bootstrapped(&self) -> Result<bool> {
        Ok(self.backend.get(BOOTSTRAP_KEY).await?.is_some())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use async_trait::async_trait;
    use bytes::Bytes;
    use tollgate_storage::{MemoryBackend, StorageResult, Transaction};

    use super::*;
    use crate::{
        authenticator::Authenticator,
        config::AuthConfig,
        registry::{SigningKey, SigningKeyRegistry},
    };

    fn setup(backend: Arc<dyn StorageBackend>) -> (BootstrapController, Authenticator) {
        let registry = Arc::new(
            SigningKeyRegistry::builder()
                .keys(vec![SigningKey::new("k1", b"secret".to_vec()).unwrap()])
                .build()
                .unwrap(),
        );
        let config = Arc::new(AuthConfig::default());
        let issuer = TokenIssuer::new(Arc::clone(&registry), Arc::clone(&config));
        (BootstrapController::new(backend, issuer), Authenticator::new(registry, config))
    }

    #[tokio::test]
    async fn test_bootstrap_once() {
        let backend = Arc::new(MemoryBackend::new());
        let (controller, auth) = setup(backend.clone());
        assert!(!controller.is_bootstrapped().await.unwrap());

        let token = controller.bootstrap().await.unwrap();
        let body = auth.authenticate(&token, "UpsertDeployment", None).unwrap();
        let login = body.as_login().unwrap();
        assert_eq!(login.user_id, crate::config::DEFAULT_USER);
        assert!(login.entrypoint.is_none());
        assert!(controller.is_bootstrapped().await.unwrap());

        let second = controller.bootstrap().await;
        assert!(matches!(second, Err(AuthError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_flag_shared_through_store() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let (first, _) = setup(Arc::clone(&backend));
        let (second, _) = setup(backend);

        first.bootstrap().await.unwrap();
        assert!(matches!(second.bootstrap().await, Err(AuthError::PermissionDenied(_))));
    }

    /// Backend whose transactions always fail to commit.
    struct FailingCommitBackend {
        inner: MemoryBackend,
    }

    struct FailingCommitTransaction {
        inner: Box<dyn Transaction>,
    }

    #[async_trait]
    impl Transaction for FailingCommitTransaction {
        async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
            self.inner.get(key).await
        }

        fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
            self.inner.set(key, value);
        }

        fn delete(&mut self, key: Vec<u8>) {
            self.inner.delete(key);
        }

        fn compare_and_set(
            &mut self,
            key: Vec<u8>,
            expected: Option<Vec<u8>>,
            new_value: Vec<u8>,
        ) -> StorageResult<()> {
            self.inner.compare_and_set(key, expected, new_value)
        }

        async fn commit(self: Box<Self>) -> StorageResult<()> {
            Err(StorageError::timeout())
        }
    }

    #[async_trait]
    impl StorageBackend for FailingCommitBackend {
        async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
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
            Ok(Box::new(FailingCommitTransaction { inner: self.inner.transaction().await? }))
        }

        async fn health_check(&self) -> StorageResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_commit_failure_surfaces_storage_error() {
        let inner = MemoryBackend::new();
        let backend = Arc::new(FailingCommitBackend { inner: inner.clone() });
        let (controller, _) = setup(backend);

        let result = controller.bootstrap().await;
        assert!(matches!(result, Err(AuthError::Storage(StorageError::Timeout))));
        assert!(inner.get(BOOTSTRAP_KEY).await.unwrap().is_none());

        // The flag was never set, so a healthy store can still bootstrap.
        let (healthy, _) = setup(Arc::new(inner));
        healthy.bootstrap().await.unwrap();
    }
}
