//! Service facade wiring the auth components together.
//!
//! [`AuthService`] is what the RPC layer holds: it authenticates every call
//! and serves the credential endpoints (bootstrap, login, invite, exchange).
//! New tokens are always signed with the configured default key.
//!
//! ```
//! use std::sync::Arc;
//! use tollgate_authn::{AuthConfig, AuthService, Metadata};
//! use tollgate_storage::MemoryBackend;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let service = AuthService::open(Arc::new(MemoryBackend::new()), AuthConfig::default()).await?;
//!
//! let admin = service.bootstrap_token().await?;
//! service.authenticate(&admin, "UpsertDeployment", None)?;
//!
//! let login = service.new_login_token(Metadata::new(), None).await?;
//! service.authenticate(&login, "ListDeployments", None)?;
//! # Ok::<(), tollgate_authn::AuthError>(())
//! # }).unwrap();
//! ```

use std::{sync::Arc, time::Duration};

use tollgate_storage::StorageBackend;

use crate::{
    audit::{AuditAction, AuditEvent, AuditLogger, AuditResult, TracingAuditLogger},
    authenticator::{Authenticator, ExtraCheck},
    bootstrap::BootstrapController,
    config::AuthConfig,
    error::{AuthError, Result},
    invite::InviteExchanger,
    issuer::TokenIssuer,
    redemption::InviteRedemptions,
    registry::SigningKeyRegistry,
    token::{EntrypointRef, Metadata, TokenBody},
};

/// Token authentication service.
#[derive(Clone)]
pub struct AuthService {
    config: Arc<AuthConfig>,
    registry: Arc<SigningKeyRegistry>,
    issuer: TokenIssuer,
    authenticator: Authenticator,
    invites: InviteExchanger,
    bootstrap: BootstrapController,
    audit: Arc<dyn AuditLogger>,
}

#[bon::bon]
impl AuthService {
    /// Assembles a service from prebuilt parts.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if the configuration is invalid
    /// or the registry lacks the configured default key.
    #[builder]
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        registry: SigningKeyRegistry,
        #[builder(default)] config: AuthConfig,
        redemptions: Option<Arc<dyn InviteRedemptions>>,
        #[builder(default = Arc::new(TracingAuditLogger) as Arc<dyn AuditLogger>)] audit_logger: Arc<dyn AuditLogger>,
    ) -> Result<Self> {
        config.validate()?;
        if !registry.contains(config.default_key_id()) {
            return Err(AuthError::invalid_config(format!(
                "default signing key '{}' is not registered",
                config.default_key_id()
            )));
        }

        let config = Arc::new(config);
        let registry = Arc::new(registry);
        let issuer = TokenIssuer::new(Arc::clone(&registry), Arc::clone(&config));
        let authenticator = Authenticator::new(Arc::clone(&registry), Arc::clone(&config));

        let mut invites = InviteExchanger::new(issuer.clone(), authenticator.clone());
        if let Some(redemptions) = redemptions {
            invites = invites.with_redemptions(redemptions);
        }

        let bootstrap = BootstrapController::new(backend, issuer.clone());

        Ok(Self {
            config,
            registry,
            issuer,
            authenticator,
            invites,
            bootstrap,
            audit: audit_logger,
        })
    }
}

impl AuthService {
    /// Opens the service over a store, loading the default signing key from
    /// it or generating one on first run.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidConfig`] if the configuration is invalid
    /// - [`AuthError::Storage`] if the key cannot be loaded or persisted
    #[tracing::instrument(skip_all, fields(key_id = config.default_key_id()))]
    pub async fn open(backend: Arc<dyn StorageBackend>, config: AuthConfig) -> Result<Self> {
        config.validate()?;
        let registry =
            SigningKeyRegistry::load_or_generate(backend.as_ref(), config.default_key_id()).await?;
        Self::builder().backend(backend).registry(registry).config(config).build()
    }

    /// Verifies `token` and authorizes it for `method`.
    ///
    /// # Errors
    ///
    /// See [`Authenticator::authenticate`].
    pub fn authenticate(
        &self,
        token: &str,
        method: &str,
        extra_check: Option<ExtraCheck<'_>>,
    ) -> Result<TokenBody> {
        self.authenticator.authenticate(token, method, extra_check)
    }

    /// Verifies `token` and returns its body without applying method policy.
    ///
    /// # Errors
    ///
    /// See [`Authenticator::decode_and_verify`].
    pub fn decode_token(&self, token: &str) -> Result<TokenBody> {
        self.authenticator.decode_and_verify(token).map(|(_, body)| body)
    }

    /// Issues the deployment's one-time bootstrap token.
    ///
    /// # Errors
    ///
    /// See [`BootstrapController::bootstrap`].
    pub async fn bootstrap_token(&self) -> Result<String> {
        let result = self.bootstrap.bootstrap().await;
        self.record(AuditAction::Bootstrap, Metadata::new(), &result).await;
        result
    }

    /// Whether the bootstrap token has been issued.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the store cannot be read.
    pub async fn is_bootstrapped(&self) -> Result<bool> {
        self.bootstrap.is_bootstrapped().await
    }

    /// Mints a login token signed with the default key.
    ///
    /// # Errors
    ///
    /// See [`TokenIssuer::new_login_token`].
    pub async fn new_login_token(
        &self,
        metadata: Metadata,
        entrypoint: Option<EntrypointRef>,
    ) -> Result<String> {
        let result =
            self.issuer.new_login_token(self.config.default_key_id(), metadata.clone(), entrypoint);
        self.record(AuditAction::IssueLogin, metadata, &result).await;
        result
    }

    /// Mints an invite signed with the default key.
    ///
    /// # Errors
    ///
    /// See [`TokenIssuer::new_invite_token`].
    pub async fn new_invite_token(
        &self,
        ttl: Duration,
        metadata: Metadata,
        entrypoint: Option<EntrypointRef>,
    ) -> Result<String> {
        let result = self.issuer.new_invite_token(
            ttl,
            self.config.default_key_id(),
            metadata.clone(),
            entrypoint,
        );
        self.record(AuditAction::IssueInvite, metadata, &result).await;
        result
    }

    /// Mints a bare entrypoint token signed with the default key.
    ///
    /// # Errors
    ///
    /// See [`TokenIssuer::new_entrypoint_token`].
    pub async fn new_entrypoint_token(&self, entrypoint: EntrypointRef) -> Result<String> {
        let result = self.issuer.new_entrypoint_token(self.config.default_key_id(), entrypoint);
        self.record(AuditAction::IssueEntrypoint, Metadata::new(), &result).await;
        result
    }

    /// Exchanges an invite for a login token signed with the default key.
    ///
    /// # Errors
    ///
    /// See [`InviteExchanger::exchange_invite`].
    pub async fn exchange_invite(&self, token: &str) -> Result<String> {
        let result = self.invites.exchange_invite(self.config.default_key_id(), token).await;
        self.record(AuditAction::ExchangeInvite, Metadata::new(), &result).await;
        result
    }

    /// Drops redemption records of expired invites; see
    /// [`InviteRedemptions::purge_expired`]. Hosts with single-use invites
    /// run this periodically.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the redemption store fails.
    pub async fn purge_expired_redemptions(&self) -> Result<usize> {
        self.invites.purge_expired_redemptions().await
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// The signing key registry.
    #[must_use]
    pub fn registry(&self) -> &SigningKeyRegistry {
        &self.registry
    }

    async fn record(&self, action: AuditAction, metadata: Metadata, result: &Result<String>) {
        let event = AuditEvent::builder()
            .actor(self.config.default_user())
            .action(action)
            .key_id(self.config.default_key_id())
            .result(AuditResult::from(result))
            .metadata(metadata)
            .build();
        self.audit.log(&event).await;
    }
}
