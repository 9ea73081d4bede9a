//! # Tollgate Authentication
//!
//! Signed bearer tokens for the Tollgate control plane.
//!
//! This crate provides:
//! - **Signing key registry**: HMAC-SHA256 keys addressed by key id, loaded from or generated into
//!   a [`StorageBackend`](tollgate_storage::StorageBackend)
//! - **Token codec**: base58 token strings with a fixed magic prefix
//! - **Issuance**: login, entrypoint-scoped and invite tokens
//! - **Authentication**: signature verification plus per-method authorization
//! - **Invite exchange**: time-bounded invites, optionally single-use
//! - **Bootstrap**: exactly one privileged token per deployment
//!
//! ## Token kinds
//!
//! | Kind | Grants |
//! |------|--------|
//! | Login | every method, except entrypoint-only ones |
//! | Login with entrypoint marker, or Entrypoint | the entrypoint method allowlist |
//! | Invite | nothing directly; exchangeable for a login until it expires |
//!
//! ## Example
//!
//! ```
//! use std::{sync::Arc, time::Duration};
//! use tollgate_authn::{AuthConfig, AuthError, AuthService, EntrypointRef, Metadata};
//! use tollgate_storage::MemoryBackend;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let service = AuthService::open(Arc::new(MemoryBackend::new()), AuthConfig::default()).await?;
//!
//! // An agent-scoped invite, exchanged for a login token.
//! let invite = service
//!     .new_invite_token(Duration::from_secs(300), Metadata::new(), Some(EntrypointRef::default()))
//!     .await?;
//! let token = service.exchange_invite(&invite).await?;
//!
//! service.authenticate(&token, "EntrypointConfig", None)?;
//! let denied = service.authenticate(&token, "UpsertDeployment", None).unwrap_err();
//! assert_eq!(denied.public_message(), "permission denied");
//! # Ok::<(), AuthError>(())
//! # }).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Audit trail for credential operations.
pub mod audit;
/// Token verification and method authorization.
pub mod authenticator;
/// One-time bootstrap token.
pub mod bootstrap;
/// Token string encoding.
pub mod codec;
/// Authentication configuration.
pub mod config;
/// Authentication error types.
pub mod error;
/// Invite exchange.
pub mod invite;
/// Token issuance.
pub mod issuer;
/// Single-use invite tracking.
pub mod redemption;
/// Signing key registry.
pub mod registry;
/// Service facade.
pub mod service;
/// Shared test utilities.
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
/// Token data model.
pub mod token;

// Re-export key types for convenience
pub use authenticator::{Authenticator, ExtraCheck};
pub use bootstrap::BootstrapController;
pub use codec::TOKEN_MAGIC;
pub use config::AuthConfig;
pub use error::{AuthError, Result};
pub use invite::InviteExchanger;
pub use issuer::TokenIssuer;
pub use redemption::{InviteRedemptions, MemoryInviteRedemptions, StorageInviteRedemptions};
pub use registry::{SigningKey, SigningKeyRegistry};
pub use service::AuthService;
pub use token::{EntrypointRef, InviteToken, LoginToken, Metadata, TokenBody, TokenEnvelope};
