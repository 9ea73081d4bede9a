//! Token verification and method authorization.
//!
//! # Verification order
//!
//! ```text
//! token string
//!   → codec::decode          (Decode)
//!   → registry lookup        (UnknownKey)
//!   → constant-time MAC      (BadSignature)
//!   → codec::decode_body     (Decode)
//!   → method policy          (PermissionDenied)
//! ```
//!
//! The body is never parsed before its MAC has been checked.
//!
//! # Method policy
//!
//! | Body | Allowed methods |
//! |------|-----------------|
//! | `Entrypoint`, or `Login` with an entrypoint marker | the entrypoint allowlist |
//! | `Login` without a marker | everything except entrypoint-only methods, then `extra_check` |
//! | `Invite` | nothing; invites are only accepted by invite exchange |

use std::sync::Arc;

use crate::{
    codec,
    config::AuthConfig,
    error::{AuthError, Result},
    registry::SigningKeyRegistry,
    token::{TokenBody, TokenEnvelope},
};

/// Caller-supplied predicate applied to full login tokens after the method
/// policy passes. Returning `Err` denies the call with that error.
pub type ExtraCheck<'a> = &'a (dyn Fn(&TokenBody) -> Result<()> + Send + Sync);

/// Verifies tokens and decides whether they may call a method.
#[derive(Debug, Clone)]
pub struct Authenticator {
    registry: Arc<SigningKeyRegistry>,
    config: Arc<AuthConfig>,
}

impl Authenticator {
    /// Creates an authenticator over a registry and method policy.
    #[must_use]
    pub fn new(registry: Arc<SigningKeyRegistry>, config: Arc<AuthConfig>) -> Self {
        Self { registry, config }
    }

    /// Decodes a token and verifies its signature.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Decode`] for a malformed token or body
    /// - [`AuthError::UnknownKey`] if the signing key is not registered
    /// - [`AuthError::BadSignature`] if the MAC does not match
    pub fn decode_and_verify(&self, token: &str) -> Result<(TokenEnvelope, TokenBody)> {
        let envelope = codec::decode(token)?;
        self.registry.verify(&envelope.key_id, &envelope.body, &envelope.signature)?;
        let body = codec::decode_body(&envelope.body)?;
        Ok((envelope, body))
    }

    /// Verifies `token` and authorizes it for `method`.
    ///
    /// Returns the verified body so the caller can read the identity and
    /// metadata it carries.
    ///
    /// # Errors
    ///
    /// Any error from [`decode_and_verify`](Self::decode_and_verify),
    /// [`AuthError::PermissionDenied`] if the method policy denies the call,
    /// or the error returned by `extra_check`.
    #[tracing::instrument(skip(self, token, extra_check))]
    pub fn authenticate(
        &self,
        token: &str,
        method: &str,
        extra_check: Option<ExtraCheck<'_>>,
    ) -> Result<TokenBody> {
        let result = self
            .decode_and_verify(token)
            .and_then(|(_, body)| self.authorize(&body, method, extra_check).map(|()| body));

        match &result {
            Ok(body) => tracing::debug!(kind = body.kind(), "authenticated"),
            Err(err) => tracing::warn!(error = %err, "authentication denied"),
        }
        result
    }

    fn authorize(&self, body: &TokenBody, method: &str, extra_check: Option<ExtraCheck<'_>>) -> Result<()> {
        let entrypoint_scoped = match body {
            TokenBody::Invite(_) => {
                return Err(AuthError::permission_denied("invite tokens cannot authenticate calls"));
            },
            TokenBody::Entrypoint(_) => true,
            TokenBody::Login(login) => login.entrypoint.is_some(),
        };

        if entrypoint_scoped {
            if self.config.is_entrypoint_method(method) {
                return Ok(());
            }
            return Err(AuthError::permission_denied(format!(
                "entrypoint token may not call {method}"
            )));
        }

        if self.config.is_entrypoint_only_method(method) {
            return Err(AuthError::permission_denied(format!(
                "{method} is restricted to entrypoint tokens"
            )));
        }

        match extra_check {
            Some(check) => check(body),
            None => Ok(()),
        }
    }
}
