//! Invite exchange.
//!
//! An invite carries the login it grants inside its signed body, so the
//! exchange needs no stored state unless single-use tracking is enabled with
//! [`InviteExchanger::with_redemptions`].

use std::sync::Arc;

use chrono::Utc;
use fail::fail_point;

use crate::{
    authenticator::Authenticator,
    error::{AuthError, Result},
    issuer::TokenIssuer,
    redemption::{InviteRedemptions, fingerprint},
    token::TokenBody,
};

/// Converts valid invites into login tokens.
#[derive(Clone)]
pub struct InviteExchanger {
    issuer: TokenIssuer,
    authenticator: Authenticator,
    redemptions: Option<Arc<dyn InviteRedemptions>>,
}

impl InviteExchanger {
    /// Creates an exchanger whose invites stay valid until they expire.
    #[must_use]
    pub fn new(issuer: TokenIssuer, authenticator: Authenticator) -> Self {
        Self { issuer, authenticator, redemptions: None }
    }

    /// Makes every invite exchangeable at most once.
    #[must_use]
    pub fn with_redemptions(mut self, redemptions: Arc<dyn InviteRedemptions>) -> Self {
        self.redemptions = Some(redemptions);
        self
    }

    /// Whether invites are single-use.
    #[must_use]
    pub fn is_single_use(&self) -> bool {
        self.redemptions.is_some()
    }

    /// Drops redemption records of expired invites. Returns how many were
    /// removed; always zero for stateless invites.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the redemption store fails.
    pub async fn purge_expired_redemptions(&self) -> Result<usize> {
        match &self.redemptions {
            Some(redemptions) => redemptions.purge_expired().await,
            None => Ok(0),
        }
    }

    /// Exchanges an invite for a login token signed with `key_id`.
    ///
    /// # Errors
    ///
    /// - Any error from [`Authenticator::decode_and_verify`]
    /// - [`AuthError::InvalidKind`] if the token is not an invite
    /// - [`AuthError::Expired`] if the invite has expired
    /// - [`AuthError::UnknownKey`] if `key_id` is not registered
    /// - [`AuthError::InviteRedeemed`] if single-use and already exchanged
    #[tracing::instrument(skip(self, token))]
    pub async fn exchange_invite(&self, key_id: &str, token: &str) -> Result<String> {
        let result = self.exchange(key_id, token).await;
        if let Err(err) = &result {
            tracing::warn!(error = %err, "invite exchange denied");
        }
        result
    }

    async fn exchange(&self, key_id: &str, token: &str) -> Result<String> {
        let (envelope, body) = self.authenticator.decode_and_verify(token)?;
        let invite = match body {
            TokenBody::Invite(invite) => invite,
            other @ (TokenBody::Login(_) | TokenBody::Entrypoint(_)) => {
                return Err(AuthError::InvalidKind { expected: "invite", actual: other.kind() });
            },
        };

        if invite.is_expired_at(Utc::now()) {
            return Err(AuthError::Expired);
        }

        let expires_at = invite.expires_at;
        let login = self.issuer.sign_body(key_id, &TokenBody::Login(invite.login))?;

        if let Some(redemptions) = &self.redemptions {
            fail_point!("invite-before-mark", |_| {
                Err(AuthError::Storage(tollgate_storage::StorageError::internal(
                    "injected failure before redemption mark",
                )))
            });
            redemptions.check_and_mark(&fingerprint(&envelope.signature), expires_at).await?;
        }

        tracing::debug!(key_id, "invite exchanged");
        Ok(login)
    }
}
