//! Token issuance.
//!
//! Issuance is a pure function of its inputs, the registry and the
//! configuration; nothing is persisted.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};

use crate::{
    codec,
    config::AuthConfig,
    error::{AuthError, Result},
    registry::SigningKeyRegistry,
    token::{EntrypointRef, InviteToken, LoginToken, Metadata, TokenBody, TokenEnvelope},
};

/// Mints signed, encoded tokens.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    registry: Arc<SigningKeyRegistry>,
    config: Arc<AuthConfig>,
}

impl TokenIssuer {
    /// Creates an issuer over a registry and configuration.
    #[must_use]
    pub fn new(registry: Arc<SigningKeyRegistry>, config: Arc<AuthConfig>) -> Self {
        Self { registry, config }
    }

    /// Mints a login token for the configured default user.
    ///
    /// # Errors
    ///
    /// - [`AuthError::UnknownKey`] if `key_id` is not registered
    /// - [`AuthError::TokenTooLarge`] if `metadata` makes the token longer
    ///   than [`MAX_TOKEN_LENGTH`](codec::MAX_TOKEN_LENGTH)
    #[tracing::instrument(skip(self, metadata, entrypoint), fields(entrypoint = entrypoint.is_some()))]
    pub fn new_login_token(
        &self,
        key_id: &str,
        metadata: Metadata,
        entrypoint: Option<EntrypointRef>,
    ) -> Result<String> {
        let body = TokenBody::Login(self.login_body(metadata, entrypoint));
        self.sign_body(key_id, &body)
    }

    /// Mints an invite that exchanges for the login token
    /// [`new_login_token`](Self::new_login_token) would build, until
    /// `now + ttl`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidTtl`] if `ttl` is zero or above the configured maximum
    /// - [`AuthError::UnknownKey`] if `key_id` is not registered
    /// - [`AuthError::TokenTooLarge`] if `metadata` makes the token too long
    #[tracing::instrument(skip(self, metadata, entrypoint), fields(entrypoint = entrypoint.is_some()))]
    pub fn new_invite_token(
        &self,
        ttl: Duration,
        key_id: &str,
        metadata: Metadata,
        entrypoint: Option<EntrypointRef>,
    ) -> Result<String> {
        let expires_at = self.invite_expiry(Utc::now(), ttl)?;
        let body = TokenBody::Invite(InviteToken {
            expires_at,
            login: self.login_body(metadata, entrypoint),
        });
        self.sign_body(key_id, &body)
    }

    /// Mints a bare entrypoint credential.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnknownKey`] if `key_id` is not registered.
    #[tracing::instrument(skip(self))]
    pub fn new_entrypoint_token(&self, key_id: &str, entrypoint: EntrypointRef) -> Result<String> {
        self.sign_body(key_id, &TokenBody::Entrypoint(entrypoint))
    }

    /// The key id new tokens are signed with by default.
    #[must_use]
    pub fn default_key_id(&self) -> &str {
        self.config.default_key_id()
    }

    /// Builds the login body every issuance path embeds.
    pub(crate) fn login_body(
        &self,
        metadata: Metadata,
        entrypoint: Option<EntrypointRef>,
    ) -> LoginToken {
        LoginToken { user_id: self.config.default_user().to_owned(), metadata, entrypoint }
    }

    /// Serializes, signs and encodes a body.
    pub(crate) fn sign_body(&self, key_id: &str, body: &TokenBody) -> Result<String> {
        let body_bytes = codec::encode_body(body)?;
        let signature = self.registry.sign(key_id, &body_bytes)?;
        let token = codec::encode(&TokenEnvelope {
            body: body_bytes,
            key_id: key_id.to_owned(),
            signature,
        })?;

        tracing::debug!(kind = body.kind(), key_id, "issued token");
        Ok(token)
    }

    fn invite_expiry(&self, now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>> {
        if ttl.is_zero() {
            return Err(AuthError::InvalidTtl("invite ttl must be positive".into()));
        }
        if let Some(max) = self.config.max_invite_ttl()
            && ttl > max
        {
            return Err(AuthError::InvalidTtl(format!(
                "invite ttl {}s exceeds maximum {}s",
                ttl.as_secs(),
                max.as_secs()
            )));
        }

        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| AuthError::InvalidTtl("invite ttl out of range".into()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::{codec::MAX_TOKEN_LENGTH, registry::SigningKey};

    fn issuer(config: AuthConfig) -> TokenIssuer {
        let registry = SigningKeyRegistry::builder()
            .keys(vec![SigningKey::new("k1", b"secret".to_vec()).unwrap()])
            .build()
            .unwrap();
        TokenIssuer::new(Arc::new(registry), Arc::new(config))
    }

    fn decode_body(token: &str) -> TokenBody {
        let envelope = codec::decode(token).unwrap();
        codec::decode_body(&envelope.body).unwrap()
    }

    #[test]
    fn test_login_token_uses_default_user() {
        let issuer = issuer(AuthConfig::builder().default_user("user-42").build().unwrap());
        let token = issuer.new_login_token("k1", Metadata::new(), None).unwrap();

        let TokenBody::Login(login) = decode_body(&token) else { panic!("expected login body") };
        assert_eq!(login.user_id, "user-42");
        assert!(login.entrypoint.is_none());
    }

    #[test]
    fn test_envelope_names_signing_key() {
        let issuer = issuer(AuthConfig::default());
        let token = issuer.new_login_token("k1", Metadata::new(), None).unwrap();
        assert_eq!(codec::decode(&token).unwrap().key_id, "k1");
    }

    #[test]
    fn test_unknown_key_rejected() {
        let issuer = issuer(AuthConfig::default());
        let result = issuer.new_login_token("k2", Metadata::new(), None);
        assert!(matches!(result, Err(AuthError::UnknownKey { .. })));
    }

    #[test]
    fn test_invite_embeds_login() {
        let issuer = issuer(AuthConfig::default());
        let metadata = Metadata::from([("addr".to_owned(), "10.1.2.3".to_owned())]);
        let before = Utc::now();
        let token = issuer
            .new_invite_token(
                Duration::from_secs(60),
                "k1",
                metadata.clone(),
                Some(EntrypointRef::for_deployment("d1")),
            )
            .unwrap();

        let TokenBody::Invite(invite) = decode_body(&token) else { panic!("expected invite body") };
        assert_eq!(invite.login.metadata, metadata);
        assert_eq!(invite.login.entrypoint, Some(EntrypointRef::for_deployment("d1")));
        assert!(invite.expires_at > before + chrono::Duration::seconds(59));
        assert!(invite.expires_at <= Utc::now() + chrono::Duration::seconds(60));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let issuer = issuer(AuthConfig::default());
        let result = issuer.new_invite_token(Duration::ZERO, "k1", Metadata::new(), None);
        assert!(matches!(result, Err(AuthError::InvalidTtl(_))));
    }

    #[test]
    fn test_ttl_above_maximum_rejected() {
        let config = AuthConfig::builder().max_invite_ttl(Duration::from_secs(3600)).build().unwrap();
        let issuer = issuer(config);

        issuer.new_invite_token(Duration::from_secs(3600), "k1", Metadata::new(), None).unwrap();
        let result = issuer.new_invite_token(Duration::from_secs(3601), "k1", Metadata::new(), None);
        assert!(matches!(result, Err(AuthError::InvalidTtl(ref msg)) if msg.contains("exceeds")));
    }

    #[test]
    fn test_overflowing_ttl_rejected() {
        let issuer = issuer(AuthConfig::default());
        let result = issuer.new_invite_token(Duration::MAX, "k1", Metadata::new(), None);
        assert!(matches!(result, Err(AuthError::InvalidTtl(_))));
    }

    #[test]
    fn test_issued_tokens_stay_within_decoder_limit() {
        let issuer = issuer(AuthConfig::default());
        let issue = |len: usize| {
            let metadata = Metadata::from([("blob".to_owned(), "x".repeat(len))]);
            issuer.new_login_token("k1", metadata, None)
        };

        // Largest metadata value that still fits.
        let (mut fits, mut too_big) = (0, MAX_TOKEN_LENGTH);
        while fits + 1 < too_big {
            let mid = (fits + too_big) / 2;
            if issue(mid).is_ok() {
                fits = mid;
            } else {
                too_big = mid;
            }
        }

        let token = issue(fits).unwrap();
        assert!(token.len() <= MAX_TOKEN_LENGTH);
        assert!(token.len() > MAX_TOKEN_LENGTH - 16, "search stopped early at {}", token.len());
        let TokenBody::Login(login) = decode_body(&token) else { panic!("expected login body") };
        assert_eq!(login.metadata["blob"].len(), fits);

        assert!(matches!(issue(fits + 1), Err(AuthError::TokenTooLarge { .. })));
    }

    #[test]
    fn test_oversized_invite_rejected_at_issuance() {
        let issuer = issuer(AuthConfig::default());
        let metadata = Metadata::from([("blob".to_owned(), "x".repeat(MAX_TOKEN_LENGTH))]);
        let result = issuer.new_invite_token(Duration::from_secs(60), "k1", metadata, None);
        assert!(matches!(result, Err(AuthError::TokenTooLarge { .. })));
    }

    #[test]
    fn test_entrypoint_token() {
        let issuer = issuer(AuthConfig::default());
        let token = issuer.new_entrypoint_token("k1", EntrypointRef::for_deployment("d9")).unwrap();
        assert_eq!(decode_body(&token), TokenBody::Entrypoint(EntrypointRef::for_deployment("d9")));
    }
}
