//! Token data model.
//!
//! A token on the wire is a [`TokenEnvelope`]: opaque body bytes, the id of
//! the key that signed them, and the MAC. The body bytes decode into a
//! [`TokenBody`], a closed set of credential kinds. The signature layer never
//! looks inside the body, so adding a kind only touches this module and the
//! exhaustive matches over [`TokenBody`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Caller-supplied context attached to login tokens (e.g. the observed
/// client address). Returned verbatim on decode.
pub type Metadata = BTreeMap<String, String>;

/// Signed wire object.
///
/// Invariant: `signature == HMAC-SHA256(secret(key_id), body)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenEnvelope {
    /// Serialized [`TokenBody`].
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,
    /// Id of the signing key in the registry.
    pub key_id: String,
    /// MAC over `body`.
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
}

/// Marks a credential as scoped to automated entrypoint (agent) access.
///
/// Tokens carrying this marker can only reach the entrypoint method
/// allowlist.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntrypointRef {
    /// Deployment the entrypoint serves. Empty when not deployment-bound.
    #[serde(default)]
    pub deployment_id: String,
}

impl EntrypointRef {
    /// Creates an entrypoint marker bound to a deployment.
    #[must_use]
    pub fn for_deployment(deployment_id: impl Into<String>) -> Self {
        Self { deployment_id: deployment_id.into() }
    }
}

/// The authenticated-identity credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginToken {
    /// Opaque user reference.
    pub user_id: String,
    /// Caller-supplied context.
    #[serde(default)]
    pub metadata: Metadata,
    /// Present when the login is restricted to entrypoint access.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<EntrypointRef>,
}

/// A stateless, time-bounded invitation to mint a login token.
///
/// Everything needed to produce the resulting login travels inside the
/// signed invite.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InviteToken {
    /// Instant from which the invite is no longer exchangeable.
    pub expires_at: DateTime<Utc>,
    /// Login body minted on a successful exchange.
    pub login: LoginToken,
}

impl InviteToken {
    /// Whether the invite is expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Every credential kind a token body can hold.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenBody {
    /// Full or entrypoint-restricted login.
    Login(LoginToken),
    /// Bare entrypoint credential.
    Entrypoint(EntrypointRef),
    /// Exchangeable invitation.
    Invite(InviteToken),
}

impl TokenBody {
    /// Short name of the kind, used in errors and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Login(_) => "login",
            Self::Entrypoint(_) => "entrypoint",
            Self::Invite(_) => "invite",
        }
    }

    /// The entrypoint marker restricting this credential, if any.
    ///
    /// Invites report the marker of the login they would mint.
    #[must_use]
    pub fn entrypoint(&self) -> Option<&EntrypointRef> {
        match self {
            Self::Login(login) => login.entrypoint.as_ref(),
            Self::Entrypoint(entrypoint) => Some(entrypoint),
            Self::Invite(invite) => invite.login.entrypoint.as_ref(),
        }
    }

    /// The login payload, if this is a login token.
    #[must_use]
    pub fn as_login(&self) -> Option<&LoginToken> {
        match self {
            Self::Login(login) => Some(login),
            Self::Entrypoint(_) | Self::Invite(_) => None,
        }
    }
}

/// Serde adapter encoding byte fields as unpadded base64url strings.
mod base64_bytes {
    use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        URL_SAFE_NO_PAD.decode(encoded.as_bytes()).map_err(D::Error::custom)
    }
}
