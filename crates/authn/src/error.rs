//! Authentication error types.
//!
//! Every failure in this crate is terminal: there is no local recovery and
//! no default-allow path. Variants stay distinct internally so logs say
//! exactly which check failed, while [`AuthError::public_message`] gives the
//! transport layer an opaque string that does not help a forger.

use tollgate_storage::StorageError;
use thiserror::Error;

/// Message returned to remote callers for any credential failure.
pub const INVALID_TOKEN_MESSAGE: &str = "invalid authentication token";

/// Message returned to remote callers when a valid token is not authorized.
pub const PERMISSION_DENIED_MESSAGE: &str = "permission denied";

/// Authentication and authorization errors.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Malformed token: bad base58, wrong magic prefix, or an envelope or
    /// body that does not parse into a recognized shape.
    #[error("Invalid token format: {0}")]
    Decode(String),

    /// The envelope names a signing key that is not in the registry.
    #[error("Signing key not found: {kid}")]
    UnknownKey {
        /// Key ID that was not found.
        kid: String,
    },

    /// The MAC over the token body does not match the envelope signature.
    #[error("Invalid signature")]
    BadSignature,

    /// An invite token was presented at or after its expiry.
    #[error("Token expired")]
    Expired,

    /// The token is valid but of the wrong kind for the operation.
    #[error("Invalid token kind: expected {expected}, got {actual}")]
    InvalidKind {
        /// Kind the operation requires.
        expected: &'static str,
        /// Kind that was presented.
        actual: &'static str,
    },

    /// The token is valid but may not perform the requested operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Invite time-to-live is zero, negative, or above the configured cap.
    #[error("Invalid invite TTL: {0}")]
    InvalidTtl(String),

    /// The encoded token would exceed the decoder's length limit.
    #[error("Token too large: {length} characters exceeds {max}")]
    TokenTooLarge {
        /// Length of the encoded token.
        length: usize,
        /// Longest token the decoder accepts.
        max: usize,
    },

    /// A single-use invite was already exchanged.
    #[error("Invite already redeemed")]
    InviteRedeemed,

    /// Configuration failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Storage backend failure while reading or writing auth state.
    #[error("Auth storage error: {0}")]
    Storage(
        /// The underlying storage error.
        #[source]
        StorageError,
    ),
}

impl AuthError {
    /// Creates a new `Decode` error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Creates a new `UnknownKey` error.
    #[must_use]
    pub fn unknown_key(kid: impl Into<String>) -> Self {
        Self::UnknownKey { kid: kid.into() }
    }

    /// Creates a new `PermissionDenied` error.
    #[must_use]
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied(message.into())
    }

    /// Creates a new `InvalidConfig` error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether the transport should answer this error with a
    /// permission-denied status.
    ///
    /// True for every credential failure. Configuration and storage faults
    /// are server-side errors; a bad invite TTL or oversized metadata is an
    /// invalid request.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        !matches!(
            self,
            Self::InvalidConfig(_)
                | Self::Storage(_)
                | Self::InvalidTtl(_)
                | Self::TokenTooLarge { .. }
        )
    }

    /// Caller-facing message that does not reveal which check failed.
    ///
    /// Decode, unknown-key, signature, expiry, kind and redemption failures
    /// all collapse to [`INVALID_TOKEN_MESSAGE`].
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::PermissionDenied(_) => PERMISSION_DENIED_MESSAGE,
            Self::InvalidTtl(_) => "invalid invite duration",
            Self::TokenTooLarge { .. } => "token metadata too large",
            Self::InvalidConfig(_) | Self::Storage(_) => "internal error",
            _ => INVALID_TOKEN_MESSAGE,
        }
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        AuthError::Storage(err)
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;
