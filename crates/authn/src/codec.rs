//! Token string encoding.
//!
//! ```text
//! token = base58( TOKEN_MAGIC || json(TokenEnvelope) )
//! ```
//!
//! Base58 keeps tokens free of characters that need escaping in URLs,
//! headers or shell arguments. The magic prefix is checked right after the
//! base58 decode, before any parsing or cryptographic work, so random input
//! is rejected cheaply.
//!
//! Every failure here is an [`AuthError::Decode`]. Signature problems are
//! reported separately by the [`Authenticator`](crate::Authenticator).

use crate::{
    error::{AuthError, Result},
    token::{TokenBody, TokenEnvelope},
};

/// Fixed prefix identifying a serialized token envelope.
pub const TOKEN_MAGIC: &[u8] = b"tg24";

/// Longest token string accepted for decoding, and so the longest the
/// encoder will produce.
///
/// Base58 decoding is quadratic in the input length, so oversized input is
/// refused before decoding starts.
pub const MAX_TOKEN_LENGTH: usize = 8 * 1024;

/// Encodes an envelope into a token string.
///
/// # Errors
///
/// - [`AuthError::TokenTooLarge`] if the encoded token is longer than
///   [`MAX_TOKEN_LENGTH`], since [`decode`] would refuse it
/// - [`AuthError::Decode`] if the envelope cannot be serialized, which does
///   not happen for well-formed envelopes
pub fn encode(envelope: &TokenEnvelope) -> Result<String> {
    let payload = serde_json::to_vec(envelope)
        .map_err(|e| AuthError::decode(format!("failed to serialize envelope: {e}")))?;

    let mut buf = Vec::with_capacity(TOKEN_MAGIC.len() + payload.len());
    buf.extend_from_slice(TOKEN_MAGIC);
    buf.extend_from_slice(&payload);

    let token = bs58::encode(buf).into_string();
    if token.len() > MAX_TOKEN_LENGTH {
        return Err(AuthError::TokenTooLarge { length: token.len(), max: MAX_TOKEN_LENGTH });
    }
    Ok(token)
}

/// Decodes a token string into its envelope without verifying it.
///
/// # Errors
///
/// Returns [`AuthError::Decode`] if the string is empty or oversized, is not
/// valid base58, lacks the magic prefix, or does not contain a well-formed
/// envelope.
pub fn decode(token: &str) -> Result<TokenEnvelope> {
    if token.is_empty() {
        return Err(AuthError::decode("token is empty"));
    }
    if token.len() > MAX_TOKEN_LENGTH {
        return Err(AuthError::decode(format!(
            "token exceeds {MAX_TOKEN_LENGTH} characters"
        )));
    }

    let raw = bs58::decode(token)
        .into_vec()
        .map_err(|e| AuthError::decode(format!("token is not valid base58: {e}")))?;

    let payload = raw
        .strip_prefix(TOKEN_MAGIC)
        .ok_or_else(|| AuthError::decode("token magic prefix mismatch"))?;

    serde_json::from_slice(payload)
        .map_err(|e| AuthError::decode(format!("malformed token envelope: {e}")))
}

/// Serializes a token body into the bytes that get signed.
///
/// # Errors
///
/// Returns [`AuthError::Decode`] if the body cannot be serialized.
pub fn encode_body(body: &TokenBody) -> Result<Vec<u8>> {
    serde_json::to_vec(body).map_err(|e| AuthError::decode(format!("failed to serialize body: {e}")))
}

/// Parses signed body bytes into exactly one recognized [`TokenBody`] kind.
///
/// # Errors
///
/// Returns [`AuthError::Decode`] for an unrecognized or malformed body.
pub fn decode_body(bytes: &[u8]) -> Result<TokenBody> {
    serde_json::from_slice(bytes).map_err(|e| AuthError::decode(format!("malformed token body: {e}")))
}
