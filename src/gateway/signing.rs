//! HMAC-SHA256 signing and verification.
//!
//! Both gateways sign with HMAC-SHA256 and transport the tag hex-encoded.
//! Verification goes through [`Mac::verify_slice`], which compares in
//! constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Error returned when a supplied tag does not authenticate the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("signature mismatch")]
pub struct SignatureMismatch;

/// Error returned when a key cannot initialise the MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid HMAC key")]
pub struct InvalidKey;

fn keyed(key: &str) -> Result<HmacSha256, InvalidKey> {
    <HmacSha256 as Mac>::new_from_slice(key.as_bytes()).map_err(|_| InvalidKey)
}

/// Computes the lowercase hex HMAC-SHA256 of `message` under `key`.
///
/// # Errors
///
/// Returns [`InvalidKey`] if the key is refused by the MAC.
pub fn hmac_sha256_hex(key: &str, message: &str) -> Result<String, InvalidKey> {
    let mut mac = keyed(key)?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks a hex-encoded tag against `message` under `key`.
///
/// Accepts upper- or lowercase hex.
///
/// # Errors
///
/// Returns [`SignatureMismatch`] if the tag is not valid hex or does not
/// authenticate the message.
pub fn verify_hmac_sha256_hex(
    key: &str,
    message: &[u8],
    tag_hex: &str,
) -> Result<(), SignatureMismatch> {
    let tag = hex::decode(tag_hex.trim()).map_err(|_| SignatureMismatch)?;
    let mut mac = keyed(key).map_err(|_| SignatureMismatch)?;
    mac.update(message);
    mac.verify_slice(&tag).map_err(|_| SignatureMismatch)
}

/// Constant-time byte comparison, used for bearer tokens.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
