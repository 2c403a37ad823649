//! Cryptographic utilities shared by the security services
//!
//! This module provides random token material, HMAC signing for CSRF tokens,
//! SHA-256 digests for single-use secrets (backup codes, used-token markers)
//! and constant-time comparison.
//!
//! # Security
//!
//! Signature and digest comparisons go through [`constant_time_compare`] so
//! that the time taken does not reveal the position of the first mismatch.
//!
//! See: <https://cheatsheetseries.owasp.org/cheatsheets/Cross-Site_Request_Forgery_Prevention_Cheat_Sheet.html#signed-double-submit-cookie-recommended>

use hmac::{Hmac, Mac};
use rand::{TryRngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Fill a buffer of `len` bytes from the operating system RNG.
///
/// # Panics
///
/// Panics if the OS random number generator fails. This indicates a critical
/// system failure (e.g., /dev/urandom unavailable) from which recovery is not
/// possible for security-sensitive operations.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .expect("OS RNG failure - system entropy source unavailable");
    bytes
}

/// Generate `len` random bytes and return them hex encoded (`2 * len` characters).
pub fn random_hex(len: usize) -> String {
    hex::encode(random_bytes(len))
}

/// Hash a value using SHA256, hex encoded.
///
/// Used for high-entropy or single-use secrets where a slow KDF is not needed.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compute `HMAC-SHA256(secret, message)`, hex encoded.
pub fn hmac_sha256_hex(secret: &[u8], message: &str) -> Result<String, CryptoError> {
    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|e| CryptoError::Hmac(e.to_string()))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Perform constant-time comparison of two byte slices.
///
/// Slices of different length compare unequal immediately; only the length is
/// revealed, never the content.
pub fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
