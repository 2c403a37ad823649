//! Password hashing with self-describing algorithm tags
//!
//! Two schemes are supported: Argon2id (the default, via `password-auth`) and
//! bcrypt. Each stored hash carries its scheme in its PHC/MCF prefix, so
//! verification picks the right scheme without being told.
//!
//! Hashing is CPU-bound; the async entry points run it on the blocking pool.

use serde::{Deserialize, Serialize};

use crate::{Error, error::CryptoError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordAlgorithm {
    #[default]
    Argon2,
    Bcrypt,
}

impl PasswordAlgorithm {
    /// Identify the scheme that produced `hash` from its prefix.
    pub fn detect(hash: &str) -> Option<Self> {
        if hash.starts_with("$argon2") {
            Some(PasswordAlgorithm::Argon2)
        } else if ["$2a$", "$2b$", "$2y$"]
            .iter()
            .any(|prefix| hash.starts_with(prefix))
        {
            Some(PasswordAlgorithm::Bcrypt)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PasswordAlgorithm::Argon2 => "argon2",
            PasswordAlgorithm::Bcrypt => "bcrypt",
        }
    }

    fn scheme(&self) -> &'static PasswordScheme {
        match self {
            PasswordAlgorithm::Argon2 => &SCHEMES[0],
            PasswordAlgorithm::Bcrypt => &SCHEMES[1],
        }
    }
}

impl std::fmt::Display for PasswordAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hash and verify functions for one algorithm.
pub struct PasswordScheme {
    pub algorithm: PasswordAlgorithm,
    pub hash: fn(&str) -> Result<String, CryptoError>,
    pub verify: fn(&str, &str) -> Result<bool, CryptoError>,
}

static SCHEMES: [PasswordScheme; 2] = [
    PasswordScheme {
        algorithm: PasswordAlgorithm::Argon2,
        hash: argon2_hash,
        verify: argon2_verify,
    },
    PasswordScheme {
        algorithm: PasswordAlgorithm::Bcrypt,
        hash: bcrypt_hash,
        verify: bcrypt_verify,
    },
];

fn argon2_hash(password: &str) -> Result<String, CryptoError> {
    Ok(password_auth::generate_hash(password))
}

fn argon2_verify(password: &str, hash: &str) -> Result<bool, CryptoError> {
    match password_auth::verify_password(password, hash) {
        Ok(()) => Ok(true),
        Err(password_auth::VerifyError::PasswordInvalid) => Ok(false),
        Err(e) => Err(CryptoError::PasswordHash(e.to_string())),
    }
}

fn bcrypt_hash(password: &str) -> Result<String, CryptoError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| CryptoError::PasswordHash(e.to_string()))
}

fn bcrypt_verify(password: &str, hash: &str) -> Result<bool, CryptoError> {
    bcrypt::verify(password, hash).map_err(|e| CryptoError::PasswordHash(e.to_string()))
}

/// Hash a password synchronously with the given algorithm.
pub fn hash_password_blocking(
    password: &str,
    algorithm: PasswordAlgorithm,
) -> Result<String, CryptoError> {
    (algorithm.scheme().hash)(password)
}

/// Verify a password synchronously.
///
/// When `algorithm` is `None` it is detected from the hash prefix.
pub fn verify_password_blocking(
    password: &str,
    hash: &str,
    algorithm: Option<PasswordAlgorithm>,
) -> Result<bool, CryptoError> {
    let algorithm = match algorithm {
        Some(algorithm) => algorithm,
        None => PasswordAlgorithm::detect(hash).ok_or(CryptoError::UnknownHashFormat)?,
    };
    (algorithm.scheme().verify)(password, hash)
}

/// Hash a password on the blocking thread pool.
pub async fn hash_password(password: &str, algorithm: PasswordAlgorithm) -> Result<String, Error> {
    let password = password.to_string();
    let hash = tokio::task::spawn_blocking(move || hash_password_blocking(&password, algorithm))
        .await
        .map_err(|e| CryptoError::PasswordHash(e.to_string()))??;
    Ok(hash)
}

/// Verify a password on the blocking thread pool.
pub async fn verify_password(
    password: &str,
    hash: &str,
    algorithm: Option<PasswordAlgorithm>,
) -> Result<bool, Error> {
    let password = password.to_string();
    let hash = hash.to_string();
    let valid =
        tokio::task::spawn_blocking(move || verify_password_blocking(&password, &hash, algorithm))
            .await
            .map_err(|e| CryptoError::PasswordHash(e.to_string()))??;
    Ok(valid)
}
