pub mod utilities;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::validation::PolicyViolation;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Security error: {0}")]
    Security(#[from] SecurityError),

    #[error("Two-factor error: {0}")]
    TwoFactor(#[from] TwoFactorError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Expected rejections produced by the rate limiter, the lockout engine and
/// the CSRF service.
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("Too many requests, retry after {retry_after_seconds} seconds")]
    TooManyRequests { retry_after_seconds: u64 },

    #[error("Account locked until {locked_until}")]
    AccountLocked { locked_until: DateTime<Utc> },

    #[error("Invalid CSRF token")]
    InvalidCsrfToken,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TwoFactorError {
    #[error("Two-factor authentication has not been set up")]
    NotSetUp,

    #[error("Two-factor setup has expired, start again")]
    SetupExpired,

    #[error("Two-factor authentication is not enabled")]
    NotEnabled,

    #[error("Two-factor authentication is already enabled")]
    AlreadyEnabled,

    #[error("Invalid verification code")]
    InvalidCode,

    #[error("Invalid token or backup code")]
    InvalidTokenOrBackupCode,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Counter store error: {0}")]
    CounterStore(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Malformed record: {0}")]
    Malformed(String),

    #[error("Record not found")]
    NotFound,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Weak password: {}", format_violations(.0))]
    WeakPassword(Vec<PolicyViolation>),

    #[error("Password matches one of the recently used passwords")]
    PasswordReused,

    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    #[error("Unknown password hash format")]
    UnknownHashFormat,

    #[error("HMAC failure: {0}")]
    Hmac(String),

    #[error("TOTP failure: {0}")]
    Totp(String),
}

fn format_violations(violations: &[PolicyViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Expected outcomes that should be shown to the user as-is.
    pub fn is_business_rejection(&self) -> bool {
        matches!(
            self,
            Error::Security(_) | Error::TwoFactor(_) | Error::Validation(_)
        )
    }

    /// Failures of a backing store or of malformed stored data.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Error::Storage(_))
    }

    pub fn is_crypto_error(&self) -> bool {
        matches!(self, Error::Crypto(_))
    }

    /// Seconds the caller should wait before retrying, for rejections that carry one.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Error::Security(SecurityError::TooManyRequests {
                retry_after_seconds,
            }) => Some(*retry_after_seconds),
            Error::Security(SecurityError::AccountLocked { locked_until }) => {
                let remaining = (*locked_until - Utc::now()).num_seconds();
                Some(remaining.max(0) as u64)
            }
            _ => None,
        }
    }
}
