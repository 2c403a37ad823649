//! Core functionality for the tollgate project
//!
//! This crate contains the authentication security services and the
//! collaborator traits they run on:
//!
//! - [`RateLimiter`]: per-action attempt windows with progressive lockouts
//! - [`LockoutService`]: per-identifier failed-login tracking and account suspension
//! - [`CsrfService`]: signed, expiring, single-use CSRF tokens
//! - [`TwoFactorService`]: TOTP enrollment and verification with backup codes
//! - [`PasswordSecurityService`]: hashing, policy, history and expiration
//!
//! Counters and short-lived records live in a [`CounterStore`]; user records
//! and password history come from the repository traits in [`repositories`].
//! [`MemoryCounterStore`] is a complete in-process store for single-instance
//! deployments and tests.
//!
//! Most applications use these services through the `tollgate` crate, which
//! wires them together over one store and one storage backend.
pub mod audit;
pub mod crypto;
pub mod error;
pub mod hashing;
pub mod repositories;
pub mod services;
pub mod storage;
pub mod user;
pub mod validation;

#[cfg(test)]
mod testing;

pub use audit::{
    AuditEvent, AuditEventType, AuditSeverity, AuditSink, MemoryAuditSink, RequestContext,
    TracingAuditSink,
};
pub use error::Error;
pub use hashing::PasswordAlgorithm;
pub use repositories::{CounterStore, PasswordHistoryRepository, RepositoryProvider, UserRepository};
pub use services::{
    CsrfConfig, CsrfService, LockoutService, LockoutSettings, LockoutStatus,
    PasswordChangeResult, PasswordSecurityService, RateLimitAction, RateLimitConfig,
    RateLimitStatus, RateLimiter, TwoFactorConfig, TwoFactorService, TwoFactorSetupResponse,
};
pub use storage::MemoryCounterStore;
pub use user::{UserId, UserRecord, UserStatus};
pub use validation::{PasswordPolicy, PasswordValidation, PolicyViolation, UserInfo};
