//! Repository traits for the data access layer
//!
//! The security services never talk to a database directly. They depend on:
//!
//! - [`CounterStore`]: fast key-value state with TTLs (rate limits, lockouts, 2FA)
//! - [`UserRepository`]: the subset of user data the services read and update
//! - [`PasswordHistoryRepository`]: previous password hashes for reuse checks
//!
//! A storage backend that persists users and history implements the
//! individual traits plus [`RepositoryProvider`] for lifecycle hooks.

pub mod adapter;
pub mod counter;
pub mod password_history;
pub mod user;

pub use adapter::{PasswordHistoryRepositoryAdapter, UserRepositoryAdapter};
pub use counter::{CounterStore, StoreOp, StoreReply, keys, parse_count, parse_counter};
pub use password_history::{PasswordHistoryEntry, PasswordHistoryRepository};
pub use user::UserRepository;

use async_trait::async_trait;

use crate::Error;

/// Provider trait for user repository access.
pub trait UserRepositoryProvider: Send + Sync + 'static {
    /// The user repository implementation type
    type UserRepo: UserRepository;

    /// Get the user repository
    fn user(&self) -> &Self::UserRepo;
}

/// Provider trait for password history access.
pub trait PasswordHistoryRepositoryProvider: Send + Sync + 'static {
    /// The password history repository implementation type
    type PasswordHistoryRepo: PasswordHistoryRepository;

    /// Get the password history repository
    fn password_history(&self) -> &Self::PasswordHistoryRepo;
}

/// Provider trait that persistent storage backends implement.
///
/// # Example
///
/// ```rust,ignore
/// use tollgate_core::repositories::*;
///
/// struct MyStorage { /* ... */ }
///
/// impl UserRepositoryProvider for MyStorage {
///     type UserRepo = MyUserRepository;
///     fn user(&self) -> &Self::UserRepo { &self.user_repo }
/// }
///
/// #[async_trait]
/// impl RepositoryProvider for MyStorage {
///     async fn migrate(&self) -> Result<(), Error> { /* ... */ }
///     async fn health_check(&self) -> Result<(), Error> { /* ... */ }
/// }
/// ```
#[async_trait]
pub trait RepositoryProvider: UserRepositoryProvider + PasswordHistoryRepositoryProvider {
    /// Run migrations for all repositories
    async fn migrate(&self) -> Result<(), Error>;

    /// Health check for all repositories
    async fn health_check(&self) -> Result<(), Error>;
}
