use async_trait::async_trait;

use crate::{Error, UserId, user::UserRecord, user::UserStatus};

/// Repository for the subset of user data the security services read and write
#[async_trait]
pub trait UserRepository: Send + Sync + 'static {
    /// Find a user by email address or by id, whichever `identifier` is.
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<UserRecord>, Error>;

    /// Find a user by id
    async fn find_by_id(&self, id: &UserId) -> Result<Option<UserRecord>, Error>;

    /// Set the persisted account status
    async fn update_status(&self, id: &UserId, status: UserStatus) -> Result<(), Error>;

    /// Replace the password hash and stamp `password_updated_at` with the current time
    async fn update_password_hash(&self, id: &UserId, hash: &str) -> Result<(), Error>;

    /// Stamp `last_login_at` with the current time
    async fn update_last_login(&self, id: &UserId) -> Result<(), Error>;
}
