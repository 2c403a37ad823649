use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    Error, UserId,
    repositories::{
        PasswordHistoryEntry, PasswordHistoryRepository, RepositoryProvider, UserRepository,
    },
    user::{UserRecord, UserStatus},
};

/// Adapter that wraps a RepositoryProvider and implements [`UserRepository`]
pub struct UserRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> UserRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> UserRepository for UserRepositoryAdapter<R> {
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<UserRecord>, Error> {
        self.provider.user().find_by_identifier(identifier).await
    }

    async fn find_by_id(&self, id: &UserId) -> Result<Option<UserRecord>, Error> {
        self.provider.user().find_by_id(id).await
    }

    async fn update_status(&self, id: &UserId, status: UserStatus) -> Result<(), Error> {
        self.provider.user().update_status(id, status).await
    }

    async fn update_password_hash(&self, id: &UserId, hash: &str) -> Result<(), Error> {
        self.provider.user().update_password_hash(id, hash).await
    }

    async fn update_last_login(&self, id: &UserId) -> Result<(), Error> {
        self.provider.user().update_last_login(id).await
    }
}

/// Adapter that wraps a RepositoryProvider and implements [`PasswordHistoryRepository`]
pub struct PasswordHistoryRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> PasswordHistoryRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> PasswordHistoryRepository for PasswordHistoryRepositoryAdapter<R> {
    async fn get_recent(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<PasswordHistoryEntry>, Error> {
        self.provider.password_history().get_recent(user_id, limit).await
    }

    async fn create(&self, user_id: &UserId, hash: &str) -> Result<PasswordHistoryEntry, Error> {
        self.provider.password_history().create(user_id, hash).await
    }

    async fn delete_older_than(&self, user_id: &UserId, keep_count: usize) -> Result<u64, Error> {
        self.provider
            .password_history()
            .delete_older_than(user_id, keep_count)
            .await
    }
}
