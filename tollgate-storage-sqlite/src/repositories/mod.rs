//! Repository implementations for SQLite storage

pub mod password_history;
pub mod user;

pub use password_history::SqlitePasswordHistoryRepository;
pub use user::SqliteUserRepository;

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use tollgate_core::{
    Error,
    error::StorageError,
    repositories::{
        PasswordHistoryRepositoryProvider, RepositoryProvider, UserRepositoryProvider,
    },
};

use crate::migrations::{MIGRATIONS, SqliteMigrationManager};

/// Repository provider implementation for SQLite
///
/// This struct implements all the individual repository provider traits
/// as well as the unified `RepositoryProvider` trait.
pub struct SqliteRepositoryProvider {
    pool: SqlitePool,
    user: Arc<SqliteUserRepository>,
    password_history: Arc<SqlitePasswordHistoryRepository>,
}

impl SqliteRepositoryProvider {
    pub fn new(pool: SqlitePool) -> Self {
        let user = Arc::new(SqliteUserRepository::new(pool.clone()));
        let password_history = Arc::new(SqlitePasswordHistoryRepository::new(pool.clone()));

        Self {
            pool,
            user,
            password_history,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl UserRepositoryProvider for SqliteRepositoryProvider {
    type UserRepo = SqliteUserRepository;

    fn user(&self) -> &Self::UserRepo {
        &self.user
    }
}

impl PasswordHistoryRepositoryProvider for SqliteRepositoryProvider {
    type PasswordHistoryRepo = SqlitePasswordHistoryRepository;

    fn password_history(&self) -> &Self::PasswordHistoryRepo {
        &self.password_history
    }
}

#[async_trait]
impl RepositoryProvider for SqliteRepositoryProvider {
    async fn migrate(&self) -> Result<(), Error> {
        let manager = SqliteMigrationManager::new(self.pool.clone());
        manager.initialize().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to initialize migrations");
            Error::Storage(StorageError::Database(
                "Failed to initialize migrations".to_string(),
            ))
        })?;

        manager.up(MIGRATIONS).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            Error::Storage(StorageError::Database(
                "Failed to run migrations".to_string(),
            ))
        })?;

        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(StorageError::Connection(e.to_string())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use tollgate_core::{UserId, repositories::UserRepository};

    #[tokio::test]
    async fn test_provider_migrates_and_serves_repositories() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let provider = SqliteRepositoryProvider::new(pool);
        provider.migrate().await.unwrap();
        provider.migrate().await.unwrap();
        provider.health_check().await.unwrap();

        provider
            .user()
            .create(&crate::testing::user("usr_1", "jane@example.com"))
            .await
            .unwrap();
        assert!(
            provider
                .user()
                .find_by_id(&UserId::new("usr_1"))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_health_check_fails_on_closed_pool() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let provider = SqliteRepositoryProvider::new(pool.clone());
        pool.close().await;
        assert!(provider.health_check().await.unwrap_err().is_infrastructure());
    }
}
