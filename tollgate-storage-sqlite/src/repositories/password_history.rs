//! SQLite implementation of the password history repository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tollgate_core::{
    Error, UserId,
    error::StorageError,
    repositories::{PasswordHistoryEntry, PasswordHistoryRepository},
};

use super::user::timestamp;

/// SQLite repository for previous password hashes.
pub struct SqlitePasswordHistoryRepository {
    pool: SqlitePool,
}

impl SqlitePasswordHistoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SqlitePasswordHistoryEntry {
    id: i64,
    user_id: String,
    password_hash: String,
    created_at: i64,
}

impl TryFrom<SqlitePasswordHistoryEntry> for PasswordHistoryEntry {
    type Error = Error;

    fn try_from(row: SqlitePasswordHistoryEntry) -> Result<Self, Self::Error> {
        Ok(PasswordHistoryEntry {
            id: row.id,
            user_id: UserId::new(&row.user_id),
            password_hash: row.password_hash,
            created_at: timestamp(row.created_at)?,
        })
    }
}

#[async_trait]
impl PasswordHistoryRepository for SqlitePasswordHistoryRepository {
    async fn get_recent(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<PasswordHistoryEntry>, Error> {
        let rows = sqlx::query_as::<_, SqlitePasswordHistoryEntry>(
            r#"
            SELECT id, user_id, password_hash, created_at
            FROM password_history
            WHERE user_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to get password history");
            StorageError::Database("Failed to get password history".to_string())
        })?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn create(&self, user_id: &UserId, hash: &str) -> Result<PasswordHistoryEntry, Error> {
        let row = sqlx::query_as::<_, SqlitePasswordHistoryEntry>(
            r#"
            INSERT INTO password_history (user_id, password_hash, created_at)
            VALUES (?, ?, ?)
            RETURNING id, user_id, password_hash, created_at
            "#,
        )
        .bind(user_id.as_str())
        .bind(hash)
        .bind(Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to record password history");
            StorageError::Database("Failed to record password history".to_string())
        })?;

        row.try_into()
    }

    async fn delete_older_than(&self, user_id: &UserId, keep_count: usize) -> Result<u64, Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM password_history
            WHERE user_id = ?1
              AND id NOT IN (
                SELECT id FROM password_history
                WHERE user_id = ?1
                ORDER BY created_at DESC, id DESC
                LIMIT ?2
              )
            "#,
        )
        .bind(user_id.as_str())
        .bind(keep_count as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to prune password history");
            StorageError::Database("Failed to prune password history".to_string())
        })?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqliteUserRepository;
    use crate::testing::{pool, user};

    #[tokio::test]
    async fn test_recent_is_newest_first_and_pruned() {
        let pool = pool().await;
        SqliteUserRepository::new(pool.clone())
            .create(&user("usr_1", "jane@example.com"))
            .await
            .unwrap();
        let repo = SqlitePasswordHistoryRepository::new(pool);
        let id = UserId::new("usr_1");

        for hash in ["h1", "h2", "h3", "h4"] {
            repo.create(&id, hash).await.unwrap();
        }

        let recent = repo.get_recent(&id, 2).await.unwrap();
        assert_eq!(
            recent.iter().map(|e| e.password_hash.as_str()).collect::<Vec<_>>(),
            vec!["h4", "h3"]
        );

        assert_eq!(repo.delete_older_than(&id, 2).await.unwrap(), 2);
        let remaining = repo.get_recent(&id, 10).await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].password_hash, "h4");
    }

    #[tokio::test]
    async fn test_prune_is_scoped_to_user() {
        let pool = pool().await;
        let users = SqliteUserRepository::new(pool.clone());
        users.create(&user("usr_1", "jane@example.com")).await.unwrap();
        users.create(&user("usr_2", "john@example.com")).await.unwrap();
        let repo = SqlitePasswordHistoryRepository::new(pool);

        repo.create(&UserId::new("usr_1"), "a").await.unwrap();
        repo.create(&UserId::new("usr_2"), "b").await.unwrap();
        repo.create(&UserId::new("usr_2"), "c").await.unwrap();

        assert_eq!(repo.delete_older_than(&UserId::new("usr_2"), 0).await.unwrap(), 2);
        assert_eq!(repo.get_recent(&UserId::new("usr_1"), 5).await.unwrap().len(), 1);
    }
}
