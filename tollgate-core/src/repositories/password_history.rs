use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordHistoryEntry {
    pub id: i64,
    pub user_id: UserId,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only log of previous password hashes, used to prevent reuse.
#[async_trait]
pub trait PasswordHistoryRepository: Send + Sync + 'static {
    /// The `limit` most recent entries for a user, newest first
    async fn get_recent(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<PasswordHistoryEntry>, Error>;

    /// Append a new entry
    async fn create(&self, user_id: &UserId, hash: &str) -> Result<PasswordHistoryEntry, Error>;

    /// Delete everything but the `keep_count` most recent entries.
    ///
    /// Returns the number of entries deleted.
    async fn delete_older_than(&self, user_id: &UserId, keep_count: usize) -> Result<u64, Error>;
}
