//! Test doubles shared by the service tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::Mutex;

use crate::{
    Error, UserId,
    error::StorageError,
    repositories::{
        CounterStore, PasswordHistoryEntry, PasswordHistoryRepository, StoreOp, StoreReply,
        UserRepository,
    },
    user::{UserRecord, UserStatus},
};

/// Counter store whose every call fails as if the network were down.
pub struct FailingCounterStore;

fn unreachable_store() -> Error {
    StorageError::CounterStore("connection refused".to_string()).into()
}

#[async_trait]
impl CounterStore for FailingCounterStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, Error> {
        Err(unreachable_store())
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> Result<(), Error> {
        Err(unreachable_store())
    }

    async fn incr(&self, _key: &str) -> Result<i64, Error> {
        Err(unreachable_store())
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool, Error> {
        Err(unreachable_store())
    }

    async fn hash_get_all(&self, _key: &str) -> Result<HashMap<String, String>, Error> {
        Err(unreachable_store())
    }

    async fn hash_set_multiple(
        &self,
        _key: &str,
        _fields: &[(String, String)],
    ) -> Result<(), Error> {
        Err(unreachable_store())
    }

    async fn delete(&self, _key: &str) -> Result<bool, Error> {
        Err(unreachable_store())
    }

    async fn keys(&self, _pattern: &str) -> Result<Vec<String>, Error> {
        Err(unreachable_store())
    }

    async fn atomic(&self, _ops: Vec<StoreOp>) -> Result<Vec<StoreReply>, Error> {
        Err(unreachable_store())
    }
}

#[derive(Default)]
pub struct MockUserRepository {
    users: Mutex<HashMap<UserId, UserRecord>>,
    fail: AtomicBool,
}

impl MockUserRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn insert(&self, user: UserRecord) {
        self.users.lock().await.insert(user.id.clone(), user);
    }

    pub async fn get(&self, id: &UserId) -> Option<UserRecord> {
        self.users.lock().await.get(id).cloned()
    }

    /// Make every subsequent call fail.
    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), Error> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("database offline".to_string()).into());
        }
        Ok(())
    }
}

pub fn user(id: &str, email: &str) -> UserRecord {
    UserRecord {
        id: UserId::new(id),
        email: email.to_string(),
        first_name: Some("Jane".to_string()),
        last_name: Some("Doe".to_string()),
        status: UserStatus::Active,
        password_hash: None,
        password_updated_at: None,
        last_login_at: None,
    }
}

#[async_trait]
impl UserRepository for MockUserRepository {
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<UserRecord>, Error> {
        self.check()?;
        Ok(self
            .users
            .lock()
            .await
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(identifier) || u.id.as_str() == identifier)
            .cloned())
    }

    async fn find_by_id(&self, id: &UserId) -> Result<Option<UserRecord>, Error> {
        self.check()?;
        Ok(self.users.lock().await.get(id).cloned())
    }

    async fn update_status(&self, id: &UserId, status: UserStatus) -> Result<(), Error> {
        self.check()?;
        let mut users = self.users.lock().await;
        let user = users.get_mut(id).ok_or(StorageError::NotFound)?;
        user.status = status;
        Ok(())
    }

    async fn update_password_hash(&self, id: &UserId, hash: &str) -> Result<(), Error> {
        self.check()?;
        let mut users = self.users.lock().await;
        let user = users.get_mut(id).ok_or(StorageError::NotFound)?;
        user.password_hash = Some(hash.to_string());
        user.password_updated_at = Some(Utc::now());
        Ok(())
    }

    async fn update_last_login(&self, id: &UserId) -> Result<(), Error> {
        self.check()?;
        let mut users = self.users.lock().await;
        let user = users.get_mut(id).ok_or(StorageError::NotFound)?;
        user.last_login_at = Some(Utc::now());
        Ok(())
    }
}

#[derive(Default)]
pub struct MockPasswordHistoryRepository {
    entries: Mutex<Vec<PasswordHistoryEntry>>,
    fail_writes: AtomicBool,
}

impl MockPasswordHistoryRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn entries_for(&self, user_id: &UserId) -> Vec<PasswordHistoryEntry> {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|e| &e.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Make `create` and `delete_older_than` fail from now on.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<(), Error> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Database("disk I/O error".to_string()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl PasswordHistoryRepository for MockPasswordHistoryRepository {
    async fn get_recent(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<PasswordHistoryEntry>, Error> {
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .rev()
            .filter(|e| &e.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn create(&self, user_id: &UserId, hash: &str) -> Result<PasswordHistoryEntry, Error> {
        self.check_write()?;
        let mut entries = self.entries.lock().await;
        let entry = PasswordHistoryEntry {
            id: entries.len() as i64 + 1,
            user_id: user_id.clone(),
            password_hash: hash.to_string(),
            created_at: Utc::now(),
        };
        entries.push(entry.clone());
        Ok(entry)
    }

    async fn delete_older_than(&self, user_id: &UserId, keep_count: usize) -> Result<u64, Error> {
        self.check_write()?;
        let mut entries = self.entries.lock().await;
        let keep: Vec<i64> = entries
            .iter()
            .rev()
            .filter(|e| &e.user_id == user_id)
            .take(keep_count)
            .map(|e| e.id)
            .collect();
        let before = entries.len();
        entries.retain(|e| &e.user_id != user_id || keep.contains(&e.id));
        Ok((before - entries.len()) as u64)
    }
}
