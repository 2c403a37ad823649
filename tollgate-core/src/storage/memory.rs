//! In-memory counter store.
//!
//! Implements the same atomic-increment/TTL contract as the shared store so the
//! rate limiter and lockout engine can run without a network dependency.
//! Expired entries are dropped lazily on access and swept by [`MemoryCounterStore::purge_expired`].

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use regex::Regex;

use crate::{
    Error,
    error::StorageError,
    repositories::{CounterStore, StoreOp, StoreReply},
};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// DashMap-backed counter store with per-key expiry.
///
/// Single operations lock only the affected shard. [`CounterStore::atomic`]
/// takes an exclusive batch lock so no other operation interleaves with the batch.
#[derive(Default)]
pub struct MemoryCounterStore {
    entries: DashMap<String, Entry>,
    batch_lock: RwLock<()>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        let now = Utc::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    fn live(&self, key: &str, now: DateTime<Utc>) -> Option<Entry> {
        let entry = self.entries.get(key)?.clone();
        if entry.is_expired(now) {
            self.entries.remove_if(key, |_, e| e.is_expired(now));
            return None;
        }
        Some(entry)
    }

    fn apply(&self, op: StoreOp, now: DateTime<Utc>) -> Result<StoreReply, Error> {
        match op {
            StoreOp::Set { key, value, ttl } => {
                self.entries.insert(
                    key,
                    Entry {
                        value: Value::Str(value),
                        expires_at: ttl.map(|ttl| now + ttl),
                    },
                );
                Ok(StoreReply::Ok)
            }
            StoreOp::Incr { key } => {
                let mut entry = self.entries.entry(key.clone()).or_insert(Entry {
                    value: Value::Str("0".to_string()),
                    expires_at: None,
                });
                if entry.is_expired(now) {
                    *entry = Entry {
                        value: Value::Str("0".to_string()),
                        expires_at: None,
                    };
                }
                let current = match &entry.value {
                    Value::Str(s) => s.parse::<i64>().map_err(|_| {
                        StorageError::Malformed(format!("value at {key} is not an integer"))
                    })?,
                    Value::Hash(_) => return Err(wrong_type(&key)),
                };
                let next = current.checked_add(1).ok_or_else(|| {
                    StorageError::Malformed(format!("increment at {key} would overflow"))
                })?;
                entry.value = Value::Str(next.to_string());
                Ok(StoreReply::Integer(next))
            }
            StoreOp::Expire { key, ttl } => {
                let exists = match self.entries.get_mut(&key) {
                    Some(mut entry) if !entry.is_expired(now) => {
                        entry.expires_at = Some(now + ttl);
                        true
                    }
                    _ => false,
                };
                Ok(StoreReply::Bool(exists))
            }
            StoreOp::HashSetMultiple { key, fields } => {
                let mut entry = self.entries.entry(key.clone()).or_insert(Entry {
                    value: Value::Hash(HashMap::new()),
                    expires_at: None,
                });
                if entry.is_expired(now) {
                    *entry = Entry {
                        value: Value::Hash(HashMap::new()),
                        expires_at: None,
                    };
                }
                match &mut entry.value {
                    Value::Hash(map) => map.extend(fields),
                    Value::Str(_) => return Err(wrong_type(&key)),
                }
                Ok(StoreReply::Ok)
            }
            StoreOp::Delete { key } => {
                let existed = self
                    .entries
                    .remove(&key)
                    .is_some_and(|(_, entry)| !entry.is_expired(now));
                Ok(StoreReply::Bool(existed))
            }
        }
    }

    fn apply_single(&self, op: StoreOp) -> Result<StoreReply, Error> {
        let _guard = self.batch_lock.read().unwrap_or_else(|e| e.into_inner());
        self.apply(op, Utc::now())
    }
}

fn wrong_type(key: &str) -> Error {
    StorageError::Malformed(format!("operation against a key holding the wrong kind of value: {key}"))
        .into()
}

fn glob_to_regex(pattern: &str) -> Result<Regex, Error> {
    let mut expr = String::with_capacity(pattern.len() + 2);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| StorageError::CounterStore(e.to_string()).into())
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        match self.live(key, Utc::now()) {
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s)),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), Error> {
        self.apply_single(StoreOp::Set {
            key: key.to_string(),
            value: value.to_string(),
            ttl,
        })?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, Error> {
        match self.apply_single(StoreOp::Incr {
            key: key.to_string(),
        })? {
            StoreReply::Integer(n) => Ok(n),
            other => Err(StorageError::CounterStore(format!("unexpected reply {other:?}")).into()),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, Error> {
        match self.apply_single(StoreOp::Expire {
            key: key.to_string(),
            ttl,
        })? {
            StoreReply::Bool(b) => Ok(b),
            other => Err(StorageError::CounterStore(format!("unexpected reply {other:?}")).into()),
        }
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, Error> {
        match self.live(key, Utc::now()) {
            Some(Entry {
                value: Value::Hash(map),
                ..
            }) => Ok(map),
            Some(_) => Err(wrong_type(key)),
            None => Ok(HashMap::new()),
        }
    }

    async fn hash_set_multiple(
        &self,
        key: &str,
        fields: &[(String, String)],
    ) -> Result<(), Error> {
        self.apply_single(StoreOp::HashSetMultiple {
            key: key.to_string(),
            fields: fields.to_vec(),
        })?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        match self.apply_single(StoreOp::Delete {
            key: key.to_string(),
        })? {
            StoreReply::Bool(b) => Ok(b),
            other => Err(StorageError::CounterStore(format!("unexpected reply {other:?}")).into()),
        }
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, Error> {
        let matcher = glob_to_regex(pattern)?;
        let now = Utc::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| !e.is_expired(now) && matcher.is_match(e.key()))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn atomic(&self, ops: Vec<StoreOp>) -> Result<Vec<StoreReply>, Error> {
        let _guard = self.batch_lock.write().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        ops.into_iter().map(|op| self.apply(op, now)).collect()
    }
}
