//! Shared counter store interface.
//!
//! The rate limiter, lockout engine and two-factor service keep their mutable
//! state in a low-latency key-value store with per-key TTLs (Redis in a typical
//! deployment). The services only depend on this narrow trait, so tests and
//! single-instance deployments can use [`crate::storage::MemoryCounterStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Duration;

use crate::Error;

/// One step of an [`CounterStore::atomic`] batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Incr {
        key: String,
    },
    Expire {
        key: String,
        ttl: Duration,
    },
    HashSetMultiple {
        key: String,
        fields: Vec<(String, String)>,
    },
    Delete {
        key: String,
    },
}

/// Result of one [`StoreOp`], in batch order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreReply {
    Ok,
    Integer(i64),
    Bool(bool),
}

/// Key-value store with TTLs and atomic primitives.
///
/// # Errors
///
/// Every method returns `StorageError::CounterStore` (or `Malformed`) when the
/// store is unreachable or holds data of an unexpected shape. Services decide
/// per operation whether that degrades to "allow" or fails closed.
#[async_trait]
pub trait CounterStore: Send + Sync + 'static {
    /// Get a string value.
    async fn get(&self, key: &str) -> Result<Option<String>, Error>;

    /// Set a string value, replacing any previous value and TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), Error>;

    /// Increment an integer value, creating it at 1 if absent. Returns the new value.
    async fn incr(&self, key: &str) -> Result<i64, Error>;

    /// Set the TTL of an existing key. Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, Error>;

    /// Read all fields of a hash. Missing keys yield an empty map.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, Error>;

    /// Set several fields of a hash, creating it if absent.
    async fn hash_set_multiple(&self, key: &str, fields: &[(String, String)])
    -> Result<(), Error>;

    /// Delete a key. Returns `true` if it existed.
    async fn delete(&self, key: &str) -> Result<bool, Error>;

    /// List keys matching a glob pattern (`*` and `?`).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, Error>;

    /// Execute a batch of operations as one transaction.
    async fn atomic(&self, ops: Vec<StoreOp>) -> Result<Vec<StoreReply>, Error>;
}

/// Key naming shared by all services.
///
/// These formats are part of the external contract and must stay stable so
/// operators can inspect the store across services.
pub mod keys {
    /// Canonical form of a login identifier.
    ///
    /// Emails are matched case-insensitively by the user store, so they are
    /// trimmed and lowercased; anything else (user ids, addresses) is only
    /// trimmed.
    pub fn normalize_identifier(identifier: &str) -> String {
        let identifier = identifier.trim();
        if identifier.contains('@') {
            identifier.to_lowercase()
        } else {
            identifier.to_string()
        }
    }

    pub fn rate_limit(action: &str, identifier: &str) -> String {
        format!("rate_limit:{action}:{}", normalize_identifier(identifier))
    }

    pub fn rate_limit_lockout(action: &str, identifier: &str) -> String {
        format!(
            "rate_limit:{action}:{}:lockout",
            normalize_identifier(identifier)
        )
    }

    pub fn lockout(identifier: &str) -> String {
        format!("lockout:{}", normalize_identifier(identifier))
    }

    pub const LOCKOUT_PATTERN: &str = "lockout:*";

    pub fn two_factor_setup(user_id: &str) -> String {
        format!("2fa_setup:{user_id}")
    }

    pub fn two_factor_user(user_id: &str) -> String {
        format!("2fa_user:{user_id}")
    }

    pub fn csrf_used(signature: &str) -> String {
        format!("csrf_used:{signature}")
    }
}

/// Parse a numeric field read from the store.
///
/// Missing or malformed values count as zero rather than failing the caller.
pub fn parse_counter(value: Option<&String>) -> i64 {
    value
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(0)
}

/// Parse a stored counter into the `u32` the services count with.
///
/// Negative and malformed values read as zero; values beyond `u32::MAX`
/// saturate so an oversized counter never reopens a spent budget.
pub fn parse_count(value: Option<&String>) -> u32 {
    u32::try_from(parse_counter(value).max(0)).unwrap_or(u32::MAX)
}
