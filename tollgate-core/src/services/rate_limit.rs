//! Request rate limiting per (identifier, action).
//!
//! The limiter counts attempts in a fixed window per identifier (usually a
//! client IP) and action, independent of user identity. Exceeding the
//! window's budget creates a lockout whose duration can grow with each
//! repeated offence.
//!
//! # Storage layout
//!
//! - `rate_limit:{action}:{identifier}` hash: `count`, `window_start` (epoch
//!   millis), `lockout_count`
//! - `rate_limit:{action}:{identifier}:lockout` string: lockout expiry (epoch
//!   millis), with a TTL equal to the lockout duration
//!
//! # Availability
//!
//! The limiter prefers availability: when the counter store cannot be reached
//! the request is allowed and the failure is logged.
//!
//! # Example
//!
//! ```rust,ignore
//! use tollgate_core::services::{RateLimitAction, RateLimiter};
//!
//! let limiter = RateLimiter::new(store);
//! let status = limiter.check("203.0.113.7", &RateLimitAction::Login, None).await;
//! if !status.allowed {
//!     // reply 429 with status.retry_after_seconds()
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    Error,
    error::SecurityError,
    repositories::{CounterStore, StoreOp, keys, parse_count},
};

use super::{from_millis, progressive_lockout_duration, seconds_until};

/// Minimum retention of a rate record once it has caused a lockout.
fn lockout_history_retention() -> Duration {
    Duration::hours(24)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAction {
    Login,
    PasswordReset,
    PasswordChange,
    TwoFactor,
    Custom(String),
}

impl RateLimitAction {
    /// The key segment for this action.
    pub fn as_str(&self) -> &str {
        match self {
            RateLimitAction::Login => "login",
            RateLimitAction::PasswordReset => "password_reset",
            RateLimitAction::PasswordChange => "password_change",
            RateLimitAction::TwoFactor => "two_factor",
            RateLimitAction::Custom(name) => name,
        }
    }

    /// Built-in limits for this action.
    pub fn default_config(&self) -> RateLimitConfig {
        match self {
            RateLimitAction::Login | RateLimitAction::Custom(_) => RateLimitConfig::default(),
            RateLimitAction::PasswordReset => RateLimitConfig {
                max_attempts: 3,
                window: Duration::minutes(60),
                lockout_duration: Duration::minutes(60),
                progressive: false,
            },
            RateLimitAction::PasswordChange => RateLimitConfig {
                max_attempts: 10,
                window: Duration::minutes(60),
                lockout_duration: Duration::minutes(15),
                progressive: false,
            },
            RateLimitAction::TwoFactor => RateLimitConfig {
                max_attempts: 5,
                window: Duration::minutes(15),
                lockout_duration: Duration::minutes(15),
                progressive: false,
            },
        }
    }
}

impl std::fmt::Display for RateLimitAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limits for one action. The default is the login policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Attempts allowed per window
    pub max_attempts: u32,
    pub window: Duration,
    /// Base lockout duration
    pub lockout_duration: Duration,
    /// Grow the lockout with each repeated lockout
    pub progressive: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::minutes(15),
            lockout_duration: Duration::minutes(30),
            progressive: true,
        }
    }
}

impl RateLimitConfig {
    /// Lockout duration after `previous_lockouts` earlier lockouts.
    pub fn lockout_duration_for(&self, previous_lockouts: u32) -> Duration {
        progressive_lockout_duration(self.lockout_duration, previous_lockouts, self.progressive)
    }
}

/// Counter state for one (action, identifier) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateRecord {
    pub count: u32,
    pub window_start: DateTime<Utc>,
    pub lockout_count: u32,
}

impl RateRecord {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            window_start: now,
            lockout_count: 0,
        }
    }

    /// Decode a stored hash. Missing or malformed fields count as zero.
    pub fn from_fields(fields: &HashMap<String, String>, now: DateTime<Utc>) -> Self {
        if fields.is_empty() {
            return Self::fresh(now);
        }
        Self {
            count: parse_count(fields.get("count")),
            window_start: from_millis(fields.get("window_start")).unwrap_or(now),
            lockout_count: parse_count(fields.get("lockout_count")),
        }
    }

    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("count".to_string(), self.count.to_string()),
            (
                "window_start".to_string(),
                self.window_start.timestamp_millis().to_string(),
            ),
            ("lockout_count".to_string(), self.lockout_count.to_string()),
        ]
    }

    /// Start a new window if the current one has elapsed. The lockout
    /// history is kept.
    fn roll_window(&mut self, now: DateTime<Utc>, window: Duration) {
        if now - self.window_start > window {
            self.count = 0;
            self.window_start = now;
        }
    }

    fn ttl(&self, config: &RateLimitConfig) -> Duration {
        if self.lockout_count > 0 {
            config.window.max(lockout_history_retention())
        } else {
            config.window
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub attempts_remaining: u32,
    pub is_locked: bool,
    /// When the current window (or lockout) ends.
    pub reset_time: DateTime<Utc>,
    pub lockout_expiry: Option<DateTime<Utc>>,
    /// Set only on the check that created the lockout.
    pub lockout_triggered: bool,
}

impl RateLimitStatus {
    fn allowed(remaining: u32, reset_time: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            attempts_remaining: remaining,
            is_locked: false,
            reset_time,
            lockout_expiry: None,
            lockout_triggered: false,
        }
    }

    fn locked(expiry: DateTime<Utc>, triggered: bool) -> Self {
        Self {
            allowed: false,
            attempts_remaining: 0,
            is_locked: true,
            reset_time: expiry,
            lockout_expiry: Some(expiry),
            lockout_triggered: triggered,
        }
    }

    pub fn retry_after_seconds(&self) -> u64 {
        self.retry_after_seconds_at(Utc::now())
    }

    pub fn retry_after_seconds_at(&self, now: DateTime<Utc>) -> u64 {
        match self.lockout_expiry {
            Some(expiry) if self.is_locked => seconds_until(expiry, now).max(1),
            _ => 0,
        }
    }

    /// Turn a rejection into [`SecurityError::TooManyRequests`].
    pub fn ensure_allowed(&self) -> Result<(), Error> {
        if self.allowed {
            Ok(())
        } else {
            Err(SecurityError::TooManyRequests {
                retry_after_seconds: self.retry_after_seconds(),
            }
            .into())
        }
    }
}

/// Fixed-window rate limiter over a [`CounterStore`].
pub struct RateLimiter<S: CounterStore + ?Sized> {
    store: Arc<S>,
}

impl<S: CounterStore + ?Sized> Clone for RateLimiter<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: CounterStore + ?Sized> RateLimiter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Count an attempt and report whether it may proceed.
    ///
    /// `config` overrides the action's built-in limits.
    pub async fn check(
        &self,
        identifier: &str,
        action: &RateLimitAction,
        config: Option<&RateLimitConfig>,
    ) -> RateLimitStatus {
        self.check_at(identifier, action, config, Utc::now()).await
    }

    pub async fn check_at(
        &self,
        identifier: &str,
        action: &RateLimitAction,
        config: Option<&RateLimitConfig>,
        now: DateTime<Utc>,
    ) -> RateLimitStatus {
        let config = config.cloned().unwrap_or_else(|| action.default_config());
        match self.try_check(identifier, action, &config, now).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(
                    action = %action,
                    error = %e,
                    "Rate limit check failed, allowing request"
                );
                RateLimitStatus::allowed(config.max_attempts, now + config.window)
            }
        }
    }

    /// [`RateLimiter::check`] as a guard: a rejection becomes
    /// [`SecurityError::TooManyRequests`].
    pub async fn enforce(
        &self,
        identifier: &str,
        action: &RateLimitAction,
        config: Option<&RateLimitConfig>,
    ) -> Result<RateLimitStatus, Error> {
        let status = self.check(identifier, action, config).await;
        status.ensure_allowed()?;
        Ok(status)
    }

    async fn try_check(
        &self,
        identifier: &str,
        action: &RateLimitAction,
        config: &RateLimitConfig,
        now: DateTime<Utc>,
    ) -> Result<RateLimitStatus, Error> {
        let key = keys::rate_limit(action.as_str(), identifier);
        let lockout_key = keys::rate_limit_lockout(action.as_str(), identifier);

        let active_lockout = self.store.get(&lockout_key).await?;
        if let Some(expiry) = from_millis(active_lockout.as_ref()) {
            if expiry > now {
                tracing::debug!(action = %action, "Request rejected by active rate limit lockout");
                return Ok(RateLimitStatus::locked(expiry, false));
            }
        }

        let fields = self.store.hash_get_all(&key).await?;
        let mut record = RateRecord::from_fields(&fields, now);
        record.roll_window(now, config.window);

        let attempted = record.count.saturating_add(1);
        if attempted > config.max_attempts {
            let duration = config.lockout_duration_for(record.lockout_count);
            // stored with millisecond precision
            let expiry = (now + duration).trunc_subsecs(3);
            record.lockout_count = record.lockout_count.saturating_add(1);
            record.count = 0;
            record.window_start = now;

            self.store
                .atomic(vec![
                    StoreOp::Set {
                        key: lockout_key,
                        value: expiry.timestamp_millis().to_string(),
                        ttl: Some(duration),
                    },
                    StoreOp::HashSetMultiple {
                        key: key.clone(),
                        fields: record.to_fields(),
                    },
                    StoreOp::Expire {
                        key,
                        ttl: record.ttl(config),
                    },
                ])
                .await?;

            tracing::warn!(
                action = %action,
                lockout_count = record.lockout_count,
                lockout_minutes = duration.num_minutes(),
                "Rate limit exceeded, lockout started"
            );
            return Ok(RateLimitStatus::locked(expiry, true));
        }

        record.count = attempted;
        self.write_record(&key, &record, config).await?;

        Ok(RateLimitStatus::allowed(
            config.max_attempts - attempted,
            record.window_start + config.window,
        ))
    }

    /// Record the outcome of an attempt.
    ///
    /// A failure counts against the window; a success clears all state for
    /// the pair.
    pub async fn record(&self, identifier: &str, action: &RateLimitAction, success: bool) {
        self.record_at(identifier, action, success, None, Utc::now())
            .await
    }

    pub async fn record_at(
        &self,
        identifier: &str,
        action: &RateLimitAction,
        success: bool,
        config: Option<&RateLimitConfig>,
        now: DateTime<Utc>,
    ) {
        if success {
            self.clear(identifier, action).await;
            return;
        }

        let config = config.cloned().unwrap_or_else(|| action.default_config());
        let key = keys::rate_limit(action.as_str(), identifier);
        let result = async {
            let fields = self.store.hash_get_all(&key).await?;
            let mut record = RateRecord::from_fields(&fields, now);
            record.roll_window(now, config.window);
            record.count = record.count.saturating_add(1);
            self.write_record(&key, &record, &config).await
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(action = %action, error = %e, "Failed to record rate limit attempt");
        }
    }

    /// Remove all rate limit state for the pair, including lockout history.
    pub async fn clear(&self, identifier: &str, action: &RateLimitAction) {
        let result = self
            .store
            .atomic(vec![
                StoreOp::Delete {
                    key: keys::rate_limit(action.as_str(), identifier),
                },
                StoreOp::Delete {
                    key: keys::rate_limit_lockout(action.as_str(), identifier),
                },
            ])
            .await;

        match result {
            Ok(_) => tracing::debug!(action = %action, "Rate limit cleared"),
            Err(e) => {
                tracing::warn!(action = %action, error = %e, "Failed to clear rate limit")
            }
        }
    }

    /// Attempts counted in the current window, for monitoring.
    pub async fn attempt_count(
        &self,
        identifier: &str,
        action: &RateLimitAction,
    ) -> Result<u32, Error> {
        let now = Utc::now();
        let config = action.default_config();
        let fields = self
            .store
            .hash_get_all(&keys::rate_limit(action.as_str(), identifier))
            .await?;
        let mut record = RateRecord::from_fields(&fields, now);
        record.roll_window(now, config.window);
        Ok(record.count)
    }

    async fn write_record(
        &self,
        key: &str,
        record: &RateRecord,
        config: &RateLimitConfig,
    ) -> Result<(), Error> {
        self.store
            .atomic(vec![
                StoreOp::HashSetMultiple {
                    key: key.to_string(),
                    fields: record.to_fields(),
                },
                StoreOp::Expire {
                    key: key.to_string(),
                    ttl: record.ttl(config),
                },
            ])
            .await?;
        Ok(())
    }
}
