//! Account lockout engine.
//!
//! Tracks failed logins per account identifier (email or user id) and locks
//! the account once too many failures accumulate inside the reset period.
//! Unlike the request rate limiter, the lockout engine also mirrors the lock
//! onto the persisted user status (`Active` ⇄ `Suspended`).
//!
//! # State machine
//!
//! ```text
//! Active --(max_failed_attempts reached)--> Locked { until, lockout_count }
//! Locked --(until elapsed | clear | unlock)--> Active
//! ```
//!
//! Transitions are computed by [`LockoutRecord::register_failure`], a pure
//! function of the stored record, the current time and the settings. The
//! service only loads and persists records around it.
//!
//! The counter-store lockout is authoritative: a user store that is down or
//! does not know the identifier never prevents the lock from taking effect.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    Error,
    error::SecurityError,
    repositories::{CounterStore, StoreOp, UserRepository, keys, parse_count},
    user::UserStatus,
};

use super::{from_millis, progressive_lockout_duration, seconds_until};

/// Lockout behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockoutSettings {
    /// Failures that trigger a lockout
    pub max_failed_attempts: u32,
    /// Base lockout duration
    pub lockout_duration: Duration,
    /// Failures older than this no longer count
    pub reset_period: Duration,
    /// Grow the lockout with each repeated lockout
    pub progressive: bool,
    /// How long lockout history is kept once an identifier has been locked
    pub history_retention: Duration,
}

impl Default for LockoutSettings {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout_duration: Duration::minutes(30),
            reset_period: Duration::hours(24),
            progressive: true,
            history_retention: Duration::days(30),
        }
    }
}

/// Stored lockout fields for one identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutRecord {
    pub failed_attempts: u32,
    pub first_failed_at: Option<DateTime<Utc>>,
    pub locked_until: Option<DateTime<Utc>>,
    pub lockout_count: u32,
}

/// The lockout state derived from a record at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutState {
    Active {
        failed_attempts: u32,
        first_failed_at: Option<DateTime<Utc>>,
    },
    Locked {
        until: DateTime<Utc>,
        lockout_count: u32,
    },
}

/// Result of registering one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutTransition {
    /// The identifier was already locked; nothing changes.
    AlreadyLocked { until: DateTime<Utc> },
    /// The failure was counted and the identifier stays active.
    Counted { record: LockoutRecord },
    /// This failure locked the identifier.
    Locked {
        record: LockoutRecord,
        until: DateTime<Utc>,
        duration: Duration,
    },
}

impl LockoutRecord {
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        Self {
            failed_attempts: parse_count(fields.get("failed_attempts")),
            first_failed_at: from_millis(fields.get("first_failed_at")),
            locked_until: from_millis(fields.get("locked_until")),
            lockout_count: parse_count(fields.get("lockout_count")),
        }
    }

    pub fn to_fields(&self) -> Vec<(String, String)> {
        let millis = |t: Option<DateTime<Utc>>| {
            t.map(|t| t.timestamp_millis().to_string())
                .unwrap_or_default()
        };
        vec![
            (
                "failed_attempts".to_string(),
                self.failed_attempts.to_string(),
            ),
            ("first_failed_at".to_string(), millis(self.first_failed_at)),
            ("locked_until".to_string(), millis(self.locked_until)),
            ("lockout_count".to_string(), self.lockout_count.to_string()),
        ]
    }

    pub fn state_at(&self, now: DateTime<Utc>, settings: &LockoutSettings) -> LockoutState {
        match self.locked_until {
            Some(until) if until > now => LockoutState::Locked {
                until,
                lockout_count: self.lockout_count,
            },
            _ => {
                let stale = self
                    .first_failed_at
                    .is_some_and(|first| now - first > settings.reset_period);
                if stale || self.locked_until.is_some() {
                    LockoutState::Active {
                        failed_attempts: 0,
                        first_failed_at: None,
                    }
                } else {
                    LockoutState::Active {
                        failed_attempts: self.failed_attempts,
                        first_failed_at: self.first_failed_at,
                    }
                }
            }
        }
    }

    /// Whether a lockout was recorded and has since run out.
    pub fn lock_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until <= now)
    }

    pub fn register_failure(
        &self,
        now: DateTime<Utc>,
        settings: &LockoutSettings,
    ) -> LockoutTransition {
        let (failed_attempts, first_failed_at) = match self.state_at(now, settings) {
            LockoutState::Locked { until, .. } => {
                return LockoutTransition::AlreadyLocked { until };
            }
            LockoutState::Active {
                failed_attempts,
                first_failed_at,
            } => (
                failed_attempts.saturating_add(1),
                first_failed_at.unwrap_or(now),
            ),
        };

        if failed_attempts >= settings.max_failed_attempts {
            let duration = progressive_lockout_duration(
                settings.lockout_duration,
                self.lockout_count,
                settings.progressive,
            );
            // stored with millisecond precision
            let until = (now + duration).trunc_subsecs(3);
            let record = LockoutRecord {
                failed_attempts: 0,
                first_failed_at: None,
                locked_until: Some(until),
                lockout_count: self.lockout_count.saturating_add(1),
            };
            return LockoutTransition::Locked {
                record,
                until,
                duration,
            };
        }

        LockoutTransition::Counted {
            record: LockoutRecord {
                failed_attempts,
                first_failed_at: Some(first_failed_at),
                locked_until: None,
                lockout_count: self.lockout_count,
            },
        }
    }

    fn ttl(&self, now: DateTime<Utc>, settings: &LockoutSettings) -> Duration {
        let base = if self.lockout_count > 0 {
            settings.history_retention.max(settings.reset_period)
        } else {
            settings.reset_period
        };
        match self.locked_until {
            Some(until) => base.max(until - now),
            None => base,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutStatus {
    pub identifier: String,
    pub is_locked: bool,
    pub failed_attempts: u32,
    pub remaining_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub next_attempt_allowed_at: Option<DateTime<Utc>>,
    pub lockout_count: u32,
    /// Set only by the failure that created the lockout.
    pub just_locked: bool,
}

impl LockoutStatus {
    fn from_state(
        identifier: &str,
        state: LockoutState,
        lockout_count: u32,
        settings: &LockoutSettings,
    ) -> Self {
        match state {
            LockoutState::Locked {
                until,
                lockout_count,
            } => Self {
                identifier: identifier.to_string(),
                is_locked: true,
                failed_attempts: 0,
                remaining_attempts: 0,
                locked_until: Some(until),
                next_attempt_allowed_at: Some(until),
                lockout_count,
                just_locked: false,
            },
            LockoutState::Active {
                failed_attempts, ..
            } => Self {
                identifier: identifier.to_string(),
                is_locked: false,
                failed_attempts,
                remaining_attempts: settings.max_failed_attempts.saturating_sub(failed_attempts),
                locked_until: None,
                next_attempt_allowed_at: None,
                lockout_count,
                just_locked: false,
            },
        }
    }

    fn unlocked(identifier: &str, settings: &LockoutSettings) -> Self {
        Self::from_state(
            identifier,
            LockoutState::Active {
                failed_attempts: 0,
                first_failed_at: None,
            },
            0,
            settings,
        )
    }

    pub fn retry_after_seconds(&self) -> u64 {
        self.retry_after_seconds_at(Utc::now())
    }

    pub fn retry_after_seconds_at(&self, now: DateTime<Utc>) -> u64 {
        match self.locked_until {
            Some(until) if self.is_locked => seconds_until(until, now).max(1),
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutStats {
    pub tracked_identifiers: u64,
    pub locked_accounts: u64,
    pub total_failed_attempts: u64,
    pub total_lockouts: u64,
}

/// Service for account lockout.
///
/// # Thread Safety
///
/// The service holds no mutable state of its own and can be shared across
/// tasks. Concurrent failures for one identifier race on the stored record;
/// the lock is still applied once the count reaches the limit.
pub struct LockoutService<S: CounterStore + ?Sized, U: UserRepository + ?Sized> {
    store: Arc<S>,
    users: Arc<U>,
    settings: LockoutSettings,
}

impl<S: CounterStore + ?Sized, U: UserRepository + ?Sized> LockoutService<S, U> {
    /// Create a new LockoutService.
    ///
    /// # Arguments
    ///
    /// * `store` - Counter store holding the lockout records
    /// * `users` - User store whose status mirrors the lockout
    /// * `settings` - Default lockout behavior
    pub fn new(store: Arc<S>, users: Arc<U>, settings: LockoutSettings) -> Self {
        Self {
            store,
            users,
            settings,
        }
    }

    pub fn settings(&self) -> &LockoutSettings {
        &self.settings
    }

    async fn load(&self, identifier: &str) -> Result<LockoutRecord, Error> {
        let fields = self.store.hash_get_all(&keys::lockout(identifier)).await?;
        Ok(LockoutRecord::from_fields(&fields))
    }

    async fn save(
        &self,
        identifier: &str,
        record: &LockoutRecord,
        settings: &LockoutSettings,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let key = keys::lockout(identifier);
        self.store
            .atomic(vec![
                StoreOp::HashSetMultiple {
                    key: key.clone(),
                    fields: record.to_fields(),
                },
                StoreOp::Expire {
                    key,
                    ttl: record.ttl(now, settings),
                },
            ])
            .await?;
        Ok(())
    }

    /// Record a failed login for `identifier`.
    ///
    /// While the identifier is locked, further failures are not counted and
    /// the existing `locked_until` is returned unchanged.
    ///
    /// # Arguments
    ///
    /// * `identifier` - Email or user id the login was attempted for
    /// * `settings` - Overrides the service's settings for this call
    pub async fn record_failed_attempt(
        &self,
        identifier: &str,
        settings: Option<&LockoutSettings>,
    ) -> Result<LockoutStatus, Error> {
        self.record_failed_attempt_at(identifier, settings, Utc::now())
            .await
    }

    pub async fn record_failed_attempt_at(
        &self,
        identifier: &str,
        settings: Option<&LockoutSettings>,
        now: DateTime<Utc>,
    ) -> Result<LockoutStatus, Error> {
        let settings = settings.unwrap_or(&self.settings);
        let current = self.load(identifier).await?;

        match current.register_failure(now, settings) {
            LockoutTransition::AlreadyLocked { until } => Ok(LockoutStatus::from_state(
                identifier,
                LockoutState::Locked {
                    until,
                    lockout_count: current.lockout_count,
                },
                current.lockout_count,
                settings,
            )),
            LockoutTransition::Counted { record } => {
                self.save(identifier, &record, settings, now).await?;
                tracing::debug!(
                    failed_attempts = record.failed_attempts,
                    "Recorded failed login attempt"
                );
                Ok(LockoutStatus::from_state(
                    identifier,
                    record.state_at(now, settings),
                    record.lockout_count,
                    settings,
                ))
            }
            LockoutTransition::Locked {
                record,
                until,
                duration,
            } => {
                self.save(identifier, &record, settings, now).await?;
                tracing::warn!(
                    lockout_count = record.lockout_count,
                    lockout_minutes = duration.num_minutes(),
                    "Account locked after repeated failed logins"
                );
                self.suspend_user(identifier).await;

                let mut status = LockoutStatus::from_state(
                    identifier,
                    LockoutState::Locked {
                        until,
                        lockout_count: record.lockout_count,
                    },
                    record.lockout_count,
                    settings,
                );
                status.just_locked = true;
                Ok(status)
            }
        }
    }

    /// Clear failures and any active lock after a successful login or an
    /// administrative reset. Lockout history is kept.
    pub async fn clear_failed_attempts(&self, identifier: &str) -> Result<(), Error> {
        let now = Utc::now();
        let current = self.load(identifier).await?;
        if current == LockoutRecord::default() {
            return Ok(());
        }

        let was_locked = current.locked_until.is_some();
        let record = LockoutRecord {
            failed_attempts: 0,
            first_failed_at: None,
            locked_until: None,
            lockout_count: current.lockout_count,
        };
        if record.lockout_count == 0 {
            self.store.delete(&keys::lockout(identifier)).await?;
        } else {
            self.save(identifier, &record, &self.settings, now).await?;
        }

        if was_locked {
            self.reactivate_user(identifier).await;
        }
        Ok(())
    }

    /// Current lockout information.
    ///
    /// Reads degrade to "unlocked" when the counter store is unavailable. A
    /// lockout found to have expired is released and the user reactivated.
    pub async fn get_lockout_info(&self, identifier: &str) -> LockoutStatus {
        self.get_lockout_info_at(identifier, Utc::now()).await
    }

    pub async fn get_lockout_info_at(&self, identifier: &str, now: DateTime<Utc>) -> LockoutStatus {
        let record = match self.load(identifier).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read lockout state, treating as unlocked");
                return LockoutStatus::unlocked(identifier, &self.settings);
            }
        };

        if record.lock_expired_at(now) {
            self.release_expired(identifier, &record, now).await;
        }

        LockoutStatus::from_state(
            identifier,
            record.state_at(now, &self.settings),
            record.lockout_count,
            &self.settings,
        )
    }

    /// Check if an identifier is currently locked.
    pub async fn is_locked(&self, identifier: &str) -> bool {
        self.get_lockout_info(identifier).await.is_locked
    }

    /// Guard form of [`LockoutService::is_locked`].
    pub async fn ensure_not_locked(&self, identifier: &str) -> Result<(), Error> {
        let status = self.get_lockout_info(identifier).await;
        match status.locked_until {
            Some(locked_until) if status.is_locked => {
                Err(SecurityError::AccountLocked { locked_until }.into())
            }
            _ => Ok(()),
        }
    }

    /// Administrative unlock: removes all lockout state including history.
    ///
    /// Returns `true` if the identifier was locked.
    pub async fn unlock_account(&self, identifier: &str) -> Result<bool, Error> {
        let now = Utc::now();
        let record = self.load(identifier).await?;
        let was_locked = matches!(
            record.state_at(now, &self.settings),
            LockoutState::Locked { .. }
        );

        self.store.delete(&keys::lockout(identifier)).await?;
        if record.locked_until.is_some() {
            self.reactivate_user(identifier).await;
        }

        tracing::info!(was_locked, "Account unlocked");
        Ok(was_locked)
    }

    /// Aggregate counts over every tracked identifier.
    pub async fn get_lockout_stats(&self) -> Result<LockoutStats, Error> {
        let now = Utc::now();
        let mut stats = LockoutStats::default();
        for key in self.store.keys(keys::LOCKOUT_PATTERN).await? {
            let record = LockoutRecord::from_fields(&self.store.hash_get_all(&key).await?);
            stats.tracked_identifiers += 1;
            stats.total_lockouts += record.lockout_count as u64;
            match record.state_at(now, &self.settings) {
                LockoutState::Locked { .. } => stats.locked_accounts += 1,
                LockoutState::Active {
                    failed_attempts, ..
                } => stats.total_failed_attempts += failed_attempts as u64,
            }
        }
        Ok(stats)
    }

    /// Release expired lockouts and drop records that no longer carry any
    /// state. Returns the number of records touched.
    pub async fn cleanup_at(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        sweep(&*self.store, &*self.users, &self.settings, now).await
    }

    /// Start the background cleanup task.
    ///
    /// This spawns a task that periodically releases expired lockouts
    /// (reactivating the users) and deletes records whose failures fell out
    /// of the reset period.
    ///
    /// # Arguments
    ///
    /// * `shutdown` - A watch receiver that signals when to stop the task
    ///
    /// # Returns
    ///
    /// A `JoinHandle` for the spawned task.
    pub fn start_cleanup_task(
        &self,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let users = Arc::clone(&self.users);
        let settings = self.settings.clone();

        // Cleanup runs hourly by default
        const CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(CLEANUP_INTERVAL);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        match sweep(&*store, &*users, &settings, Utc::now()).await {
                            Ok(count) if count > 0 => {
                                tracing::info!(
                                    count = count,
                                    "Cleaned up lockout records"
                                );
                            }
                            Err(e) => {
                                tracing::warn!(
                                    error = %e,
                                    "Failed to cleanup lockout records"
                                );
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("Shutting down lockout cleanup task");
                        break;
                    }
                }
            }
        })
    }

    async fn release_expired(&self, identifier: &str, record: &LockoutRecord, now: DateTime<Utc>) {
        if let Err(e) = release(&*self.store, identifier, record, &self.settings, now).await {
            tracing::warn!(error = %e, "Failed to release expired lockout");
            return;
        }
        self.reactivate_user(identifier).await;
    }

    async fn suspend_user(&self, identifier: &str) {
        set_user_status(&*self.users, identifier, UserStatus::Suspended).await;
    }

    async fn reactivate_user(&self, identifier: &str) {
        set_user_status(&*self.users, identifier, UserStatus::Active).await;
    }
}

/// Clear an expired lock from a stored record, keeping the history.
async fn release<S: CounterStore + ?Sized>(
    store: &S,
    identifier: &str,
    record: &LockoutRecord,
    settings: &LockoutSettings,
    now: DateTime<Utc>,
) -> Result<(), Error> {
    let released = LockoutRecord {
        failed_attempts: 0,
        first_failed_at: None,
        locked_until: None,
        lockout_count: record.lockout_count,
    };
    let key = keys::lockout(identifier);
    store
        .atomic(vec![
            StoreOp::HashSetMultiple {
                key: key.clone(),
                fields: released.to_fields(),
            },
            StoreOp::Expire {
                key,
                ttl: released.ttl(now, settings),
            },
        ])
        .await?;
    Ok(())
}

async fn sweep<S: CounterStore + ?Sized, U: UserRepository + ?Sized>(
    store: &S,
    users: &U,
    settings: &LockoutSettings,
    now: DateTime<Utc>,
) -> Result<u64, Error> {
    let mut touched = 0;
    for key in store.keys(keys::LOCKOUT_PATTERN).await? {
        let Some(identifier) = key.strip_prefix("lockout:") else {
            continue;
        };
        let record = LockoutRecord::from_fields(&store.hash_get_all(&key).await?);

        if record.lock_expired_at(now) {
            release(store, identifier, &record, settings, now).await?;
            set_user_status(users, identifier, UserStatus::Active).await;
            touched += 1;
            continue;
        }

        let idle = matches!(
            record.state_at(now, settings),
            LockoutState::Active {
                failed_attempts: 0,
                ..
            }
        );
        if idle && record.lockout_count == 0 {
            store.delete(&key).await?;
            touched += 1;
        }
    }
    Ok(touched)
}

/// Mirror the lockout onto the user record.
///
/// `Suspended` is only written to active users, and `Active` only to users
/// that are currently suspended, so disabled accounts are never touched.
/// Missing users and user-store failures are logged and otherwise ignored.
async fn set_user_status<U: UserRepository + ?Sized>(
    users: &U,
    identifier: &str,
    status: UserStatus,
) {
    let user = match users
        .find_by_identifier(&keys::normalize_identifier(identifier))
        .await
    {
        Ok(Some(user)) => user,
        Ok(None) => {
            tracing::debug!(status = %status, "No user for lockout identifier, status unchanged");
            return;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to look up user for lockout status update");
            return;
        }
    };

    let needs_update = match status {
        UserStatus::Suspended => user.status == UserStatus::Active,
        UserStatus::Active => user.is_suspended(),
        UserStatus::Disabled => false,
    };
    if !needs_update {
        return;
    }

    match users.update_status(&user.id, status).await {
        Ok(()) => tracing::info!(user_id = %user.id, status = %status, "Updated user status"),
        Err(e) => tracing::warn!(
            user_id = %user.id,
            error = %e,
            "Failed to update user status for lockout"
        ),
    }
}
