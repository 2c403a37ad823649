//! # Tollgate
//!
//! Tollgate is the security layer that sits in front of an application's
//! login, password and two-factor flows. It wires the services from
//! `tollgate-core` over one counter store, one storage backend and one audit
//! sink:
//!
//! - Login rate limiting with progressive lockouts
//! - Per-account lockout after repeated failures
//! - Signed single-use CSRF tokens
//! - TOTP two-factor authentication with backup codes
//! - Password policy, history and expiration
//!
//! ## Storage Support
//!
//! Counters live in any [`CounterStore`]; the in-process
//! [`MemoryCounterStore`] is used unless another is configured. Users,
//! password history and audit events are stored through a
//! [`RepositoryProvider`]; SQLite ships with the `sqlite` feature.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tollgate::{RequestContext, SecurityConfig, TollgateBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tollgate = TollgateBuilder::new()
//!         .with_sqlite("sqlite://tollgate.db?mode=rwc")
//!         .await?
//!         .with_config(SecurityConfig::new(b"a long random secret".to_vec()))
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     let ctx = RequestContext::new(Some("203.0.113.7".to_string()), None);
//!     tollgate.login_attempt_guard("jane@example.com", &ctx).await?;
//!     // ... verify the password ...
//!     tollgate.record_login_failure("jane@example.com", &ctx).await?;
//!     Ok(())
//! }
//! ```
pub mod builder;
pub mod config;

use std::sync::Arc;

use serde_json::json;
use tokio::{sync::watch, task::JoinHandle};
use tollgate_core::{
    audit::record_audit,
    repositories::{PasswordHistoryRepositoryAdapter, UserRepositoryAdapter, keys},
};

pub use builder::{NoStorage, TollgateBuilder, TollgateBuilderError, WithStorage};
pub use config::SecurityConfig;

/// Re-export core types from tollgate_core
pub use tollgate_core::{
    AuditEvent, AuditEventType, AuditSeverity, AuditSink, CounterStore, CsrfConfig, CsrfService,
    Error, LockoutService, LockoutSettings, LockoutStatus, MemoryAuditSink, MemoryCounterStore,
    PasswordAlgorithm, PasswordChangeResult, PasswordPolicy, PasswordSecurityService,
    PasswordValidation, PolicyViolation, RateLimitAction, RateLimitConfig, RateLimitStatus,
    RateLimiter, RepositoryProvider, RequestContext, TracingAuditSink, TwoFactorConfig,
    TwoFactorService, TwoFactorSetupResponse, UserId, UserInfo, UserRecord, UserRepository,
    UserStatus,
};

/// Re-export storage backends
#[cfg(feature = "sqlite")]
pub use tollgate_storage_sqlite::{SqliteAuditSink, SqliteRepositoryProvider};

type Users<R> = UserRepositoryAdapter<R>;
type History<R> = PasswordHistoryRepositoryAdapter<R>;

/// The security coordinator for authentication flows.
///
/// All services share the same counter store and audit sink. Construct it
/// through [`TollgateBuilder`] or directly with [`Tollgate::new`].
pub struct Tollgate<R: RepositoryProvider> {
    repositories: Arc<R>,
    users: Arc<Users<R>>,
    audit: Arc<dyn AuditSink>,
    rate_limiter: RateLimiter<dyn CounterStore>,
    lockout: LockoutService<dyn CounterStore, Users<R>>,
    csrf: CsrfService,
    two_factor: TwoFactorService<dyn CounterStore>,
    passwords: PasswordSecurityService<Users<R>, History<R>>,
    config: SecurityConfig,
}

impl<R: RepositoryProvider> Tollgate<R> {
    /// Create a new Tollgate instance
    ///
    /// # Arguments
    ///
    /// * `repositories` - Storage for users and password history
    /// * `store` - Counter store for rate limits, lockouts and 2FA state
    /// * `audit` - Destination for security events
    /// * `config` - Settings for every service
    pub fn new(
        repositories: Arc<R>,
        store: Arc<dyn CounterStore>,
        audit: Arc<dyn AuditSink>,
        config: SecurityConfig,
    ) -> Self {
        let users = Arc::new(UserRepositoryAdapter::new(repositories.clone()));
        let history = Arc::new(PasswordHistoryRepositoryAdapter::new(repositories.clone()));

        let mut csrf = CsrfService::new(config.csrf.clone());
        if config.shared_csrf_cache {
            csrf = csrf.with_shared_store(store.clone());
        }

        Self {
            repositories,
            rate_limiter: RateLimiter::new(store.clone()),
            lockout: LockoutService::new(store.clone(), users.clone(), config.lockout.clone()),
            csrf,
            two_factor: TwoFactorService::new(store, config.two_factor.clone())
                .with_audit_sink(audit.clone()),
            passwords: PasswordSecurityService::new(
                users.clone(),
                history,
                config.password_policy.clone(),
            )
            .with_audit_sink(audit.clone())
            .with_algorithm(config.password_algorithm),
            users,
            audit,
            config,
        }
    }

    /// Run migrations for all repositories
    pub async fn migrate(&self) -> Result<(), Error> {
        self.repositories.migrate().await
    }

    /// Health check for all repositories
    pub async fn health_check(&self) -> Result<(), Error> {
        self.repositories.health_check().await
    }

    pub fn repositories(&self) -> &Arc<R> {
        &self.repositories
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &RateLimiter<dyn CounterStore> {
        &self.rate_limiter
    }

    pub fn lockout(&self) -> &LockoutService<dyn CounterStore, Users<R>> {
        &self.lockout
    }

    pub fn csrf(&self) -> &CsrfService {
        &self.csrf
    }

    pub fn two_factor(&self) -> &TwoFactorService<dyn CounterStore> {
        &self.two_factor
    }

    pub fn passwords(&self) -> &PasswordSecurityService<Users<R>, History<R>> {
        &self.passwords
    }

    pub fn audit_sink(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    /// Gate a login attempt before the credentials are checked.
    ///
    /// A locked account is rejected with `AccountLocked` without counting
    /// the attempt. Otherwise the attempt is counted against the login rate
    /// limit and rejected with `TooManyRequests` once the limit is exceeded.
    pub async fn login_attempt_guard(
        &self,
        identifier: &str,
        ctx: &RequestContext,
    ) -> Result<RateLimitStatus, Error> {
        self.lockout.ensure_not_locked(identifier).await?;

        let status = self
            .rate_limiter
            .check(
                identifier,
                &RateLimitAction::Login,
                Some(&self.config.login_rate_limit),
            )
            .await;

        if status.lockout_triggered {
            self.audit(
                AuditEvent::new(AuditEventType::RateLimitExceeded, AuditSeverity::Warning)
                    .details(json!({
                        "identifier": identifier,
                        "action": RateLimitAction::Login.as_str(),
                        "lockout_expiry": status.lockout_expiry,
                    })),
                ctx,
            )
            .await;
        }

        status.ensure_allowed()?;
        Ok(status)
    }

    /// Record a failed credential check.
    ///
    /// The attempt was already counted by [`Tollgate::login_attempt_guard`],
    /// so only the lockout record is updated here.
    pub async fn record_login_failure(
        &self,
        identifier: &str,
        ctx: &RequestContext,
    ) -> Result<LockoutStatus, Error> {
        let status = self.lockout.record_failed_attempt(identifier, None).await?;
        let actor = self.resolve_user_id(identifier).await;

        self.audit(
            AuditEvent::new(AuditEventType::LoginFailed, AuditSeverity::Info)
                .actor(actor.clone())
                .details(json!({
                    "identifier": identifier,
                    "failed_attempts": status.failed_attempts,
                    "remaining_attempts": status.remaining_attempts,
                })),
            ctx,
        )
        .await;

        if status.just_locked {
            self.audit(
                AuditEvent::new(AuditEventType::AccountLocked, AuditSeverity::Warning)
                    .actor(actor)
                    .details(json!({
                        "identifier": identifier,
                        "locked_until": status.locked_until,
                        "lockout_count": status.lockout_count,
                    })),
                ctx,
            )
            .await;
        }

        Ok(status)
    }

    /// Record a successful login: clear lockout and rate limit state and
    /// stamp the user's last login.
    pub async fn record_login_success(
        &self,
        user_id: &UserId,
        identifier: &str,
        ctx: &RequestContext,
    ) -> Result<(), Error> {
        self.lockout.clear_failed_attempts(identifier).await?;
        self.rate_limiter
            .record(identifier, &RateLimitAction::Login, true)
            .await;
        self.users.update_last_login(user_id).await?;

        self.audit(
            AuditEvent::new(AuditEventType::LoginSucceeded, AuditSeverity::Info)
                .actor(Some(user_id.clone()))
                .details(json!({ "identifier": identifier })),
            ctx,
        )
        .await;

        Ok(())
    }

    /// Administrative unlock. Clears the lockout record and the login rate
    /// limit for the identifier.
    ///
    /// Returns `true` if the identifier was locked.
    pub async fn unlock_account(
        &self,
        identifier: &str,
        unlocked_by: Option<&UserId>,
        ctx: &RequestContext,
    ) -> Result<bool, Error> {
        let was_locked = self.lockout.unlock_account(identifier).await?;
        self.rate_limiter
            .clear(identifier, &RateLimitAction::Login)
            .await;

        self.audit(
            AuditEvent::new(AuditEventType::AccountUnlocked, AuditSeverity::Info)
                .actor(unlocked_by.cloned())
                .details(json!({
                    "identifier": identifier,
                    "was_locked": was_locked,
                })),
            ctx,
        )
        .await;

        Ok(was_locked)
    }

    /// Validate a CSRF token, recording rejected tokens.
    pub async fn validate_csrf_token(
        &self,
        token: &str,
        client_id: Option<&str>,
        ctx: &RequestContext,
    ) -> bool {
        let valid = self.csrf.validate_token(token, client_id).await;
        if !valid {
            self.audit(
                AuditEvent::new(AuditEventType::CsrfValidationFailed, AuditSeverity::Warning)
                    .details(json!({ "client_id": client_id })),
                ctx,
            )
            .await;
        }
        valid
    }

    /// Change a password under the configured policy.
    pub async fn change_password(
        &self,
        user_id: &UserId,
        new_password: &str,
        ctx: &RequestContext,
    ) -> PasswordChangeResult {
        self.passwords
            .change_password(user_id, new_password, Some(ctx))
            .await
    }

    /// Start the periodic lockout cleanup.
    ///
    /// The task stops when `shutdown` changes.
    pub fn start_background_tasks(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tracing::info!("Starting background security tasks");
        self.lockout.start_cleanup_task(shutdown)
    }

    async fn resolve_user_id(&self, identifier: &str) -> Option<UserId> {
        match self
            .users
            .find_by_identifier(&keys::normalize_identifier(identifier))
            .await
        {
            Ok(user) => user.map(|user| user.id),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to resolve user for audit event");
                None
            }
        }
    }

    async fn audit(&self, event: AuditEvent, ctx: &RequestContext) {
        record_audit(self.audit.as_ref(), event.context(ctx.clone())).await;
    }
}
