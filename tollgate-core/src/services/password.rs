use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::{Rng, TryRngCore, rngs::OsRng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

use crate::{
    Error, UserId,
    audit::{
        AuditEvent, AuditEventType, AuditSeverity, AuditSink, RequestContext, TracingAuditSink,
        record_audit,
    },
    error::ValidationError,
    hashing::{self, PasswordAlgorithm},
    repositories::{PasswordHistoryRepository, UserRepository},
    validation::{self, PasswordPolicy, PasswordValidation, SPECIAL_CHARACTERS, UserInfo},
};

const UPPERCASE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
const DIGITS: &str = "0123456789";

/// Outcome of [`PasswordSecurityService::change_password`].
///
/// Failures are reported in `error` rather than as an `Err` so the caller can
/// show the message directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasswordChangeResult {
    pub success: bool,
    pub error: Option<String>,
    pub password_expiry: Option<DateTime<Utc>>,
}

impl PasswordChangeResult {
    fn succeeded(password_expiry: DateTime<Utc>) -> Self {
        Self {
            success: true,
            error: None,
            password_expiry: Some(password_expiry),
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            password_expiry: None,
        }
    }
}

/// Service for password hashing, policy checks, history and expiration
pub struct PasswordSecurityService<U, H>
where
    U: UserRepository + ?Sized,
    H: PasswordHistoryRepository + ?Sized,
{
    users: Arc<U>,
    history: Arc<H>,
    audit: Arc<dyn AuditSink>,
    policy: PasswordPolicy,
    algorithm: PasswordAlgorithm,
}

impl<U, H> PasswordSecurityService<U, H>
where
    U: UserRepository + ?Sized,
    H: PasswordHistoryRepository + ?Sized,
{
    /// Create a new PasswordSecurityService with the given repositories and policy
    pub fn new(users: Arc<U>, history: Arc<H>, policy: PasswordPolicy) -> Self {
        Self {
            users,
            history,
            audit: Arc::new(TracingAuditSink),
            policy,
            algorithm: PasswordAlgorithm::default(),
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Algorithm used for new hashes. Verification still accepts both.
    pub fn with_algorithm(mut self, algorithm: PasswordAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn get_password_policy(&self) -> &PasswordPolicy {
        &self.policy
    }

    /// Hash a password with `algorithm`, or the configured default.
    pub async fn hash_password(
        &self,
        password: &str,
        algorithm: Option<PasswordAlgorithm>,
    ) -> Result<String, Error> {
        hashing::hash_password(password, algorithm.unwrap_or(self.algorithm)).await
    }

    /// Verify a password against a stored hash.
    ///
    /// When `algorithm` is `None` it is detected from the hash prefix.
    pub async fn verify_password(
        &self,
        password: &str,
        hash: &str,
        algorithm: Option<PasswordAlgorithm>,
    ) -> Result<bool, Error> {
        hashing::verify_password(password, hash, algorithm).await
    }

    /// Check a password against the service policy or `policy_override`.
    pub fn validate_password(
        &self,
        password: &str,
        user_info: Option<&UserInfo>,
        policy_override: Option<&PasswordPolicy>,
    ) -> PasswordValidation {
        validation::validate_password(password, user_info, policy_override.unwrap_or(&self.policy))
    }

    /// Replace a user's password.
    ///
    /// The new password must pass the policy and must not match the current
    /// hash or any of the last `history_length` hashes.
    pub async fn change_password(
        &self,
        user_id: &UserId,
        new_password: &str,
        context: Option<&RequestContext>,
    ) -> PasswordChangeResult {
        self.change_password_at(user_id, new_password, context, Utc::now())
            .await
    }

    pub async fn change_password_at(
        &self,
        user_id: &UserId,
        new_password: &str,
        context: Option<&RequestContext>,
        now: DateTime<Utc>,
    ) -> PasswordChangeResult {
        let user = match self.users.find_by_id(user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => return PasswordChangeResult::failed("User not found"),
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Failed to load user for password change");
                return PasswordChangeResult::failed("Failed to change password");
            }
        };

        let validation = self.validate_password(new_password, Some(&user.user_info()), None);
        if !validation.is_valid {
            return PasswordChangeResult::failed(
                ValidationError::WeakPassword(validation.violations).to_string(),
            );
        }

        match self.is_reused(user_id, user.password_hash.as_deref(), new_password).await {
            Ok(false) => {}
            Ok(true) => {
                tracing::info!(user_id = %user_id, "Password change rejected: reused password");
                self.audit(
                    AuditEventType::PasswordChangeRejected,
                    AuditSeverity::Warning,
                    user_id,
                    serde_json::json!({ "reason": "password_reused" }),
                    context,
                )
                .await;
                return PasswordChangeResult::failed(ValidationError::PasswordReused.to_string());
            }
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Failed to check password history");
                return PasswordChangeResult::failed("Failed to change password");
            }
        }

        if let Err(e) = self.persist(user_id, new_password).await {
            tracing::error!(user_id = %user_id, error = %e, "Failed to store new password");
            return PasswordChangeResult::failed("Failed to change password");
        }

        let password_expiry = now + Duration::days(self.policy.expiration_days);
        tracing::info!(user_id = %user_id, "Password changed");
        self.audit(
            AuditEventType::PasswordChanged,
            AuditSeverity::Info,
            user_id,
            serde_json::json!({
                "strength": validation.strength.level.as_str(),
                "password_expiry": password_expiry,
            }),
            context,
        )
        .await;

        PasswordChangeResult::succeeded(password_expiry)
    }

    async fn is_reused(
        &self,
        user_id: &UserId,
        current_hash: Option<&str>,
        password: &str,
    ) -> Result<bool, Error> {
        let recent = self
            .history
            .get_recent(user_id, self.policy.history_length)
            .await?;
        let hashes = current_hash
            .into_iter()
            .map(str::to_string)
            .chain(recent.into_iter().map(|entry| entry.password_hash));

        for hash in hashes {
            match self.verify_password(password, &hash, None).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                // An unreadable hash cannot match
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "Skipping unverifiable password hash");
                }
            }
        }
        Ok(false)
    }

    async fn persist(&self, user_id: &UserId, password: &str) -> Result<(), Error> {
        let hash = self.hash_password(password, None).await?;
        self.users.update_password_hash(user_id, &hash).await?;

        // The new password is in effect from here on. History failures only
        // weaken reuse checks, so they are logged rather than reported.
        if let Err(e) = self.history.create(user_id, &hash).await {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to record password history");
            return Ok(());
        }

        match self
            .history
            .delete_older_than(user_id, self.policy.history_length)
            .await
        {
            Ok(pruned) if pruned > 0 => {
                tracing::debug!(user_id = %user_id, pruned, "Pruned password history");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Failed to prune password history");
            }
        }
        Ok(())
    }

    async fn audit(
        &self,
        event_type: AuditEventType,
        severity: AuditSeverity,
        user_id: &UserId,
        details: serde_json::Value,
        context: Option<&RequestContext>,
    ) {
        let event = AuditEvent::new(event_type, severity)
            .actor(Some(user_id.clone()))
            .details(details)
            .context(context.cloned().unwrap_or_default());
        record_audit(self.audit.as_ref(), event).await;
    }

    /// Last password change of a user, if known. Lookup failures count as unknown.
    async fn password_updated_at(&self, user_id: &UserId) -> Option<DateTime<Utc>> {
        match self.users.find_by_id(user_id).await {
            Ok(user) => user.and_then(|u| u.password_updated_at),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Failed to load user for password expiry");
                None
            }
        }
    }

    pub async fn is_password_expired(&self, user_id: &UserId) -> bool {
        self.is_password_expired_at(user_id, Utc::now()).await
    }

    /// A user with no recorded password change is never expired.
    pub async fn is_password_expired_at(&self, user_id: &UserId, now: DateTime<Utc>) -> bool {
        match self.password_updated_at(user_id).await {
            Some(updated_at) => now - updated_at > Duration::days(self.policy.expiration_days),
            None => false,
        }
    }

    pub async fn get_days_until_expiration(&self, user_id: &UserId) -> i64 {
        self.get_days_until_expiration_at(user_id, Utc::now()).await
    }

    /// Whole days until the password expires, rounded up and never negative.
    ///
    /// Unknown users and users with no recorded change get the full period.
    pub async fn get_days_until_expiration_at(&self, user_id: &UserId, now: DateTime<Utc>) -> i64 {
        let Some(updated_at) = self.password_updated_at(user_id).await else {
            return self.policy.expiration_days;
        };
        let remaining = updated_at + Duration::days(self.policy.expiration_days) - now;
        let seconds = remaining.num_seconds().max(0);
        (seconds + 86_399) / 86_400
    }

    pub async fn should_warn_password_expiry(&self, user_id: &UserId) -> bool {
        self.should_warn_password_expiry_at(user_id, Utc::now()).await
    }

    pub async fn should_warn_password_expiry_at(&self, user_id: &UserId, now: DateTime<Utc>) -> bool {
        self.get_days_until_expiration_at(user_id, now).await <= self.policy.warning_days
    }

    /// Generate a random password with at least one character of each class.
    ///
    /// Lengths below 4 are raised to 4.
    pub fn generate_temporary_password(&self, length: usize) -> String {
        generate_temporary_password(length, self.policy.max_repeated_chars)
    }
}

fn generate_temporary_password(length: usize, max_repeated_chars: usize) -> String {
    let length = length.max(4);
    let classes: [Vec<char>; 4] = [
        UPPERCASE.chars().collect(),
        LOWERCASE.chars().collect(),
        DIGITS.chars().collect(),
        SPECIAL_CHARACTERS.chars().collect(),
    ];
    let all: Vec<char> = classes.iter().flatten().copied().collect();
    let mut rng = OsRng.unwrap_err();

    loop {
        let mut password: Vec<char> = classes
            .iter()
            .map(|class| class[rng.random_range(0..class.len())])
            .collect();
        while password.len() < length {
            password.push(all[rng.random_range(0..all.len())]);
        }
        password.shuffle(&mut rng);

        let password: String = password.into_iter().collect();
        if max_repeated_chars == 0 || validation::longest_run(&password) <= max_repeated_chars {
            return password;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::testing::{MockPasswordHistoryRepository, MockUserRepository, user};
    use crate::user::UserRecord;

    type Service = PasswordSecurityService<MockUserRepository, MockPasswordHistoryRepository>;

    fn service() -> (
        Service,
        Arc<MockUserRepository>,
        Arc<MockPasswordHistoryRepository>,
        MemoryAuditSink,
    ) {
        let users = MockUserRepository::new();
        let history = MockPasswordHistoryRepository::new();
        let audit = MemoryAuditSink::new();
        let service = PasswordSecurityService::new(
            users.clone(),
            history.clone(),
            PasswordPolicy::default(),
        )
        .with_audit_sink(Arc::new(audit.clone()));
        (service, users, history, audit)
    }

    fn updated_days_ago(days: i64, now: DateTime<Utc>) -> UserRecord {
        UserRecord {
            password_updated_at: Some(now - Duration::days(days)),
            ..user("usr_1", "jane@example.com")
        }
    }

    #[tokio::test]
    async fn test_hash_and_verify_both_algorithms() {
        let (service, _, _, _) = service();
        for algorithm in [PasswordAlgorithm::Argon2, PasswordAlgorithm::Bcrypt] {
            let hash = service
                .hash_password("Tr1cky-Parsnip-Gate", Some(algorithm))
                .await
                .unwrap();
            assert_eq!(PasswordAlgorithm::detect(&hash), Some(algorithm));
            assert!(service.verify_password("Tr1cky-Parsnip-Gate", &hash, None).await.unwrap());
            assert!(!service.verify_password("wrong", &hash, None).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_validate_with_override() {
        let (service, _, _, _) = service();
        let relaxed = PasswordPolicy {
            min_length: 6,
            require_special: false,
            ..PasswordPolicy::default()
        };
        assert!(!service.validate_password("Sh0rtie", None, None).is_valid);
        assert!(service.validate_password("Sh0rtie", None, Some(&relaxed)).is_valid);
    }

    #[tokio::test]
    async fn test_change_password_success() {
        let (service, users, history, audit) = service();
        users.insert(user("usr_1", "jane@example.com")).await;
        let now = Utc::now();
        let user_id = UserId::new("usr_1");

        let result = service
            .change_password_at(&user_id, "Velvet-Compass-42", None, now)
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.password_expiry, Some(now + Duration::days(90)));

        let stored = users.get(&user_id).await.unwrap();
        let hash = stored.password_hash.unwrap();
        assert!(service.verify_password("Velvet-Compass-42", &hash, None).await.unwrap());
        assert!(stored.password_updated_at.is_some());
        assert_eq!(history.entries_for(&user_id).await.len(), 1);
        assert_eq!(audit.events_of(AuditEventType::PasswordChanged).await.len(), 1);
    }

    #[tokio::test]
    async fn test_change_password_reports_success_when_history_write_fails() {
        let (service, users, history, audit) = service();
        users.insert(user("usr_1", "jane@example.com")).await;
        let user_id = UserId::new("usr_1");
        history.fail_writes();

        let result = service
            .change_password(&user_id, "Velvet-Compass-42", None)
            .await;
        assert!(result.success, "{:?}", result.error);
        assert!(result.password_expiry.is_some());

        let hash = users.get(&user_id).await.unwrap().password_hash.unwrap();
        assert!(service.verify_password("Velvet-Compass-42", &hash, None).await.unwrap());
        assert!(history.entries_for(&user_id).await.is_empty());
        assert_eq!(audit.events_of(AuditEventType::PasswordChanged).await.len(), 1);

        // the current hash still blocks an immediate reuse
        let result = service
            .change_password(&user_id, "Velvet-Compass-42", None)
            .await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_change_password_fails_cleanly_when_user_store_is_down() {
        let (service, users, history, audit) = service();
        users.insert(user("usr_1", "jane@example.com")).await;
        let user_id = UserId::new("usr_1");
        users.fail();

        let result = service
            .change_password(&user_id, "Velvet-Compass-42", None)
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Failed to change password"));
        assert!(history.entries_for(&user_id).await.is_empty());
        assert!(audit.events_of(AuditEventType::PasswordChanged).await.is_empty());
    }

    #[tokio::test]
    async fn test_change_password_rejects_weak_password() {
        let (service, users, history, _) = service();
        users.insert(user("usr_1", "jane@example.com")).await;
        let user_id = UserId::new("usr_1");

        let result = service.change_password(&user_id, "Jane-Doe-2024!", None).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("your name or email address"));
        assert!(history.entries_for(&user_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_change_password_rejects_reuse() {
        let (service, users, _, audit) = service();
        users.insert(user("usr_1", "jane@example.com")).await;
        let user_id = UserId::new("usr_1");

        assert!(service.change_password(&user_id, "Velvet-Compass-42", None).await.success);
        assert!(service.change_password(&user_id, "Amber-Lantern-77", None).await.success);

        // matches history, not the current hash
        let result = service.change_password(&user_id, "Velvet-Compass-42", None).await;
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("Password matches one of the recently used passwords")
        );
        // matches the current hash
        let result = service.change_password(&user_id, "Amber-Lantern-77", None).await;
        assert!(!result.success);
        assert_eq!(
            audit.events_of(AuditEventType::PasswordChangeRejected).await.len(),
            2
        );
    }

    #[tokio::test]
    async fn test_history_is_pruned() {
        let (service, users, history, _) = service();
        users.insert(user("usr_1", "jane@example.com")).await;
        let user_id = UserId::new("usr_1");
        let service = PasswordSecurityService {
            policy: PasswordPolicy {
                history_length: 2,
                ..PasswordPolicy::default()
            },
            ..service
        };

        for password in ["Velvet-Compass-42", "Amber-Lantern-77", "Quiet-Harbor-19"] {
            assert!(service.change_password(&user_id, password, None).await.success);
        }
        assert_eq!(history.entries_for(&user_id).await.len(), 2);
    }

    #[tokio::test]
    async fn test_change_password_unknown_user() {
        let (service, _, _, _) = service();
        let result = service
            .change_password(&UserId::new("ghost"), "Velvet-Compass-42", None)
            .await;
        assert_eq!(result, PasswordChangeResult::failed("User not found"));
    }

    #[tokio::test]
    async fn test_change_password_store_failure_is_structured() {
        let (service, users, _, _) = service();
        users.fail();
        let result = service
            .change_password(&UserId::new("usr_1"), "Velvet-Compass-42", None)
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Failed to change password"));
    }

    #[tokio::test]
    async fn test_expiration() {
        let (service, users, _, _) = service();
        let now = Utc::now();
        let user_id = UserId::new("usr_1");

        users.insert(updated_days_ago(10, now)).await;
        assert!(!service.is_password_expired_at(&user_id, now).await);
        assert_eq!(service.get_days_until_expiration_at(&user_id, now).await, 80);
        assert!(!service.should_warn_password_expiry_at(&user_id, now).await);

        users.insert(updated_days_ago(80, now)).await;
        assert_eq!(service.get_days_until_expiration_at(&user_id, now).await, 10);
        assert!(service.should_warn_password_expiry_at(&user_id, now).await);

        users.insert(updated_days_ago(91, now)).await;
        assert!(service.is_password_expired_at(&user_id, now).await);
        assert_eq!(service.get_days_until_expiration_at(&user_id, now).await, 0);
    }

    #[tokio::test]
    async fn test_expiration_fails_open() {
        let (service, users, _, _) = service();
        let ghost = UserId::new("ghost");
        assert!(!service.is_password_expired(&ghost).await);
        assert_eq!(service.get_days_until_expiration(&ghost).await, 90);

        // no timestamp
        users.insert(user("usr_1", "jane@example.com")).await;
        assert!(!service.is_password_expired(&UserId::new("usr_1")).await);

        users.fail();
        assert!(!service.is_password_expired(&UserId::new("usr_1")).await);
        assert!(!service.should_warn_password_expiry(&UserId::new("usr_1")).await);
    }

    #[test]
    fn test_temporary_password_has_every_class() {
        for length in [4, 16, 40] {
            let password = generate_temporary_password(length, 2);
            assert_eq!(password.chars().count(), length);
            assert!(password.chars().any(|c| c.is_ascii_uppercase()));
            assert!(password.chars().any(|c| c.is_ascii_lowercase()));
            assert!(password.chars().any(|c| c.is_ascii_digit()));
            assert!(password.chars().any(|c| SPECIAL_CHARACTERS.contains(c)));
            assert!(validation::longest_run(&password) <= 2);
        }
        assert_eq!(generate_temporary_password(1, 2).chars().count(), 4);
    }

    #[tokio::test]
    async fn test_temporary_password_passes_policy() {
        let (service, _, _, _) = service();
        let password = service.generate_temporary_password(16);
        let validation = service.validate_password(&password, None, None);
        assert!(validation.is_valid, "{password}: {:?}", validation.violations);
    }
}
