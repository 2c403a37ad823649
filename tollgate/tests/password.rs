mod common;

use chrono::{Duration, Utc};
use tollgate::{AuditEventType, RequestContext, SecurityConfig, UserRepository};
use tollgate_core::repositories::{
    PasswordHistoryRepository, PasswordHistoryRepositoryProvider, UserRepositoryProvider,
};

use common::user_id;

const FIRST: &str = "Copper#Violin7Lantern";
const SECOND: &str = "Maple!Orbit42Quartz";
const THIRD: &str = "Tundra$Echo93Falcon";

#[tokio::test]
async fn test_change_password_keeps_bounded_history() {
    let mut config = SecurityConfig::new(b"integration-test-secret".to_vec());
    config.password_policy.history_length = 2;
    let (tollgate, audit) = common::tollgate_with(config).await;
    let ctx = RequestContext::default();
    assert_eq!(tollgate.passwords().get_password_policy().history_length, 2);

    for password in [FIRST, SECOND, THIRD] {
        let result = tollgate.change_password(&user_id(), password, &ctx).await;
        assert!(result.success, "{password}: {:?}", result.error);
    }

    let history = tollgate
        .repositories()
        .password_history()
        .get_recent(&user_id(), 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);

    let user = tollgate
        .repositories()
        .user()
        .find_by_id(&user_id())
        .await
        .unwrap()
        .unwrap();
    let hash = user.password_hash.unwrap();
    assert!(tollgate.passwords().verify_password(THIRD, &hash, None).await.unwrap());

    // still inside the history window
    let result = tollgate.change_password(&user_id(), SECOND, &ctx).await;
    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("Password matches one of the recently used passwords")
    );
    assert_eq!(
        audit.events_of(AuditEventType::PasswordChangeRejected).await.len(),
        1
    );

    // pruned out of the window
    let result = tollgate.change_password(&user_id(), FIRST, &ctx).await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(audit.events_of(AuditEventType::PasswordChanged).await.len(), 4);
}

#[tokio::test]
async fn test_weak_and_personal_passwords_are_rejected() {
    let (tollgate, _) = common::tollgate().await;
    let ctx = RequestContext::default();

    let result = tollgate.change_password(&user_id(), "password", &ctx).await;
    assert!(!result.success);
    assert!(result.error.unwrap().starts_with("Weak password"));

    let result = tollgate
        .change_password(&user_id(), "JaneDoe!Secure2024x", &ctx)
        .await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("your name or email address"));

    let result = tollgate
        .change_password(&tollgate::UserId::new("nobody"), FIRST, &ctx)
        .await;
    assert_eq!(result.error.as_deref(), Some("User not found"));
}

#[tokio::test]
async fn test_expiration_follows_last_change() {
    let (tollgate, _) = common::tollgate().await;
    let passwords = tollgate.passwords();

    // no password set yet: full period, not expired
    assert!(!passwords.is_password_expired(&user_id()).await);
    assert_eq!(passwords.get_days_until_expiration(&user_id()).await, 90);

    let result = tollgate
        .change_password(&user_id(), FIRST, &RequestContext::default())
        .await;
    let expiry = result.password_expiry.unwrap();
    assert!((expiry - (Utc::now() + Duration::days(90))).num_seconds().abs() < 5);

    let in_80_days = Utc::now() + Duration::days(80);
    assert!(
        passwords
            .should_warn_password_expiry_at(&user_id(), in_80_days)
            .await
    );
    let in_91_days = Utc::now() + Duration::days(91);
    assert!(passwords.is_password_expired_at(&user_id(), in_91_days).await);
    assert_eq!(
        passwords
            .get_days_until_expiration_at(&user_id(), in_91_days)
            .await,
        0
    );
}
