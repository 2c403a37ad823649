mod common;

use chrono::Utc;
use tollgate::{AuditEventType, Error};
use tollgate_core::error::TwoFactorError;
use totp_rs::{Algorithm, Secret, TOTP};

use common::{EMAIL, user_id};

fn current_code(secret: &str) -> String {
    let bytes = Secret::Encoded(secret.to_string()).to_bytes().unwrap();
    TOTP::new(Algorithm::SHA1, 6, 1, 30, bytes, None, EMAIL.to_string())
        .unwrap()
        .generate(Utc::now().timestamp() as u64)
}

#[tokio::test]
async fn test_enrollment_login_and_disable() {
    let (tollgate, audit) = common::tollgate().await;
    let two_factor = tollgate.two_factor();

    let setup = two_factor.setup_two_factor(&user_id(), EMAIL).await.unwrap();
    assert_eq!(setup.backup_codes.len(), 10);
    assert!(setup.otpauth_url.starts_with("otpauth://totp/"));
    assert!(!two_factor.is_enabled(&user_id()).await.unwrap());

    two_factor
        .verify_and_enable(&user_id(), &current_code(&setup.secret))
        .await
        .unwrap();
    assert!(two_factor.is_enabled(&user_id()).await.unwrap());

    // backup codes work once, case-insensitively
    let backup = setup.backup_codes[0].to_lowercase();
    two_factor.verify_two_factor(&user_id(), &backup).await.unwrap();
    let err = two_factor
        .verify_two_factor(&user_id(), &backup)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::TwoFactor(TwoFactorError::InvalidTokenOrBackupCode)
    ));
    assert_eq!(two_factor.remaining_backup_codes(&user_id()).await.unwrap(), 9);

    // a backup code cannot turn 2FA off
    let err = two_factor
        .disable_two_factor(&user_id(), &setup.backup_codes[1])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TwoFactor(TwoFactorError::InvalidCode)));

    two_factor
        .disable_two_factor(&user_id(), &current_code(&setup.secret))
        .await
        .unwrap();
    assert!(!two_factor.is_enabled(&user_id()).await.unwrap());

    for event_type in [
        AuditEventType::TwoFactorEnabled,
        AuditEventType::BackupCodeUsed,
        AuditEventType::TwoFactorDisabled,
    ] {
        assert_eq!(audit.events_of(event_type).await.len(), 1, "{event_type}");
    }
}
