#![allow(dead_code)]

use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use tollgate::{
    MemoryAuditSink, SecurityConfig, SqliteRepositoryProvider, Tollgate, TollgateBuilder,
    UserId, UserRecord, UserStatus,
};
use tollgate_core::repositories::UserRepositoryProvider;

pub const EMAIL: &str = "jane@example.com";

pub fn user_id() -> UserId {
    UserId::new("usr_jane")
}

/// A migrated single-connection in-memory database with one active user.
pub async fn tollgate() -> (Tollgate<SqliteRepositoryProvider>, Arc<MemoryAuditSink>) {
    tollgate_with(SecurityConfig::new(b"integration-test-secret".to_vec())).await
}

pub async fn tollgate_with(
    config: SecurityConfig,
) -> (Tollgate<SqliteRepositoryProvider>, Arc<MemoryAuditSink>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let audit = Arc::new(MemoryAuditSink::new());

    let tollgate = TollgateBuilder::new()
        .with_audit_sink(audit.clone())
        .with_sqlite_pool(pool)
        .with_config(config)
        .apply_migrations(true)
        .build()
        .await
        .unwrap();

    tollgate
        .repositories()
        .user()
        .create(&UserRecord {
            id: user_id(),
            email: EMAIL.to_string(),
            first_name: Some("Jane".to_string()),
            last_name: Some("Doe".to_string()),
            status: UserStatus::Active,
            password_hash: None,
            password_updated_at: None,
            last_login_at: None,
        })
        .await
        .unwrap();

    (tollgate, audit)
}
