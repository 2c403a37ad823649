//! SQLite storage backend for tollgate
//!
//! Provides the relational collaborators of the security services:
//!
//! - [`SqliteUserRepository`]: account status, password hash and login stamps
//! - [`SqlitePasswordHistoryRepository`]: previous password hashes
//! - [`SqliteAuditSink`]: the `audit_events` table
//!
//! [`SqliteRepositoryProvider`] bundles the repositories and runs the schema
//! migrations.
//!
//! ```rust,no_run
//! use tollgate_core::repositories::RepositoryProvider;
//! use tollgate_storage_sqlite::SqliteRepositoryProvider;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = sqlx::SqlitePool::connect("sqlite://tollgate.db?mode=rwc").await?;
//! let repositories = SqliteRepositoryProvider::new(pool);
//! repositories.migrate().await?;
//! # Ok(())
//! # }
//! ```
pub mod audit;
pub mod migrations;
pub mod repositories;

pub use audit::SqliteAuditSink;
pub use repositories::{
    SqlitePasswordHistoryRepository, SqliteRepositoryProvider, SqliteUserRepository,
};
