//! Schema migrations for the SQLite backend
//!
//! Applied migrations are recorded in `_tollgate_migrations`. Each migration
//! runs in its own transaction together with its bookkeeping row.

use chrono::Utc;
use sqlx::SqlitePool;

const MIGRATION_TABLE: &str = "_tollgate_migrations";

/// A versioned schema change.
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub up: &'static [&'static str],
    pub down: &'static [&'static str],
}

/// A row of the migration table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub applied_at: i64,
}

pub const CREATE_USERS_TABLE: Migration = Migration {
    version: 1,
    name: "CreateUsersTable",
    up: &[r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL,
            first_name TEXT,
            last_name TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            password_hash TEXT,
            password_updated_at INTEGER,
            last_login_at INTEGER,
            created_at INTEGER DEFAULT (unixepoch()),
            updated_at INTEGER DEFAULT (unixepoch()),
            UNIQUE(email)
        );"#],
    down: &["DROP TABLE IF EXISTS users"],
};

pub const CREATE_PASSWORD_HISTORY_TABLE: Migration = Migration {
    version: 2,
    name: "CreatePasswordHistoryTable",
    up: &[
        r#"
        CREATE TABLE IF NOT EXISTS password_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        );"#,
        "CREATE INDEX IF NOT EXISTS idx_password_history_user ON password_history(user_id, created_at)",
    ],
    down: &[
        "DROP INDEX IF EXISTS idx_password_history_user",
        "DROP TABLE IF EXISTS password_history",
    ],
};

pub const CREATE_AUDIT_EVENTS_TABLE: Migration = Migration {
    version: 3,
    name: "CreateAuditEventsTable",
    up: &[
        r#"
        CREATE TABLE IF NOT EXISTS audit_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            actor_id TEXT,
            details TEXT NOT NULL,
            ip_address TEXT,
            user_agent TEXT,
            request_id TEXT,
            occurred_at INTEGER NOT NULL
        );"#,
        "CREATE INDEX IF NOT EXISTS idx_audit_events_actor ON audit_events(actor_id, occurred_at)",
        "CREATE INDEX IF NOT EXISTS idx_audit_events_type ON audit_events(event_type, occurred_at)",
    ],
    down: &[
        "DROP INDEX IF EXISTS idx_audit_events_type",
        "DROP INDEX IF EXISTS idx_audit_events_actor",
        "DROP TABLE IF EXISTS audit_events",
    ],
};

/// All migrations in version order.
pub const MIGRATIONS: &[Migration] = &[
    CREATE_USERS_TABLE,
    CREATE_PASSWORD_HISTORY_TABLE,
    CREATE_AUDIT_EVENTS_TABLE,
];

pub struct SqliteMigrationManager {
    pool: SqlitePool,
}

impl SqliteMigrationManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn initialize(&self) -> Result<(), sqlx::Error> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {MIGRATION_TABLE} (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at INTEGER NOT NULL DEFAULT (unixepoch())
            );"#
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn up(&self, migrations: &[Migration]) -> Result<(), sqlx::Error> {
        for migration in migrations {
            if self.is_applied(migration.version).await? {
                continue;
            }
            let mut tx = self.pool.begin().await?;

            tracing::info!(
                "Applying migration {} ({})",
                migration.name,
                migration.version
            );

            for statement in migration.up {
                sqlx::query(statement).execute(&mut *tx).await?;
            }

            sqlx::query(&format!(
                "INSERT INTO {MIGRATION_TABLE} (version, name, applied_at) VALUES (?, ?, ?)"
            ))
            .bind(migration.version)
            .bind(migration.name)
            .bind(Utc::now().timestamp())
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
        }
        Ok(())
    }

    /// Roll back `migrations` in reverse order.
    pub async fn down(&self, migrations: &[Migration]) -> Result<(), sqlx::Error> {
        for migration in migrations.iter().rev() {
            if !self.is_applied(migration.version).await? {
                continue;
            }
            let mut tx = self.pool.begin().await?;

            tracing::info!(
                "Rolling back migration {} ({})",
                migration.name,
                migration.version
            );

            for statement in migration.down {
                sqlx::query(statement).execute(&mut *tx).await?;
            }

            sqlx::query(&format!("DELETE FROM {MIGRATION_TABLE} WHERE version = ?"))
                .bind(migration.version)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
        }
        Ok(())
    }

    pub async fn get_applied_migrations(&self) -> Result<Vec<MigrationRecord>, sqlx::Error> {
        sqlx::query_as::<_, MigrationRecord>(&format!(
            "SELECT version, name, applied_at FROM {MIGRATION_TABLE} ORDER BY version"
        ))
        .fetch_all(&self.pool)
        .await
    }

    pub async fn is_applied(&self, version: i64) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(&format!(
            "SELECT EXISTS(SELECT 1 FROM {MIGRATION_TABLE} WHERE version = ?)"
        ))
        .bind(version)
        .fetch_one(&self.pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pool() -> SqlitePool {
        let _ = tracing_subscriber::fmt().try_init();
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    async fn table_exists(pool: &SqlitePool, name: &str) -> bool {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)")
            .bind(name)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_up_is_idempotent() {
        let pool = pool().await;
        let manager = SqliteMigrationManager::new(pool.clone());
        manager.initialize().await.unwrap();
        manager.up(MIGRATIONS).await.unwrap();
        manager.up(MIGRATIONS).await.unwrap();

        let applied = manager.get_applied_migrations().await.unwrap();
        assert_eq!(
            applied.iter().map(|m| m.version).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        for table in ["users", "password_history", "audit_events"] {
            assert!(table_exists(&pool, table).await, "{table}");
        }
    }

    #[tokio::test]
    async fn test_down_reverts_in_reverse_order() {
        let pool = pool().await;
        let manager = SqliteMigrationManager::new(pool.clone());
        manager.initialize().await.unwrap();
        manager.up(MIGRATIONS).await.unwrap();
        manager.down(&MIGRATIONS[1..]).await.unwrap();

        assert!(table_exists(&pool, "users").await);
        assert!(!table_exists(&pool, "password_history").await);
        assert!(!table_exists(&pool, "audit_events").await);
        assert!(manager.is_applied(1).await.unwrap());
        assert!(!manager.is_applied(2).await.unwrap());
    }
}
