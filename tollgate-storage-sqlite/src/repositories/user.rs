use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tollgate_core::{
    Error, UserId, UserRecord, UserStatus, error::StorageError, repositories::UserRepository,
};

pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a user row. The host application normally owns user creation;
    /// this exists for seeding and tests.
    pub async fn create(&self, user: &UserRecord) -> Result<UserRecord, Error> {
        let row = sqlx::query_as::<_, SqliteUser>(
            r#"
            INSERT INTO users (id, email, first_name, last_name, status, password_hash, password_updated_at, last_login_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            RETURNING id, email, first_name, last_name, status, password_hash, password_updated_at, last_login_at
            "#,
        )
        .bind(user.id.as_str())
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.status.as_str())
        .bind(&user.password_hash)
        .bind(user.password_updated_at.map(|dt| dt.timestamp()))
        .bind(user.last_login_at.map(|dt| dt.timestamp()))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to create user");
            StorageError::Database("Failed to create user".to_string())
        })?;

        row.try_into()
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SqliteUser {
    id: String,
    email: String,
    first_name: Option<String>,
    last_name: Option<String>,
    status: String,
    password_hash: Option<String>,
    password_updated_at: Option<i64>,
    last_login_at: Option<i64>,
}

pub(crate) fn timestamp(value: i64) -> Result<DateTime<Utc>, Error> {
    DateTime::from_timestamp(value, 0)
        .ok_or_else(|| StorageError::Malformed(format!("invalid timestamp {value}")).into())
}

impl TryFrom<SqliteUser> for UserRecord {
    type Error = Error;

    fn try_from(row: SqliteUser) -> Result<Self, Self::Error> {
        Ok(UserRecord {
            id: UserId::new(&row.id),
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            status: row
                .status
                .parse::<UserStatus>()
                .map_err(StorageError::Malformed)?,
            password_hash: row.password_hash,
            password_updated_at: row.password_updated_at.map(timestamp).transpose()?,
            last_login_at: row.last_login_at.map(timestamp).transpose()?,
        })
    }
}

const SELECT_USER: &str = "SELECT id, email, first_name, last_name, status, password_hash, password_updated_at, last_login_at FROM users";

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<UserRecord>, Error> {
        let row = sqlx::query_as::<_, SqliteUser>(&format!(
            "{SELECT_USER} WHERE email = ?1 COLLATE NOCASE OR id = ?1 LIMIT 1"
        ))
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to find user by identifier");
            StorageError::Database("Failed to find user".to_string())
        })?;

        row.map(TryInto::try_into).transpose()
    }

    async fn find_by_id(&self, id: &UserId) -> Result<Option<UserRecord>, Error> {
        let row = sqlx::query_as::<_, SqliteUser>(&format!("{SELECT_USER} WHERE id = ?1"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to find user by id");
                StorageError::Database("Failed to find user".to_string())
            })?;

        row.map(TryInto::try_into).transpose()
    }

    async fn update_status(&self, id: &UserId, status: UserStatus) -> Result<(), Error> {
        let result = sqlx::query("UPDATE users SET status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(Utc::now().timestamp())
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to update user status");
                StorageError::Database("Failed to update user status".to_string())
            })?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound.into());
        }
        Ok(())
    }

    async fn update_password_hash(&self, id: &UserId, hash: &str) -> Result<(), Error> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE users SET password_hash = ?1, password_updated_at = ?2, updated_at = ?2 WHERE id = ?3",
        )
        .bind(hash)
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to update password hash");
            StorageError::Database("Failed to update password hash".to_string())
        })?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound.into());
        }
        Ok(())
    }

    async fn update_last_login(&self, id: &UserId) -> Result<(), Error> {
        sqlx::query("UPDATE users SET last_login_at = ?1 WHERE id = ?2")
            .bind(Utc::now().timestamp())
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to update last login");
                StorageError::Database("Failed to update last login".to_string())
            })?;

        Ok(())
    }
}
