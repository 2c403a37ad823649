//! SQLite audit sink.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tollgate_core::{
    AuditEvent, AuditEventType, AuditSeverity, AuditSink, Error, RequestContext, UserId,
    error::StorageError,
};

use crate::repositories::user::timestamp;

/// Appends audit events to the `audit_events` table.
pub struct SqliteAuditSink {
    pool: SqlitePool,
}

impl SqliteAuditSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Most recent events, newest first. Optionally restricted to one actor.
    pub async fn recent(
        &self,
        actor_id: Option<&UserId>,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, Error> {
        let rows = sqlx::query_as::<_, SqliteAuditEvent>(
            r#"
            SELECT event_type, severity, actor_id, details, ip_address, user_agent, request_id, occurred_at
            FROM audit_events
            WHERE ?1 IS NULL OR actor_id = ?1
            ORDER BY occurred_at DESC, id DESC
            LIMIT ?2
            "#,
        )
        .bind(actor_id.map(UserId::as_str))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to read audit events");
            StorageError::Database("Failed to read audit events".to_string())
        })?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SqliteAuditEvent {
    event_type: String,
    severity: String,
    actor_id: Option<String>,
    details: String,
    ip_address: Option<String>,
    user_agent: Option<String>,
    request_id: Option<String>,
    occurred_at: i64,
}

fn parse_enum<T: serde::de::DeserializeOwned>(value: String) -> Result<T, Error> {
    serde_json::from_value(serde_json::Value::String(value))
        .map_err(|e| StorageError::Malformed(e.to_string()).into())
}

impl TryFrom<SqliteAuditEvent> for AuditEvent {
    type Error = Error;

    fn try_from(row: SqliteAuditEvent) -> Result<Self, Self::Error> {
        Ok(AuditEvent {
            event_type: parse_enum::<AuditEventType>(row.event_type)?,
            severity: parse_enum::<AuditSeverity>(row.severity)?,
            actor_id: row.actor_id.map(UserId::from),
            details: serde_json::from_str(&row.details)
                .map_err(|e| StorageError::Malformed(e.to_string()))?,
            context: RequestContext {
                ip_address: row.ip_address,
                user_agent: row.user_agent,
                request_id: row.request_id,
            },
            occurred_at: timestamp(row.occurred_at)?,
        })
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO audit_events (event_type, severity, actor_id, details, ip_address, user_agent, request_id, occurred_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.event_type.as_str())
        .bind(event.severity.as_str())
        .bind(event.actor_id.as_ref().map(UserId::as_str))
        .bind(event.details.to_string())
        .bind(&event.context.ip_address)
        .bind(&event.context.user_agent)
        .bind(&event.context.request_id)
        .bind(event.occurred_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, event_type = %event.event_type, "Failed to record audit event");
            StorageError::Database("Failed to record audit event".to_string())
        })?;

        Ok(())
    }
}
