//! Audit events emitted by security flows
//!
//! State-changing outcomes (lockouts, password changes, 2FA changes) are
//! recorded through an [`AuditSink`]. The sink is append-only from the point of
//! view of the services; persistence lives in the host application or in a
//! storage crate.
//!
//! Audit writes never fail the operation that produced them: use
//! [`record_audit`] which logs and swallows sink errors.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{Error, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    LoginFailed,
    LoginSucceeded,
    AccountLocked,
    AccountUnlocked,
    RateLimitExceeded,
    PasswordChanged,
    PasswordChangeRejected,
    TwoFactorEnabled,
    TwoFactorDisabled,
    BackupCodeUsed,
    BackupCodesRegenerated,
    CsrfValidationFailed,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::LoginFailed => "login_failed",
            AuditEventType::LoginSucceeded => "login_succeeded",
            AuditEventType::AccountLocked => "account_locked",
            AuditEventType::AccountUnlocked => "account_unlocked",
            AuditEventType::RateLimitExceeded => "rate_limit_exceeded",
            AuditEventType::PasswordChanged => "password_changed",
            AuditEventType::PasswordChangeRejected => "password_change_rejected",
            AuditEventType::TwoFactorEnabled => "two_factor_enabled",
            AuditEventType::TwoFactorDisabled => "two_factor_disabled",
            AuditEventType::BackupCodeUsed => "backup_code_used",
            AuditEventType::BackupCodesRegenerated => "backup_codes_regenerated",
            AuditEventType::CsrfValidationFailed => "csrf_validation_failed",
        }
    }
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Info,
    Warning,
    Critical,
}

impl AuditSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditSeverity::Info => "info",
            AuditSeverity::Warning => "warning",
            AuditSeverity::Critical => "critical",
        }
    }
}

/// Information about the request that triggered an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
}

impl RequestContext {
    pub fn new(ip_address: Option<String>, user_agent: Option<String>) -> Self {
        Self {
            ip_address,
            user_agent,
            request_id: Some(uuid::Uuid::new_v4().to_string()),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub severity: AuditSeverity,
    pub actor_id: Option<UserId>,
    pub details: serde_json::Value,
    pub context: RequestContext,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, severity: AuditSeverity) -> Self {
        Self {
            event_type,
            severity,
            actor_id: None,
            details: serde_json::Value::Null,
            context: RequestContext::default(),
            occurred_at: Utc::now(),
        }
    }

    pub fn actor(mut self, actor_id: Option<UserId>) -> Self {
        self.actor_id = actor_id;
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }
}

/// Append-only recorder of security events.
#[async_trait]
pub trait AuditSink: Send + Sync + 'static {
    async fn record(&self, event: AuditEvent) -> Result<(), Error>;
}

/// Record an event, logging instead of propagating sink failures.
pub async fn record_audit(sink: &dyn AuditSink, event: AuditEvent) {
    let event_type = event.event_type;
    if let Err(e) = sink.record(event).await {
        tracing::error!(
            event_type = %event_type,
            error = %e,
            "Failed to record audit event"
        );
    }
}

/// Writes audit events as structured `tracing` events.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), Error> {
        let actor = event.actor_id.as_ref().map(|id| id.to_string());
        match event.severity {
            AuditSeverity::Info => tracing::info!(
                target: "tollgate::audit",
                event_type = %event.event_type,
                actor_id = ?actor,
                ip_address = ?event.context.ip_address,
                request_id = ?event.context.request_id,
                details = %event.details,
                "audit"
            ),
            AuditSeverity::Warning | AuditSeverity::Critical => tracing::warn!(
                target: "tollgate::audit",
                event_type = %event.event_type,
                severity = event.severity.as_str(),
                actor_id = ?actor,
                ip_address = ?event.context.ip_address,
                request_id = ?event.context.request_id,
                details = %event.details,
                "audit"
            ),
        }
        Ok(())
    }
}

/// Keeps events in memory. Useful for tests and local development.
#[derive(Clone, Default)]
pub struct MemoryAuditSink {
    events: Arc<RwLock<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }

    pub async fn events_of(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), Error> {
        self.events.write().await.push(event);
        Ok(())
    }
}
