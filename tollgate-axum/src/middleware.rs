use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use serde_json::json;
use tollgate::{
    AuditEvent, AuditEventType, AuditSeverity, RateLimitAction, RateLimitConfig,
    RepositoryProvider, RequestContext, Tollgate,
};
use tollgate_core::{audit::record_audit, error::SecurityError};

use crate::{error::ApiError, types::ConnectionInfo};

/// Header carrying the CSRF token on state-changing requests.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Identifier used when the client address is unknown.
const UNKNOWN_CLIENT: &str = "unknown";

pub struct SecurityState<R: RepositoryProvider> {
    pub tollgate: Arc<Tollgate<R>>,
    /// Key clients by the first `X-Forwarded-For` hop instead of the peer
    /// address
    pub trust_forwarded_for: bool,
}

impl<R: RepositoryProvider> SecurityState<R> {
    pub fn new(tollgate: Arc<Tollgate<R>>) -> Self {
        Self {
            tollgate,
            trust_forwarded_for: false,
        }
    }

    /// Only enable behind a proxy that overwrites `X-Forwarded-For`.
    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }
}

impl<R: RepositoryProvider> Clone for SecurityState<R> {
    fn clone(&self) -> Self {
        Self {
            tollgate: self.tollgate.clone(),
            trust_forwarded_for: self.trust_forwarded_for,
        }
    }
}

/// State for [`rate_limit_guard`]: which action the guarded routes count
/// against.
pub struct RateLimitState<R: RepositoryProvider> {
    pub tollgate: Arc<Tollgate<R>>,
    pub action: RateLimitAction,
    /// Overrides the action's built-in limits
    pub config: Option<RateLimitConfig>,
    /// Key clients by the first `X-Forwarded-For` hop instead of the peer
    /// address
    pub trust_forwarded_for: bool,
}

impl<R: RepositoryProvider> RateLimitState<R> {
    pub fn new(tollgate: Arc<Tollgate<R>>, action: RateLimitAction) -> Self {
        Self {
            tollgate,
            action,
            config: None,
            trust_forwarded_for: false,
        }
    }

    pub fn with_config(mut self, config: RateLimitConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Only enable behind a proxy that overwrites `X-Forwarded-For`.
    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }
}

impl<R: RepositoryProvider> Clone for RateLimitState<R> {
    fn clone(&self) -> Self {
        Self {
            tollgate: self.tollgate.clone(),
            action: self.action.clone(),
            config: self.config.clone(),
            trust_forwarded_for: self.trust_forwarded_for,
        }
    }
}

/// Count every request against the client address and reject with `429`
/// once the limit is exceeded.
pub async fn rate_limit_guard<R>(
    State(state): State<RateLimitState<R>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError>
where
    R: RepositoryProvider,
{
    let (connection, request) = connection_info(request, state.trust_forwarded_for).await;
    let client = connection
        .ip
        .clone()
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());

    let status = state
        .tollgate
        .rate_limiter()
        .check(&client, &state.action, state.config.as_ref())
        .await;

    if status.lockout_triggered {
        let event = AuditEvent::new(AuditEventType::RateLimitExceeded, AuditSeverity::Warning)
            .details(json!({
                "identifier": client,
                "action": state.action.as_str(),
                "lockout_expiry": status.lockout_expiry,
            }))
            .context(RequestContext::from(connection));
        record_audit(state.tollgate.audit_sink().as_ref(), event).await;
    }

    status.ensure_allowed()?;
    Ok(next.run(request).await)
}

async fn connection_info(request: Request, trust_forwarded_for: bool) -> (ConnectionInfo, Request) {
    let (mut parts, body) = request.into_parts();
    let connection = ConnectionInfo::from_parts(&mut parts, trust_forwarded_for).await;
    (connection, Request::from_parts(parts, body))
}

fn is_safe(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

/// Require a valid single-use token in `X-CSRF-Token` on unsafe methods.
pub async fn csrf_guard<R>(
    State(state): State<SecurityState<R>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError>
where
    R: RepositoryProvider,
{
    if is_safe(request.method()) {
        return Ok(next.run(request).await);
    }
    let (connection, request) = connection_info(request, state.trust_forwarded_for).await;

    let Some(token) = request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
    else {
        tracing::debug!(method = %request.method(), "Missing CSRF token");
        return Err(SecurityError::InvalidCsrfToken.into());
    };

    let client_id = connection.ip.clone();
    let ctx = RequestContext::from(connection);
    if !state
        .tollgate
        .validate_csrf_token(&token, client_id.as_deref(), &ctx)
        .await
    {
        return Err(SecurityError::InvalidCsrfToken.into());
    }

    Ok(next.run(request).await)
}
