use serde::{Deserialize, Serialize};
use tollgate::RequestContext;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsrfTokenResponse {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_minutes: Option<u64>,
}

/// Client address and agent of a request.
///
/// The address is the first `X-Forwarded-For` hop when present, otherwise
/// the peer address from `ConnectInfo`.
#[derive(Debug, Clone, Default)]
pub struct ConnectionInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl From<ConnectionInfo> for RequestContext {
    fn from(info: ConnectionInfo) -> Self {
        RequestContext::new(info.ip, info.user_agent)
    }
}
