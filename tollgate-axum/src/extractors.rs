use std::{convert::Infallible, net::SocketAddr};

use axum::{
    RequestPartsExt,
    extract::{ConnectInfo, FromRequestParts},
    http::request::Parts,
};
use axum_extra::{TypedHeader, headers::UserAgent};

use crate::types::ConnectionInfo;

const FORWARDED_FOR: &str = "x-forwarded-for";

impl ConnectionInfo {
    /// Read the client address and agent from request parts.
    ///
    /// The address is the peer address from `ConnectInfo`. The first
    /// `X-Forwarded-For` hop replaces it only when `trust_forwarded_for` is
    /// set, which is only safe behind a proxy that overwrites the header.
    pub async fn from_parts(parts: &mut Parts, trust_forwarded_for: bool) -> Self {
        let user_agent = parts
            .extract::<Option<TypedHeader<UserAgent>>>()
            .await
            .ok()
            .flatten()
            .map(|ua| ua.to_string());

        let forwarded = trust_forwarded_for
            .then(|| {
                parts
                    .headers
                    .get(FORWARDED_FOR)
                    .and_then(|header| header.to_str().ok())
                    .and_then(|header| header.split(',').next())
                    .map(str::trim)
                    .filter(|ip| !ip.is_empty())
                    .map(str::to_string)
            })
            .flatten();

        let ip = match forwarded {
            Some(ip) => Some(ip),
            None => parts
                .extract::<ConnectInfo<SocketAddr>>()
                .await
                .ok()
                .map(|addr| addr.ip().to_string()),
        };

        ConnectionInfo { ip, user_agent }
    }
}

/// Extracts the peer address only; forwarded headers are ignored.
impl<S> FromRequestParts<S> for ConnectionInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts, false).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn request_parts(peer: Option<&str>) -> Parts {
        let mut builder = Request::builder()
            .uri("/login")
            .header(FORWARDED_FOR, "203.0.113.7, 10.0.0.1")
            .header("user-agent", "curl/8");
        if let Some(peer) = peer {
            let addr: SocketAddr = peer.parse().unwrap();
            builder = builder.extension(ConnectInfo(addr));
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_forwarded_for_ignored_by_default() {
        let mut parts = request_parts(Some("198.51.100.3:5000"));
        let info = ConnectionInfo::from_parts(&mut parts, false).await;
        assert_eq!(info.ip.as_deref(), Some("198.51.100.3"));
        assert_eq!(info.user_agent.as_deref(), Some("curl/8"));

        let mut parts = request_parts(None);
        let info = ConnectionInfo::from_parts(&mut parts, false).await;
        assert_eq!(info.ip, None);
    }

    #[tokio::test]
    async fn test_forwarded_for_used_when_trusted() {
        let mut parts = request_parts(Some("198.51.100.3:5000"));
        let info = ConnectionInfo::from_parts(&mut parts, true).await;
        assert_eq!(info.ip.as_deref(), Some("203.0.113.7"));
    }
}
