use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    body::{Body, to_bytes},
    extract::ConnectInfo,
    http::{Request, StatusCode, header},
    middleware,
    routing::post,
};
use sqlx::sqlite::SqlitePoolOptions;
use tollgate::{
    AuditEventType, MemoryAuditSink, RateLimitAction, SecurityConfig, SqliteRepositoryProvider,
    Tollgate, TollgateBuilder,
};
use tollgate_axum::{
    CSRF_HEADER, CsrfTokenResponse, ErrorResponse, HealthResponse, RateLimitState, SecurityState,
    create_router, csrf_guard, rate_limit_guard,
};
use tower::ServiceExt;

async fn tollgate() -> (Arc<Tollgate<SqliteRepositoryProvider>>, Arc<MemoryAuditSink>) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let audit = Arc::new(MemoryAuditSink::new());
    let tollgate = TollgateBuilder::new()
        .with_audit_sink(audit.clone())
        .with_sqlite_pool(pool)
        .with_config(SecurityConfig::new(b"http-test-secret".to_vec()))
        .apply_migrations(true)
        .build()
        .await
        .unwrap();
    (Arc::new(tollgate), audit)
}

/// Router behind a proxy that sets `X-Forwarded-For`.
fn app(tollgate: Arc<Tollgate<SqliteRepositoryProvider>>) -> Router {
    app_with(tollgate, true)
}

fn app_with(tollgate: Arc<Tollgate<SqliteRepositoryProvider>>, trust_forwarded_for: bool) -> Router {
    Router::new()
        .route("/login", post(|| async { "ok" }))
        .layer(middleware::from_fn_with_state(
            SecurityState::new(tollgate.clone()).trust_forwarded_for(trust_forwarded_for),
            csrf_guard,
        ))
        .layer(middleware::from_fn_with_state(
            RateLimitState::new(tollgate.clone(), RateLimitAction::Login)
                .trust_forwarded_for(trust_forwarded_for),
            rate_limit_guard,
        ))
        .merge(create_router(tollgate))
}

fn login(ip: &str, token: Option<&str>) -> Request<Body> {
    let peer: SocketAddr = "192.0.2.50:40000".parse().unwrap();
    let mut builder = Request::builder()
        .method("POST")
        .uri("/login")
        .header("x-forwarded-for", ip)
        .extension(ConnectInfo(peer));
    if let Some(token) = token {
        builder = builder.header(CSRF_HEADER, token);
    }
    builder.body(Body::empty()).unwrap()
}

async fn fetch_token(app: &Router) -> String {
    let response = app
        .clone()
        .oneshot(Request::get("/csrf-token").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: CsrfTokenResponse = serde_json::from_slice(&bytes).unwrap();
    body.token
}

#[tokio::test]
async fn test_csrf_token_endpoint_issues_distinct_tokens() {
    let (tollgate, _) = tollgate().await;
    let app = app(tollgate.clone());

    let first = fetch_token(&app).await;
    let second = fetch_token(&app).await;
    assert_ne!(first, second);
    assert!(tollgate.csrf().validate_token(&first, None).await);
}

#[tokio::test]
async fn test_health() {
    let (tollgate, _) = tollgate().await;
    let response = app(tollgate)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: HealthResponse = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body.status, "healthy");
}

#[tokio::test]
async fn test_csrf_guard() {
    let (tollgate, audit) = tollgate().await;
    let app = app(tollgate);

    let response = app.clone().oneshot(login("203.0.113.1", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let token = fetch_token(&app).await;
    let response = app
        .clone()
        .oneshot(login("203.0.113.1", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // replay
    let response = app
        .clone()
        .oneshot(login("203.0.113.1", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let failed = audit.events_of(AuditEventType::CsrfValidationFailed).await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].context.ip_address.as_deref(), Some("203.0.113.1"));
}

#[tokio::test]
async fn test_rate_limit_guard_returns_retry_after() {
    let (tollgate, audit) = tollgate().await;
    let app = app(tollgate);

    for _ in 0..5 {
        let token = fetch_token(&app).await;
        let response = app
            .clone()
            .oneshot(login("203.0.113.9", Some(&token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let token = fetch_token(&app).await;
    let response = app
        .clone()
        .oneshot(login("203.0.113.9", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry: u64 = response
        .headers()
        .get(header::RETRY_AFTER)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry > 29 * 60 && retry <= 30 * 60);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body.code, 429);
    assert_eq!(body.retry_after_minutes, Some(30));

    let exceeded = audit.events_of(AuditEventType::RateLimitExceeded).await;
    assert_eq!(exceeded.len(), 1);
    assert_eq!(exceeded[0].details["identifier"], "203.0.113.9");

    // other clients keep their own budget
    let token = fetch_token(&app).await;
    let response = app
        .oneshot(login("198.51.100.20", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_untrusted_forwarded_for_cannot_dodge_rate_limit() {
    let (tollgate, audit) = tollgate().await;
    let app = app_with(tollgate, false);

    let mut statuses = Vec::new();
    for i in 0..8 {
        let token = fetch_token(&app).await;
        let response = app
            .clone()
            .oneshot(login(&format!("10.9.9.{i}"), Some(&token)))
            .await
            .unwrap();
        statuses.push(response.status());
    }
    assert_eq!(
        statuses.iter().filter(|s| **s == StatusCode::OK).count(),
        5,
        "{statuses:?}"
    );
    assert_eq!(statuses[5], StatusCode::TOO_MANY_REQUESTS);

    // every request counted against the peer address
    let exceeded = audit.events_of(AuditEventType::RateLimitExceeded).await;
    assert_eq!(exceeded.len(), 1);
    assert_eq!(exceeded[0].details["identifier"], "192.0.2.50");
}
