//! # Tollgate Axum Integration
//!
//! Axum middleware and routes for the tollgate authentication security
//! layer.
//!
//! ## Features
//!
//! - **Rate limiting**: [`rate_limit_guard`] counts requests per client
//!   address and answers `429` with `Retry-After` once the budget is spent.
//!   Clients are keyed by peer address; `X-Forwarded-For` is only honoured
//!   when the state opts in with `trust_forwarded_for(true)`
//! - **CSRF protection**: [`csrf_guard`] requires a single-use token in the
//!   `X-CSRF-Token` header on state-changing requests
//! - **Routes**: `GET /csrf-token` to issue tokens and `GET /health`
//! - **Errors**: [`ApiError`] maps tollgate errors to status codes without
//!   leaking storage details
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use axum::{Router, middleware, routing::post};
//! use tollgate::{RateLimitAction, SecurityConfig, TollgateBuilder};
//! use tollgate_axum::{RateLimitState, SecurityState, create_router, csrf_guard, rate_limit_guard};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tollgate = Arc::new(
//!         TollgateBuilder::new()
//!             .with_sqlite("sqlite://tollgate.db?mode=rwc")
//!             .await?
//!             .with_config(SecurityConfig::from_env()?)
//!             .apply_migrations(true)
//!             .build()
//!             .await?,
//!     );
//!
//!     let app = Router::new()
//!         .route("/login", post(login_handler))
//!         .layer(middleware::from_fn_with_state(
//!             SecurityState::new(tollgate.clone()),
//!             csrf_guard,
//!         ))
//!         .layer(middleware::from_fn_with_state(
//!             RateLimitState::new(tollgate.clone(), RateLimitAction::Login),
//!             rate_limit_guard,
//!         ))
//!         .nest("/security", create_router(tollgate));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(
//!         listener,
//!         app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
//!     )
//!     .await?;
//!     Ok(())
//! }
//!
//! async fn login_handler() -> &'static str {
//!     "ok"
//! }
//! ```

mod error;
mod extractors;
mod middleware;
mod routes;
mod types;

pub use error::{ApiError, Result};
pub use middleware::{CSRF_HEADER, RateLimitState, SecurityState, csrf_guard, rate_limit_guard};
pub use routes::{create_router, csrf_token_handler};
pub use types::{ConnectionInfo, CsrfTokenResponse, ErrorResponse, HealthResponse};
