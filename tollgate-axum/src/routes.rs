use std::sync::Arc;

use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use tollgate::{RepositoryProvider, Tollgate};

use crate::{
    error::Result,
    middleware::SecurityState,
    types::{CsrfTokenResponse, HealthResponse},
};

/// Routes: `GET /csrf-token` and `GET /health`.
pub fn create_router<R>(tollgate: Arc<Tollgate<R>>) -> Router
where
    R: RepositoryProvider + 'static,
{
    let state = SecurityState::new(tollgate);

    Router::new()
        .route("/csrf-token", get(csrf_token_handler::<R>))
        .route("/health", get(health_handler::<R>))
        .with_state(state)
}

/// Issue a fresh CSRF token.
pub async fn csrf_token_handler<R>(State(state): State<SecurityState<R>>) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
{
    let token = state.tollgate.csrf().generate_token()?;
    Ok(Json(CsrfTokenResponse { token }))
}

async fn health_handler<R>(State(state): State<SecurityState<R>>) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
{
    state.tollgate.health_check().await?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}
