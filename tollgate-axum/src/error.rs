use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tollgate::Error;
use tollgate_core::error::{SecurityError, TwoFactorError, ValidationError};

use crate::types::ErrorResponse;

/// HTTP face of a [`tollgate::Error`].
///
/// | Error                                   | Status |
/// | --------------------------------------- | ------ |
/// | too many requests                       | 429    |
/// | account locked                          | 423    |
/// | invalid CSRF token                      | 403    |
/// | invalid TOTP or backup code             | 401    |
/// | other two-factor state errors           | 400    |
/// | weak or reused password                 | 422    |
/// | other validation errors                 | 400    |
/// | storage failures                        | 503    |
/// | anything else                           | 500    |
///
/// Rejections that carry a wait time also set `Retry-After`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] Error),
}

impl From<SecurityError> for ApiError {
    fn from(err: SecurityError) -> Self {
        ApiError::Core(err.into())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Core(err) => match err {
                Error::Security(SecurityError::TooManyRequests { .. }) => {
                    StatusCode::TOO_MANY_REQUESTS
                }
                Error::Security(SecurityError::AccountLocked { .. }) => StatusCode::LOCKED,
                Error::Security(SecurityError::InvalidCsrfToken) => StatusCode::FORBIDDEN,
                Error::TwoFactor(
                    TwoFactorError::InvalidCode | TwoFactorError::InvalidTokenOrBackupCode,
                ) => StatusCode::UNAUTHORIZED,
                Error::TwoFactor(_) => StatusCode::BAD_REQUEST,
                Error::Validation(
                    ValidationError::WeakPassword(_) | ValidationError::PasswordReused,
                ) => StatusCode::UNPROCESSABLE_ENTITY,
                Error::Validation(_) => StatusCode::BAD_REQUEST,
                Error::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
                Error::Crypto(_) | Error::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Core(Error::Security(err)) => err.to_string(),
            ApiError::Core(Error::TwoFactor(err)) => err.to_string(),
            ApiError::Core(Error::Validation(err)) => err.to_string(),
            ApiError::Core(Error::Storage(_)) => {
                "Service temporarily unavailable".to_string()
            }
            ApiError::Core(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let ApiError::Core(err) = &self;
        let retry_after_seconds = err.retry_after_seconds();

        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let body = Json(ErrorResponse {
            error: self.message(),
            code: status.as_u16(),
            retry_after_seconds,
            retry_after_minutes: retry_after_seconds.map(|seconds| seconds.div_ceil(60)),
        });

        let mut response = (status, body).into_response();
        if let Some(seconds) = retry_after_seconds {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
