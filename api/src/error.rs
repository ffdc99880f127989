//! HTTP error mapping

use crate::models::ApiResponse;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use quotagate_core::GatewayError;
use tracing::{error, warn};

/// Errors surfaced by the HTTP layer
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Domain error from the gateway core
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Member call naming somebody else's subject id
    #[error("credential does not belong to this account")]
    NotOwnAccount,
}

impl ApiError {
    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotOwnAccount => StatusCode::FORBIDDEN,
            Self::Gateway(e) => match e {
                GatewayError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
                GatewayError::Unauthorized(_) => StatusCode::FORBIDDEN,
                GatewayError::RateLimited { .. } | GatewayError::QuotaExceeded { .. } => {
                    StatusCode::TOO_MANY_REQUESTS
                }
                GatewayError::InvalidLicense
                | GatewayError::LicenseExpired
                | GatewayError::LicenseAlreadyUsed
                | GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
                GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
                GatewayError::Conflict(_) => StatusCode::CONFLICT,
                GatewayError::TransientStore(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }

    /// Stable code for the error envelope
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotOwnAccount => "NOT_OWN_ACCOUNT",
            Self::Gateway(e) => e.code(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Gateway(GatewayError::Validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Gateway(GatewayError::Validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            // Store internals stay out of responses
            Self::Gateway(GatewayError::TransientStore(detail)) => {
                error!(detail = %detail, "request failed on backing store");
                "service temporarily unavailable".to_string()
            }
            other => {
                if status.is_server_error() {
                    error!(error = %other, "request failed");
                } else {
                    warn!(code = other.code(), error = %other, "request rejected");
                }
                other.to_string()
            }
        };

        let retry_after = match &self {
            Self::Gateway(GatewayError::RateLimited { retry_after_secs }) => Some(*retry_after_secs),
            _ => None,
        };

        let mut response = (status, Json(ApiResponse::<()>::error(self.code(), &message))).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Handler result
pub type ApiResult<T> = Result<T, ApiError>;
