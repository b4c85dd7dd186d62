use super::context::AuthFailure;
use crate::wire::{
    ErrorBody, ErrorCode, RpcFailure, UnauthorizedReason, AUTHENTICATION_REQUIRED_MESSAGE,
    SERVICE_UNAVAILABLE_MESSAGE, SESSION_EXPIRED_MESSAGE,
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// Failure returned by a procedure or by the endpoint around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
    pub reason: Option<UnauthorizedReason>,
}

impl RpcError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            reason: None,
        }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Internal failures never leak their cause; log it before building this.
    #[must_use]
    pub fn internal() -> Self {
        Self::new(ErrorCode::InternalServerError, "internal server error")
    }

    #[must_use]
    pub fn expired() -> Self {
        Self {
            reason: Some(UnauthorizedReason::Expired),
            ..Self::new(ErrorCode::Unauthorized, SESSION_EXPIRED_MESSAGE)
        }
    }

    #[must_use]
    pub fn unauthenticated() -> Self {
        Self {
            reason: Some(UnauthorizedReason::Unauthenticated),
            ..Self::new(ErrorCode::Unauthorized, AUTHENTICATION_REQUIRED_MESSAGE)
        }
    }

    #[must_use]
    pub fn service_unavailable() -> Self {
        Self::new(ErrorCode::ServiceUnavailable, SERVICE_UNAVAILABLE_MESSAGE)
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

impl From<AuthFailure> for RpcError {
    fn from(failure: AuthFailure) -> Self {
        match failure {
            AuthFailure::Expired => Self::expired(),
            AuthFailure::ServiceUnavailable => Self::service_unavailable(),
            AuthFailure::Invalid | AuthFailure::Absent => Self::unauthenticated(),
        }
    }
}

impl From<RpcError> for RpcFailure {
    fn from(err: RpcError) -> Self {
        Self {
            error: ErrorBody {
                code: err.code,
                message: err.message,
                reason: err.reason,
            },
        }
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(RpcFailure::from(self))).into_response()
    }
}
