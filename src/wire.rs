//! JSON envelope shared by the RPC endpoint and the RPC client.
//!
//! Success: `{"result": <json>}`. Failure: `{"error": {"code", "message", "reason"?}}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Path prefix procedures are mounted under.
pub const RPC_PATH_PREFIX: &str = "/rpc";

pub const SESSION_EXPIRED_MESSAGE: &str = "session expired, please log in again";
pub const AUTHENTICATION_REQUIRED_MESSAGE: &str = "authentication required";
pub const SERVICE_UNAVAILABLE_MESSAGE: &str = "service unavailable";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    NotFound,
    InternalServerError,
    ServiceUnavailable,
}

impl ErrorCode {
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::NotFound => 404,
            Self::InternalServerError => 500,
            Self::ServiceUnavailable => 503,
        }
    }
}

/// Why a call was rejected with `UNAUTHORIZED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UnauthorizedReason {
    /// The bearer token verified but is past its expiry.
    Expired,
    /// A protected procedure was called without a verified principal.
    Unauthenticated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<UnauthorizedReason>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RpcSuccess {
    #[schema(value_type = Object)]
    pub result: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RpcFailure {
    pub error: ErrorBody,
}

/// Build the request path for a procedure.
#[must_use]
pub fn procedure_path(procedure: &str) -> String {
    format!("{RPC_PATH_PREFIX}/{procedure}")
}
