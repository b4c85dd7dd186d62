//! RPC client with result caching and coordinated session handling.
//!
//! Each call runs the [`TokenAttacher`] first and remembers the session epoch
//! it was sent under. Responses that come back after the epoch moved are
//! discarded as stale: they are never cached and cannot trigger a second
//! logout.

use super::{attacher::TokenAttacher, cache::ResultCache, coordinator::SessionCoordinator};
use crate::{
    notify::{Notifications, ToastKind},
    wire::{procedure_path, ErrorCode, RpcFailure, RpcSuccess, UnauthorizedReason},
};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

pub const SERVICE_UNAVAILABLE_TOAST: &str =
    "Service is temporarily unavailable. Please try again later.";

const REQUEST_TIMEOUT_SECONDS: u64 = 15;
const MAX_ERROR_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("unauthorized: {message}")]
    Unauthorized {
        reason: Option<UnauthorizedReason>,
        message: String,
    },
    #[error("service unavailable")]
    ServiceUnavailable,
    #[error("{code:?}: {message}")]
    Rpc { code: ErrorCode, message: String },
    #[error("request failed ({status}): {message}")]
    Http { status: u16, message: String },
    #[error("unable to reach the server: {0}")]
    Network(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("response discarded; session changed while the call was in flight")]
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Query,
    Mutation,
}

#[derive(Debug)]
pub struct RpcClient {
    base_url: Url,
    http: Client,
    attacher: TokenAttacher,
    session: Arc<SessionCoordinator>,
    cache: Arc<ResultCache>,
    notifications: Arc<Notifications>,
}

impl RpcClient {
    /// # Errors
    /// Return error if the HTTP client cannot be built
    pub fn new(mut base_url: Url, session: Arc<SessionCoordinator>) -> anyhow::Result<Self> {
        // Procedure paths are joined relative to the base.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()?;
        Ok(Self {
            base_url,
            http,
            attacher: TokenAttacher::new(session.clone(), session.credentials()),
            cache: session.cache(),
            notifications: session.notifications(),
            session,
        })
    }

    #[must_use]
    pub fn session(&self) -> &Arc<SessionCoordinator> {
        &self.session
    }

    /// Call a read-only procedure, serving repeated calls from the cache.
    ///
    /// # Errors
    /// See [`ClientError`].
    pub async fn query(&self, procedure: &str, input: Value) -> Result<Value, ClientError> {
        if let Some(hit) = self.cache.get(procedure, &input, self.session.epoch()) {
            debug!(procedure, "Cache hit");
            return Ok(hit);
        }
        self.call(procedure, input, Mode::Query).await
    }

    /// Call a procedure with side effects; never cached.
    ///
    /// # Errors
    /// See [`ClientError`].
    pub async fn mutate(&self, procedure: &str, input: Value) -> Result<Value, ClientError> {
        self.call(procedure, input, Mode::Mutation).await
    }

    #[instrument(skip(self, input))]
    async fn call(&self, procedure: &str, input: Value, mode: Mode) -> Result<Value, ClientError> {
        let attachment = self.attacher.attach().await;

        let url = self
            .base_url
            .join(procedure_path(procedure).trim_start_matches('/'))
            .map_err(|err| ClientError::Network(format!("invalid procedure URL: {err}")))?;

        let request = TokenAttacher::apply(self.http.post(url).json(&input), &attachment);
        let response = request.send().await;

        if self.session.epoch() != attachment.epoch {
            debug!(sent = attachment.epoch, "Discarding response from an older session");
            return Err(ClientError::Stale);
        }

        let response = response.map_err(|err| ClientError::Network(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ClientError::Network(err.to_string()))?;

        if status.is_success() {
            let success: RpcSuccess =
                serde_json::from_str(&body).map_err(|err| ClientError::Decode(err.to_string()))?;
            if mode == Mode::Query && self.session.epoch() == attachment.epoch {
                self.cache
                    .put(procedure, &input, attachment.epoch, success.result.clone());
            }
            return Ok(success.result);
        }

        let Ok(failure) = serde_json::from_str::<RpcFailure>(&body) else {
            return Err(self.http_failure(status, &body));
        };

        match failure.error.code {
            ErrorCode::Unauthorized => {
                let handled = self.session.handle_unauthorized(attachment.epoch).await;
                debug!(handled, reason = ?failure.error.reason, "Unauthorized response");
                Err(ClientError::Unauthorized {
                    reason: failure.error.reason,
                    message: sanitize_body(&failure.error.message),
                })
            }
            ErrorCode::ServiceUnavailable => Err(self.service_unavailable()),
            code => Err(ClientError::Rpc {
                code,
                message: sanitize_body(&failure.error.message),
            }),
        }
    }

    fn service_unavailable(&self) -> ClientError {
        warn!("Service unavailable");
        self.notifications
            .enqueue(ToastKind::Error, SERVICE_UNAVAILABLE_TOAST);
        ClientError::ServiceUnavailable
    }

    fn http_failure(&self, status: StatusCode, body: &str) -> ClientError {
        if status == StatusCode::SERVICE_UNAVAILABLE {
            return self.service_unavailable();
        }
        ClientError::Http {
            status: status.as_u16(),
            message: sanitize_body(body),
        }
    }
}

/// Trim and truncate error text before it reaches a user.
fn sanitize_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "Request failed.".to_string()
    } else {
        trimmed.chars().take(MAX_ERROR_CHARS).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_trims_and_truncates() {
        assert_eq!(sanitize_body("   "), "Request failed.");
        assert_eq!(sanitize_body("  boom \n"), "boom");
        assert_eq!(sanitize_body(&"x".repeat(500)).len(), MAX_ERROR_CHARS);
    }

    #[test]
    fn error_messages() {
        assert_eq!(
            ClientError::Http {
                status: 502,
                message: "bad gateway".to_string()
            }
            .to_string(),
            "request failed (502): bad gateway"
        );
        assert_eq!(ClientError::ServiceUnavailable.to_string(), "service unavailable");
    }
}
