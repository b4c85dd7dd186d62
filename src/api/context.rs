//! Per-request context building.
//!
//! Flow Overview: read the `Authorization` header, verify the bearer token,
//! and classify the outcome. Only an expired token and an unavailable backend
//! fail the call; a missing or invalid token degrades to an anonymous context
//! so public procedures keep working for signed-out or misconfigured clients.

use super::verifier::{DependencyStatus, TokenVerifier, VerifyError};
use crate::token::Principal;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Access level of a procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Protected,
}

/// Classification of a verification failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthFailure {
    /// Token verified but is past its expiry; the client must log in again.
    #[error("session expired")]
    Expired,
    /// Malformed token, bad signature, unknown key or foreign issuer/audience.
    #[error("invalid bearer token")]
    Invalid,
    /// No usable `Authorization: Bearer` header.
    #[error("no bearer token")]
    Absent,
    /// Verification backend is not initialized or cannot verify anything.
    #[error("verification service unavailable")]
    ServiceUnavailable,
}

impl AuthFailure {
    /// Whether this classification fails the call instead of degrading to anonymous.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::Expired | Self::ServiceUnavailable)
    }
}

/// Identity and backend handles for one inbound call.
#[derive(Debug)]
pub struct RequestContext {
    principal: Option<Principal>,
    store: Option<PgPool>,
    store_ready: bool,
    request_id: Option<String>,
    anonymous_reason: Option<AuthFailure>,
}

impl RequestContext {
    fn anonymous(
        store: Option<PgPool>,
        request_id: Option<String>,
        reason: AuthFailure,
    ) -> Self {
        let store_ready = store.is_some();
        Self {
            principal: None,
            store,
            store_ready,
            request_id,
            anonymous_reason: Some(reason),
        }
    }

    fn authenticated(
        principal: Principal,
        store: Option<PgPool>,
        request_id: Option<String>,
    ) -> Self {
        let store_ready = store.is_some();
        Self {
            principal: Some(principal),
            store,
            store_ready,
            request_id,
            anonymous_reason: None,
        }
    }

    /// Verified identity, `None` for anonymous calls.
    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }

    /// Document store handle, `None` when the backend is unavailable.
    #[must_use]
    pub fn store(&self) -> Option<&PgPool> {
        self.store.as_ref()
    }

    #[must_use]
    pub fn store_ready(&self) -> bool {
        self.store_ready
    }

    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Why the context is anonymous (`Absent`, `Invalid` or `ServiceUnavailable`).
    #[must_use]
    pub fn anonymous_reason(&self) -> Option<AuthFailure> {
        self.anonymous_reason
    }
}

/// Verification backend and the store it fronts.
#[derive(Clone)]
struct Backend {
    verifier: Arc<dyn TokenVerifier>,
    store: Option<PgPool>,
}

/// Builds one [`RequestContext`] per inbound call.
///
/// Cheap to share: clone the `Arc` it is served behind, never the builder.
#[derive(Clone)]
pub struct ContextBuilder {
    backend: Option<Backend>,
}

impl std::fmt::Debug for ContextBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextBuilder")
            .field("initialized", &self.is_initialized())
            .field("store", &self.store().is_some())
            .finish()
    }
}

impl ContextBuilder {
    #[must_use]
    pub fn new(verifier: Arc<dyn TokenVerifier>, store: Option<PgPool>) -> Self {
        Self {
            backend: Some(Backend { verifier, store }),
        }
    }

    /// A builder with no verification backend; every protected call fails
    /// with [`AuthFailure::ServiceUnavailable`].
    #[must_use]
    pub fn uninitialized() -> Self {
        Self { backend: None }
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.backend.is_some()
    }

    #[must_use]
    pub fn store(&self) -> Option<&PgPool> {
        self.backend.as_ref().and_then(|backend| backend.store.as_ref())
    }

    /// Verifier health, `None` when no backend is configured.
    pub async fn verifier_status(&self) -> Option<DependencyStatus> {
        match &self.backend {
            Some(backend) => Some(backend.verifier.status().await),
            None => None,
        }
    }

    /// Extract, verify and classify the bearer token of one call.
    ///
    /// # Errors
    /// - [`AuthFailure::Expired`] for an expired token, regardless of `access`;
    /// - [`AuthFailure::ServiceUnavailable`] for protected calls when the
    ///   backend is missing or cannot verify.
    #[instrument(skip_all, fields(access = ?access))]
    pub async fn build(
        &self,
        headers: &HeaderMap,
        access: Access,
    ) -> Result<RequestContext, AuthFailure> {
        let request_id = headers
            .get("x-request-id")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let Some(backend) = &self.backend else {
            error!("token verification backend is not initialized; check deployment configuration");
            return unavailable(access, None, request_id);
        };

        let Some(token) = extract_bearer_token(headers) else {
            debug!("no bearer token; anonymous context");
            return Ok(RequestContext::anonymous(
                backend.store.clone(),
                request_id,
                AuthFailure::Absent,
            ));
        };

        match backend.verifier.verify(&token).await {
            Ok(claims) => {
                let principal = Principal::from(claims);
                debug!(subject = %principal.subject, "bearer token verified");
                Ok(RequestContext::authenticated(
                    principal,
                    backend.store.clone(),
                    request_id,
                ))
            }
            Err(VerifyError::Expired) => {
                info!("bearer token expired");
                Err(AuthFailure::Expired)
            }
            Err(VerifyError::Invalid(err)) => {
                warn!(error = %err, "invalid bearer token; continuing anonymously");
                Ok(RequestContext::anonymous(
                    backend.store.clone(),
                    request_id,
                    AuthFailure::Invalid,
                ))
            }
            Err(VerifyError::Unavailable(reason)) => {
                error!(%reason, "token verification backend unavailable; check deployment configuration");
                unavailable(access, backend.store.clone(), request_id)
            }
        }
    }
}

fn unavailable(
    access: Access,
    store: Option<PgPool>,
    request_id: Option<String>,
) -> Result<RequestContext, AuthFailure> {
    match access {
        Access::Protected => Err(AuthFailure::ServiceUnavailable),
        Access::Public => Ok(RequestContext::anonymous(
            store,
            request_id,
            AuthFailure::ServiceUnavailable,
        )),
    }
}

/// Return the bearer payload of the `Authorization` header.
///
/// Missing headers, other schemes, non-ASCII values and empty payloads all
/// read as "no token".
pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
