//! Client-side credential source: holds the refresh credential and mints
//! short-lived session tokens on demand.

use crate::BoxFuture;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use url::Url;

const REQUEST_TIMEOUT_SECONDS: u64 = 10;
/// Cached tokens this close to expiry are refreshed even without `force`.
const EXPIRY_SKEW_SECONDS: u64 = 30;

/// A signed session token with its expiry, if known.
#[derive(Debug, Clone)]
pub struct Credential {
    pub token: SecretString,
    pub expires_at: Option<SystemTime>,
}

impl Credential {
    #[must_use]
    pub fn new(token: impl Into<String>, expires_at: Option<SystemTime>) -> Self {
        Self {
            token: SecretString::from(token.into()),
            expires_at,
        }
    }

    /// Whether the token expires within `skew` of `now`.
    #[must_use]
    pub fn expires_within(&self, now: SystemTime, skew: Duration) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= now + skew)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("identity provider unreachable: {0}")]
    Unreachable(String),
    #[error("session revoked by identity provider")]
    Revoked,
    #[error("not signed in")]
    NotSignedIn,
    #[error("failed to decode token response: {0}")]
    Decode(String),
}

/// Source of session tokens for outgoing calls.
pub trait CredentialSource: Send + Sync {
    /// Return a token, minting a new one when `force` is set or the cached
    /// one is about to expire.
    fn refresh(&self, force: bool) -> BoxFuture<'_, Result<Credential, CredentialError>>;

    /// Drop every locally cached credential.
    fn clear(&self) -> BoxFuture<'_, ()>;
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Exchanges a refresh token for session tokens at an HTTP token endpoint.
///
/// `POST <token_url>` with `{"refresh_token": "..."}`; the provider answers
/// `{"token": "...", "expires_in": <seconds>}`. `401`/`403` mean the session
/// was revoked.
#[derive(Debug)]
pub struct HttpCredentialSource {
    token_url: Url,
    client: Client,
    refresh_token: RwLock<Option<SecretString>>,
    cached: RwLock<Option<Credential>>,
}

impl HttpCredentialSource {
    /// # Errors
    /// Return error if the HTTP client cannot be built
    pub fn new(token_url: Url) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()?;
        Ok(Self {
            token_url,
            client,
            refresh_token: RwLock::new(None),
            cached: RwLock::new(None),
        })
    }

    /// Store the refresh credential obtained at login.
    pub async fn sign_in(&self, refresh_token: SecretString) {
        *self.refresh_token.write().await = Some(refresh_token);
        *self.cached.write().await = None;
    }

    pub async fn is_signed_in(&self) -> bool {
        self.refresh_token.read().await.is_some()
    }

    #[instrument(skip(self), fields(token_url = %self.token_url))]
    async fn refresh_credential(&self, force: bool) -> Result<Credential, CredentialError> {
        if !force {
            if let Some(cached) = self.cached.read().await.as_ref() {
                let skew = Duration::from_secs(EXPIRY_SKEW_SECONDS);
                if !cached.expires_within(SystemTime::now(), skew) {
                    return Ok(cached.clone());
                }
            }
        }

        let refresh_token = self
            .refresh_token
            .read()
            .await
            .clone()
            .ok_or(CredentialError::NotSignedIn)?;

        let response = self
            .client
            .post(self.token_url.clone())
            .json(&RefreshRequest {
                refresh_token: refresh_token.expose_secret(),
            })
            .send()
            .await
            .map_err(|err| CredentialError::Unreachable(err.to_string()))?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(CredentialError::Revoked)
            }
            status => {
                return Err(CredentialError::Unreachable(format!(
                    "token endpoint returned {status}"
                )))
            }
        }

        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|err| CredentialError::Decode(err.to_string()))?;

        let expires_at = body
            .expires_in
            .map(|seconds| SystemTime::now() + Duration::from_secs(seconds));
        let credential = Credential::new(body.token, expires_at);
        *self.cached.write().await = Some(credential.clone());

        debug!("Session token refreshed");
        Ok(credential)
    }
}

impl CredentialSource for HttpCredentialSource {
    fn refresh(&self, force: bool) -> BoxFuture<'_, Result<Credential, CredentialError>> {
        Box::pin(self.refresh_credential(force))
    }

    fn clear(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            *self.cached.write().await = None;
            *self.refresh_token.write().await = None;
            debug!("Local credentials cleared");
        })
    }
}
