//! Bearer token verification against the identity provider's key set.
//!
//! The key set is the only state shared across concurrent requests. It is
//! read-mostly: cached in memory with a TTL, refreshed when stale, and
//! refreshed early when a token names a `kid` the cache does not know, which
//! is what a provider key rotation looks like. Both kinds of refresh share one
//! cooldown, so a provider outage costs at most one fetch per cooldown.
//! If a refresh fails the last known key set stays in use.

use crate::token::{self, now_unix_seconds, verify_rs256, Claims, Jwks};
use crate::BoxFuture;
use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use std::{
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

const KEYSET_CACHE_TTL_SECONDS: u64 = 300;
const KEYSET_REFRESH_COOLDOWN_SECONDS: u64 = 30;
const KEYSET_FETCH_TIMEOUT_SECONDS: u64 = 5;

/// Classified outcome of a failed verification.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(#[source] token::Error),
    #[error("verification backend unavailable: {0}")]
    Unavailable(String),
}

impl From<token::Error> for VerifyError {
    fn from(err: token::Error) -> Self {
        match err {
            token::Error::Expired => Self::Expired,
            other => Self::Invalid(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyStatus {
    /// Remote key set was fetched successfully.
    Ok,
    /// No usable key set: the remote fetch failed or nothing was configured.
    Error,
    /// Key set was provided at startup; no external dependency.
    Static,
}

impl DependencyStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Static => "static",
        }
    }

    #[must_use]
    pub const fn is_healthy(self) -> bool {
        !matches!(self, Self::Error)
    }
}

/// Public verification contract of the credential source.
pub trait TokenVerifier: Send + Sync {
    /// Verify signature, issuer, audience and expiry; return the claims.
    fn verify<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Claims, VerifyError>>;

    /// Report whether the verifier can currently verify anything.
    fn status(&self) -> BoxFuture<'_, DependencyStatus>;
}

#[derive(Debug)]
enum KeysetSource {
    Static,
    Remote { url: String, client: Client },
}

#[derive(Debug, Clone)]
struct KeysetCache {
    jwks: Jwks,
    fetched_at: Instant,
}

impl KeysetCache {
    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < Duration::from_secs(KEYSET_CACHE_TTL_SECONDS)
    }
}

/// Verifies RS256 session tokens with a cached JWKS.
#[derive(Debug)]
pub struct JwksVerifier {
    source: KeysetSource,
    cache: RwLock<KeysetCache>,
    issuer: String,
    audience: String,
    /// Unix seconds of the last refresh attempt.
    last_refresh_unix: AtomicU64,
    last_refresh_failed: AtomicBool,
}

impl JwksVerifier {
    /// Build from a key set loaded at startup; never refreshed.
    #[must_use]
    pub fn new(jwks: Jwks, issuer: String, audience: String) -> Self {
        Self {
            source: KeysetSource::Static,
            cache: RwLock::new(KeysetCache {
                jwks,
                fetched_at: Instant::now(),
            }),
            issuer,
            audience,
            last_refresh_unix: AtomicU64::new(0),
            last_refresh_failed: AtomicBool::new(false),
        }
    }

    /// Build a verifier that fetches the key set from `url`.
    ///
    /// The startup fetch is best-effort: if the provider is not reachable yet
    /// the verifier starts with an empty, stale cache, reports
    /// [`DependencyStatus::Error`] and fails closed until a refresh succeeds.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid, uses plain http for a
    /// non-loopback host, or the HTTP client cannot be built.
    pub async fn new_remote(url: String, issuer: String, audience: String) -> Result<Self> {
        let parsed = Url::parse(&url).context("Invalid JWKS URL")?;
        if parsed.scheme() != "https" && !is_loopback(&parsed) {
            return Err(anyhow!("JWKS URL must use https: {url}"));
        }

        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(Duration::from_secs(KEYSET_FETCH_TIMEOUT_SECONDS))
            .build()
            .context("Failed to build JWKS HTTP client")?;

        let fetched = fetch_keyset(&client, &url).await;
        let (jwks, fetched_at, last_refresh_unix, failed) = match fetched {
            Ok(jwks) => {
                info!(url = %url, keys = jwks.keys.len(), "loaded JWKS");
                (jwks, Instant::now(), unix_seconds_u64(), false)
            }
            Err(err) => {
                warn!(
                    url = %url,
                    error = %err,
                    "JWKS fetch failed during startup; continuing with empty key set"
                );
                (Jwks::default(), stale_instant(), 0, true)
            }
        };

        Ok(Self {
            source: KeysetSource::Remote { url, client },
            cache: RwLock::new(KeysetCache { jwks, fetched_at }),
            issuer,
            audience,
            last_refresh_unix: AtomicU64::new(last_refresh_unix),
            last_refresh_failed: AtomicBool::new(failed),
        })
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn keyset_url(&self) -> Option<&str> {
        match &self.source {
            KeysetSource::Static => None,
            KeysetSource::Remote { url, .. } => Some(url.as_str()),
        }
    }

    /// Return a key set snapshot, refreshing first if the cache is stale and
    /// the cooldown allows it.
    async fn keyset_snapshot(&self) -> Jwks {
        let (cached, fresh) = {
            let cache = self.cache.read().await;
            (cache.jwks.clone(), cache.is_fresh())
        };

        if fresh || !self.claim_refresh() {
            return cached;
        }

        if let Err(err) = self.refresh_keyset().await {
            warn!(error = %err, "failed to refresh JWKS cache");
            return cached;
        }

        self.cache.read().await.jwks.clone()
    }

    /// Take the refresh slot for this cooldown window. Static key sets never
    /// refresh, and only one concurrent caller wins.
    fn claim_refresh(&self) -> bool {
        if matches!(self.source, KeysetSource::Static) {
            return false;
        }

        let now = unix_seconds_u64();
        let last = self.last_refresh_unix.load(Ordering::Acquire);
        if now.saturating_sub(last) < KEYSET_REFRESH_COOLDOWN_SECONDS {
            return false;
        }

        self.last_refresh_unix
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    async fn refresh_keyset(&self) -> Result<()> {
        let KeysetSource::Remote { url, client } = &self.source else {
            return Ok(());
        };

        let jwks = match fetch_keyset(client, url).await {
            Ok(jwks) => jwks,
            Err(err) => {
                self.last_refresh_failed.store(true, Ordering::Release);
                return Err(err);
            }
        };

        let mut cache = self.cache.write().await;
        cache.jwks = jwks;
        cache.fetched_at = Instant::now();
        self.last_refresh_failed.store(false, Ordering::Release);
        debug!(keys = cache.jwks.keys.len(), "JWKS cache refreshed");
        Ok(())
    }

    /// Refresh after an unknown `kid`, unless a refresh happened within the cooldown.
    async fn refresh_for_unknown_kid(&self) -> bool {
        if !self.claim_refresh() {
            return false;
        }

        match self.refresh_keyset().await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "JWKS refresh after unknown kid failed");
                false
            }
        }
    }

    async fn verify_token(&self, token: &str) -> Result<Claims, VerifyError> {
        let jwks = self.keyset_snapshot().await;
        if jwks.is_empty() {
            return Err(VerifyError::Unavailable("no verification keys loaded".to_string()));
        }

        let now = now_unix_seconds();
        match verify_rs256(token, &jwks, &self.issuer, &self.audience, now) {
            Err(token::Error::UnknownKid(kid)) => {
                if !self.refresh_for_unknown_kid().await {
                    return Err(VerifyError::Invalid(token::Error::UnknownKid(kid)));
                }
                let jwks = self.cache.read().await.jwks.clone();
                Ok(verify_rs256(token, &jwks, &self.issuer, &self.audience, now)?)
            }
            result => Ok(result?),
        }
    }

    /// A remote key set that went stale and could not be refreshed counts as
    /// an error even while the old keys keep verifying.
    async fn dependency_status(&self) -> DependencyStatus {
        let cache = self.cache.read().await;
        if cache.jwks.is_empty() {
            return DependencyStatus::Error;
        }
        match self.source {
            KeysetSource::Static => DependencyStatus::Static,
            KeysetSource::Remote { .. }
                if !cache.is_fresh() && self.last_refresh_failed.load(Ordering::Acquire) =>
            {
                DependencyStatus::Error
            }
            KeysetSource::Remote { .. } => DependencyStatus::Ok,
        }
    }
}

impl TokenVerifier for JwksVerifier {
    fn verify<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Claims, VerifyError>> {
        Box::pin(self.verify_token(token))
    }

    fn status(&self) -> BoxFuture<'_, DependencyStatus> {
        Box::pin(self.dependency_status())
    }
}

async fn fetch_keyset(client: &Client, url: &str) -> Result<Jwks> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to fetch JWKS from {url}"))?
        .error_for_status()
        .with_context(|| format!("JWKS endpoint returned an error: {url}"))?;
    let jwks: Jwks = response.json().await.context("Invalid JWKS JSON")?;
    if jwks.is_empty() {
        return Err(anyhow!("JWKS from {url} contains no keys"));
    }
    Ok(jwks)
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain == "localhost",
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

fn stale_instant() -> Instant {
    let stale = Duration::from_secs(KEYSET_CACHE_TTL_SECONDS + 1);
    Instant::now().checked_sub(stale).unwrap_or_else(Instant::now)
}

fn unix_seconds_u64() -> u64 {
    u64::try_from(now_unix_seconds()).unwrap_or(0)
}
