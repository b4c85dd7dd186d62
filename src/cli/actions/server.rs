use crate::{
    api::{self, verifier::JwksVerifier, ContextBuilder, Procedures},
    cli::commands::server::KeysetSource,
    token::Jwks,
};
use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{fs, sync::Arc, time::Duration};
use tracing::{error, info};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub keyset: Option<KeysetSource>,
    pub issuer: Option<String>,
    pub audience: String,
    pub frontend_origin: Option<String>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the key set or DSN is invalid, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let store = args.dsn.as_deref().map(store_pool).transpose()?;

    let builder = match (args.keyset, args.issuer) {
        (Some(keyset), Some(issuer)) => {
            let verifier = verifier(keyset, issuer, args.audience).await?;
            ContextBuilder::new(Arc::new(verifier), store)
        }
        _ => {
            error!("No token key set configured; protected procedures will be unavailable");
            ContextBuilder::uninitialized()
        }
    };

    let frontend_origin = args
        .frontend_origin
        .as_deref()
        .map(api::frontend_origin)
        .transpose()?;

    api::new(
        args.port,
        Arc::new(builder),
        Arc::new(Procedures::with_builtins()),
        frontend_origin,
    )
    .await
}

async fn verifier(keyset: KeysetSource, issuer: String, audience: String) -> Result<JwksVerifier> {
    let keyset_json = match keyset {
        KeysetSource::Url(url) => {
            info!(%url, "Using remote JWKS");
            return JwksVerifier::new_remote(url, issuer, audience).await;
        }
        KeysetSource::Path(path) => {
            fs::read_to_string(&path).with_context(|| format!("Failed to read JWKS file: {path}"))?
        }
        KeysetSource::Inline(json) => json,
    };

    let jwks = Jwks::from_json(&keyset_json).context("Invalid JWKS JSON")?;
    if jwks.is_empty() {
        anyhow::bail!("JWKS contains no keys");
    }
    info!(keys = jwks.keys.len(), "Using static JWKS");
    Ok(JwksVerifier::new(jwks, issuer, audience))
}

/// Lazily connected pool, so the server starts while the store is down and
/// `/health` reports it.
fn store_pool(dsn: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .min_connections(0)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .acquire_timeout(Duration::from_secs(3))
        .test_before_acquire(true)
        .connect_lazy(dsn)
        .context("Invalid document store DSN")
}
