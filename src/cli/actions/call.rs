use crate::{
    notify::{Notifications, Toast},
    session::{
        CredentialSource, HttpCredentialSource, LogNavigator, ResultCache, RpcClient,
        SessionCoordinator,
    },
    token::{peek_claims, Principal},
};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub url: Url,
    pub token_url: Option<Url>,
    pub refresh_token: Option<SecretString>,
    pub procedure: String,
    pub input: Value,
    pub login_path: String,
}

/// Execute the call action and print the result as JSON.
/// # Errors
/// Returns an error if sign-in or the call fails.
pub async fn execute(args: Args) -> Result<()> {
    let token_url = match args.token_url {
        Some(url) => url,
        None => args.url.join("token").context("Invalid server URL")?,
    };
    let credentials = Arc::new(HttpCredentialSource::new(token_url)?);
    let notifications = Arc::new(Notifications::new());
    let session = Arc::new(SessionCoordinator::new(
        credentials.clone(),
        Arc::new(ResultCache::new()),
        notifications.clone(),
        Arc::new(LogNavigator),
        args.login_path,
    ));

    if let Some(refresh_token) = args.refresh_token {
        let principal = sign_in(&credentials, refresh_token).await?;
        debug!(subject = %principal.subject, "Signed in");
        session.login(principal)?;
    }

    let client = RpcClient::new(args.url, session)?;
    let result = client.mutate(&args.procedure, args.input).await;

    for toast in notifications.pending() {
        print_toast(&toast);
    }

    let value = result.with_context(|| format!("Call to {} failed", args.procedure))?;
    println!("{}", serde_json::to_string_pretty(&value)?);

    Ok(())
}

/// Exchange the refresh token once to learn who is signing in.
async fn sign_in(
    credentials: &HttpCredentialSource,
    refresh_token: SecretString,
) -> Result<Principal> {
    credentials.sign_in(refresh_token).await;
    let credential = credentials.refresh(true).await.context("Failed to sign in")?;
    let claims = peek_claims(credential.token.expose_secret())
        .context("Identity provider returned an unreadable token")?;
    Ok(Principal::from(claims))
}

fn print_toast(toast: &Toast) {
    eprintln!("[{:?}] {}", toast.kind, toast.message);
}
