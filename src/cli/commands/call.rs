use crate::session::coordinator::DEFAULT_LOGIN_PATH;
use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use serde_json::Value;
use url::Url;

pub const ARG_URL: &str = "url";
pub const ARG_TOKEN_URL: &str = "token-url";
pub const ARG_REFRESH_TOKEN: &str = "refresh-token";
pub const ARG_PROCEDURE: &str = "procedure";
pub const ARG_INPUT: &str = "input";
pub const ARG_LOGIN_PATH: &str = "login-path";

#[derive(Debug, Clone)]
pub struct Options {
    pub url: Url,
    pub token_url: Option<Url>,
    pub refresh_token: Option<SecretString>,
    pub procedure: String,
    pub input: Value,
    pub login_path: String,
}

impl Options {
    /// Parse call arguments from matches.
    ///
    /// # Errors
    /// Returns an error for invalid URLs or input JSON, or a refresh token
    /// without a token URL.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let url = get_non_empty(ARG_URL).context("missing required argument: --url")?;
        let url = Url::parse(&url).with_context(|| format!("Invalid server URL: {url}"))?;

        let token_url = get_non_empty(ARG_TOKEN_URL)
            .map(|value| Url::parse(&value).with_context(|| format!("Invalid token URL: {value}")))
            .transpose()?;

        let refresh_token = get_non_empty(ARG_REFRESH_TOKEN).map(SecretString::from);
        if refresh_token.is_some() && token_url.is_none() {
            anyhow::bail!("missing required argument: --{ARG_TOKEN_URL}");
        }

        let procedure =
            get_non_empty(ARG_PROCEDURE).context("missing required argument: --procedure")?;

        let input = match get_non_empty(ARG_INPUT) {
            Some(raw) => serde_json::from_str(&raw).context("--input must be valid JSON")?,
            None => Value::Null,
        };

        Ok(Self {
            url,
            token_url,
            refresh_token,
            procedure,
            input,
            login_path: get_non_empty(ARG_LOGIN_PATH)
                .unwrap_or_else(|| DEFAULT_LOGIN_PATH.to_string()),
        })
    }
}

#[must_use]
pub fn command() -> Command {
    Command::new("call")
        .about("Call a procedure as the signed-in user, or anonymously")
        .arg(
            Arg::new(ARG_PROCEDURE)
                .short('P')
                .long(ARG_PROCEDURE)
                .help("Procedure name, e.g. session.whoami")
                .required(true),
        )
        .arg(
            Arg::new(ARG_URL)
                .short('u')
                .long(ARG_URL)
                .help("Server base URL")
                .default_value("http://localhost:8080")
                .env("ALIRO_URL"),
        )
        .arg(
            Arg::new(ARG_TOKEN_URL)
                .long(ARG_TOKEN_URL)
                .help("Identity provider token endpoint")
                .env("ALIRO_TOKEN_URL"),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN)
                .long(ARG_REFRESH_TOKEN)
                .help("Refresh token used to mint session tokens")
                .env("ALIRO_REFRESH_TOKEN")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_INPUT)
                .short('i')
                .long(ARG_INPUT)
                .help("Procedure input as JSON (default: null)"),
        )
        .arg(
            Arg::new(ARG_LOGIN_PATH)
                .long(ARG_LOGIN_PATH)
                .help("Login surface to redirect to when the session expires")
                .default_value(DEFAULT_LOGIN_PATH)
                .env("ALIRO_LOGIN_PATH"),
        )
}
