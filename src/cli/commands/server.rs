use clap::{Arg, ArgGroup, ArgMatches, Command};

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";
pub const ARG_JWKS_URL: &str = "jwks-url";
pub const ARG_JWKS_PATH: &str = "jwks-path";
pub const ARG_JWKS: &str = "jwks";
pub const ARG_ISSUER: &str = "issuer";
pub const ARG_AUDIENCE: &str = "audience";
pub const ARG_FRONTEND_ORIGIN: &str = "frontend-origin";

pub const DEFAULT_AUDIENCE: &str = "aliro";

/// Where the token verification key set comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeysetSource {
    Url(String),
    Path(String),
    Inline(String),
}

#[derive(Debug, Clone)]
pub struct Options {
    pub port: u16,
    pub dsn: Option<String>,
    pub keyset: Option<KeysetSource>,
    pub issuer: Option<String>,
    pub audience: String,
    pub frontend_origin: Option<String>,
}

impl Options {
    /// Parse server arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a key set is configured without an issuer.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        // clap passes through empty env vars
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let keyset = get_non_empty(ARG_JWKS_URL)
            .map(KeysetSource::Url)
            .or_else(|| get_non_empty(ARG_JWKS_PATH).map(KeysetSource::Path))
            .or_else(|| get_non_empty(ARG_JWKS).map(KeysetSource::Inline));

        let issuer = get_non_empty(ARG_ISSUER);
        if keyset.is_some() && issuer.is_none() {
            anyhow::bail!("missing required argument: --{ARG_ISSUER}");
        }

        Ok(Self {
            port: matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080),
            dsn: get_non_empty(ARG_DSN),
            keyset,
            issuer,
            audience: get_non_empty(ARG_AUDIENCE).unwrap_or_else(|| DEFAULT_AUDIENCE.to_string()),
            frontend_origin: get_non_empty(ARG_FRONTEND_ORIGIN),
        })
    }
}

#[must_use]
pub fn command() -> Command {
    Command::new("server")
        .about("Serve the RPC endpoint")
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("ALIRO_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Document store connection string")
                .long_help(
                    "Document store (PostgreSQL) connection string. Optional: without it, procedures run without a store and /health reports it as static.",
                )
                .env("ALIRO_DSN"),
        )
        .arg(
            Arg::new(ARG_JWKS_URL)
                .long(ARG_JWKS_URL)
                .help("JWKS URL of the identity provider")
                .long_help(
                    "JWKS URL used to verify session tokens.\n\nThe key set is cached (TTL ~5 minutes) and refreshed on unknown `kid` with a cooldown. Verification\nitself is local and does not call the identity provider per request.",
                )
                .env("ALIRO_JWKS_URL"),
        )
        .arg(
            Arg::new(ARG_JWKS_PATH)
                .long(ARG_JWKS_PATH)
                .help("Path to a JWKS file")
                .env("ALIRO_JWKS_PATH"),
        )
        .arg(
            Arg::new(ARG_JWKS)
                .long(ARG_JWKS)
                .help("Inline JWKS JSON")
                .env("ALIRO_JWKS"),
        )
        .group(
            ArgGroup::new("keyset")
                .args([ARG_JWKS_URL, ARG_JWKS_PATH, ARG_JWKS])
                .multiple(false),
        )
        .arg(
            Arg::new(ARG_ISSUER)
                .long(ARG_ISSUER)
                .help("Expected session token issuer (iss)")
                .env("ALIRO_ISSUER"),
        )
        .arg(
            Arg::new(ARG_AUDIENCE)
                .long(ARG_AUDIENCE)
                .help("Expected session token audience (aud)")
                .default_value(DEFAULT_AUDIENCE)
                .env("ALIRO_AUDIENCE"),
        )
        .arg(
            Arg::new(ARG_FRONTEND_ORIGIN)
                .long(ARG_FRONTEND_ORIGIN)
                .help("Browser origin allowed by CORS, e.g. https://app.aliro.dev")
                .env("ALIRO_FRONTEND_ORIGIN"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<Options> {
        let mut argv = vec!["server"];
        argv.extend_from_slice(args);
        Options::parse(&command().try_get_matches_from(argv)?)
    }

    #[test]
    fn defaults_without_keyset() -> anyhow::Result<()> {
        temp_env::with_vars(
            [
                ("ALIRO_PORT", None::<&str>),
                ("ALIRO_DSN", None),
                ("ALIRO_JWKS_URL", None),
                ("ALIRO_JWKS_PATH", None),
                ("ALIRO_JWKS", None),
                ("ALIRO_ISSUER", None),
                ("ALIRO_AUDIENCE", None),
                ("ALIRO_FRONTEND_ORIGIN", None),
            ],
            || {
                let options = parse(&[])?;
                assert_eq!(options.port, 8080);
                assert_eq!(options.dsn, None);
                assert_eq!(options.keyset, None);
                assert_eq!(options.audience, DEFAULT_AUDIENCE);
                Ok(())
            },
        )
    }

    #[test]
    fn keyset_requires_issuer() {
        temp_env::with_vars(
            [("ALIRO_ISSUER", None::<&str>), ("ALIRO_JWKS_URL", None)],
            || {
                let result = parse(&["--jwks-url", "https://id.aliro.dev/jwks.json"]);
                assert!(result.is_err());
                if let Err(err) = result {
                    assert!(err.to_string().contains("--issuer"));
                }
            },
        );
    }

    #[test]
    fn env_configures_remote_keyset() -> anyhow::Result<()> {
        temp_env::with_vars(
            [
                ("ALIRO_PORT", Some("9090")),
                ("ALIRO_JWKS_URL", Some("https://id.aliro.dev/jwks.json")),
                ("ALIRO_JWKS_PATH", None),
                ("ALIRO_JWKS", None),
                ("ALIRO_ISSUER", Some("https://id.aliro.dev")),
                ("ALIRO_AUDIENCE", Some("notes")),
                ("ALIRO_DSN", Some("")),
            ],
            || {
                let options = parse(&[])?;
                assert_eq!(options.port, 9090);
                assert_eq!(
                    options.keyset,
                    Some(KeysetSource::Url("https://id.aliro.dev/jwks.json".to_string()))
                );
                assert_eq!(options.issuer.as_deref(), Some("https://id.aliro.dev"));
                assert_eq!(options.audience, "notes");
                assert_eq!(options.dsn, None);
                Ok(())
            },
        )
    }

    #[test]
    fn keyset_sources_are_exclusive() {
        temp_env::with_vars(
            [("ALIRO_JWKS_URL", None::<&str>), ("ALIRO_JWKS_PATH", None), ("ALIRO_JWKS", None)],
            || {
                let result = command().try_get_matches_from(vec![
                    "server",
                    "--jwks-url",
                    "https://id.aliro.dev/jwks.json",
                    "--jwks-path",
                    "/etc/aliro/jwks.json",
                ]);
                assert!(result.is_err());
            },
        );
    }
}
