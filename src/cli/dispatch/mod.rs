//! Map validated CLI arguments to the action the binary executes.

use crate::cli::actions::{call, server, Action};
use crate::cli::commands;
use anyhow::{anyhow, Result};

/// Map validated CLI matches to an action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    match matches.subcommand() {
        Some(("server", sub_matches)) => {
            let options = commands::server::Options::parse(sub_matches)?;
            Ok(Action::Server(server::Args {
                port: options.port,
                dsn: options.dsn,
                keyset: options.keyset,
                issuer: options.issuer,
                audience: options.audience,
                frontend_origin: options.frontend_origin,
            }))
        }
        Some(("call", sub_matches)) => {
            let options = commands::call::Options::parse(sub_matches)?;
            Ok(Action::Call(call::Args {
                url: options.url,
                token_url: options.token_url,
                refresh_token: options.refresh_token,
                procedure: options.procedure,
                input: options.input,
                login_path: options.login_path,
            }))
        }
        _ => Err(anyhow!("missing subcommand: server or call")),
    }
}
