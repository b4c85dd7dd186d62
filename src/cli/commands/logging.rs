//! `-v` count and `ALIRO_LOG_LEVEL`, shared by every subcommand.

use clap::{builder::ValueParser, Arg, ArgAction, ArgMatches, Command};
use tracing::Level;

pub const ARG_VERBOSITY: &str = "verbosity";

/// Levels by verbosity step. Step 0 keeps the subscriber default.
const LEVELS: [(&str, Level); 5] = [
    ("error", Level::ERROR),
    ("warn", Level::WARN),
    ("info", Level::INFO),
    ("debug", Level::DEBUG),
    ("trace", Level::TRACE),
];

/// Accept a step count (0 to 5) or a level name.
fn parse_verbosity(value: &str) -> Result<u8, String> {
    if let Ok(steps) = value.parse::<u8>() {
        return if steps <= 5 {
            Ok(steps)
        } else {
            Err(format!("verbosity {steps} is above 5"))
        };
    }

    let name = value.to_ascii_lowercase();
    LEVELS
        .iter()
        .position(|(level, _)| *level == name)
        .and_then(|steps| u8::try_from(steps).ok())
        .ok_or_else(|| {
            format!("unknown log level '{value}', expected error, warn, info, debug or trace")
        })
}

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::new(parse_verbosity)
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Log more: -v warn, -vv info, -vvv debug, -vvvv trace (default: errors only)")
            .long_help(
                "Log more with each -v. ALIRO_LOG_LEVEL takes a step count or a level name; \
                 RUST_LOG overrides both",
            )
            .env("ALIRO_LOG_LEVEL")
            .global(true)
            .action(ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}

/// Level selected on the command line, `None` for the default.
#[must_use]
pub fn level(matches: &ArgMatches) -> Option<Level> {
    level_for(matches.get_one::<u8>(ARG_VERBOSITY).copied().unwrap_or(0))
}

fn level_for(steps: u8) -> Option<Level> {
    if steps == 0 {
        return None;
    }
    let index = usize::from(steps).min(LEVELS.len() - 1);
    LEVELS.get(index).map(|(_, level)| *level)
}
