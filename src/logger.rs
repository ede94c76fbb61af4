//! Logging initialisation via tracing-subscriber.
//!
//! Call [`init`] once at startup, after the effective level is resolved.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Dependencies stay at `warn`; the router logs at the requested level.
/// Full directive strings (containing `=` or `,`) pass through unchanged.
pub fn directive_for(level: &str) -> String {
    if level.contains('=') || level.contains(',') {
        level.to_string()
    } else {
        format!("warn,router_bootstrap={level}")
    }
}

/// Initialise the global tracing subscriber.
///
/// If `prefer_level` is `true` (level given on the command line), `level`
/// wins and `RUST_LOG` is only a fallback when `level` does not parse.
/// Otherwise `RUST_LOG` wins and `level` is the fallback.
pub fn init(level: &str, prefer_level: bool) -> Result<(), AppError> {
    let directive = directive_for(level);
    let filter = if prefer_level {
        match EnvFilter::try_new(&directive) {
            Ok(filter) => filter,
            Err(level_err) => EnvFilter::try_from_default_env().map_err(|env_err| {
                AppError::Logger(format!(
                    "invalid log level '{level}': {level_err}; RUST_LOG parse failed: {env_err}"
                ))
            })?,
        }
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&directive))
            .map_err(|e| AppError::Logger(format!("invalid log level '{level}': {e}")))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))?;

    Ok(())
}

/// Parse a bare level string, rejecting unknown values. Used to validate
/// `-v` / `--log-level` before the subscriber exists.
pub fn parse_level(level: &str) -> Result<LevelFilter, AppError> {
    if level.is_empty() {
        return Err(AppError::Logger("log level must not be empty".into()));
    }
    level
        .parse::<LevelFilter>()
        .map_err(|_| AppError::Logger(format!("unrecognised log level: '{level}'")))
}
