//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the filter:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `MINISH_LOG` environment variable (`EnvFilter` syntax, e.g. "debug" or
//!    "minish::jobs=trace")
//! 3. default to `warn`
//!
//! Logs are sent to STDERR so that they never mix with the output of a command.
//! Forked children never log.

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt};

pub const LOG_ENV_VAR: &str = "MINISH_LOG";

const DEFAULT_FILTER: &str = "warn";

/// Initialise the global logging subscriber.
///
/// Call once at startup.
pub fn init_logging(cli_level: Option<&str>) -> Result<()> {
    let directives = select_filter(cli_level, std::env::var(LOG_ENV_VAR).ok());
    let filter = EnvFilter::try_new(&directives)
        .with_context(|| format!("invalid log filter `{directives}`"))?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install logger: {e}"))?;

    Ok(())
}

fn select_filter(cli_level: Option<&str>, env_value: Option<String>) -> String {
    cli_level
        .map(str::to_string)
        .or(env_value)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}
