//! Tracing subscriber setup for the CLI.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Environment variable that overrides every other filter setting.
pub const ENV_LOG: &str = "LOCKSTEP_LOG";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Pick the filter directive: `LOCKSTEP_LOG`, then `--verbose`, then config.
pub fn filter_directive(configured: &str, verbose: bool) -> String {
    match std::env::var(ENV_LOG) {
        Ok(value) if !value.trim().is_empty() => value,
        _ if verbose => "debug".to_string(),
        _ => configured.to_string(),
    }
}

/// Install the global subscriber. Logs go to stderr so stdout stays parseable.
///
/// Calling this twice is harmless; the second call is ignored.
pub fn init(configured: &str, verbose: bool, format: LogFormat) {
    let directive = filter_directive(configured, verbose);
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let _ = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
