//! Centralised tracing initialisation for metacoder hosts.
//!
//! Call [`init_tracing`] once at program start to configure the global
//! subscriber with an `EnvFilter` and optional JSON formatting. Later calls
//! are ignored (the global subscriber can only be set once per process).

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Selects JSON output when set to `json`.
pub const LOG_FORMAT_ENV: &str = "METACODER_LOG_FORMAT";
/// Default level when `RUST_LOG` is unset (`trace`..`error`).
pub const LOG_LEVEL_ENV: &str = "METACODER_LOG_LEVEL";

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON log lines.
/// * `level`: default verbosity when `RUST_LOG` is not set.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}

/// Format and level as read from the environment, with defaults.
pub fn tracing_settings_from_env() -> (bool, Level) {
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let level = std::env::var(LOG_LEVEL_ENV)
        .ok()
        .and_then(|v| Level::from_str(v.trim()).ok())
        .unwrap_or(Level::INFO);
    (json, level)
}

/// [`init_tracing`] driven by `METACODER_LOG_FORMAT` / `METACODER_LOG_LEVEL`.
pub fn init_tracing_from_env() {
    let (json, level) = tracing_settings_from_env();
    init_tracing(json, level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init_tracing(false, Level::WARN);
        init_tracing(true, Level::DEBUG);
        tracing::info!("still logging");
    }
}
