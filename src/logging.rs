//! Tracing subscriber setup
//!
//! Events go to stderr, either compact or as JSON lines. `NETSTATE_LOG`
//! replaces the configured filter directive when set.

use crate::config::LoggingConfig;
use crate::error::{Result, StateError};
use std::sync::OnceLock;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable overriding the configured filter directive
pub const LOG_ENV_VAR: &str = "NETSTATE_LOG";

static LOGGING_INIT: OnceLock<()> = OnceLock::new();

/// Initialize the global tracing subscriber according to `LoggingConfig`.
/// Subsequent calls are no-ops.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    if LOGGING_INIT.get().is_some() {
        return Ok(());
    }

    let level = std::env::var(LOG_ENV_VAR)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| config.level.clone());
    let env_filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    let init_result = if config.json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
    init_result
        .map_err(|err| StateError::InvalidConfig(format!("failed to initialize logging: {err}")))?;
    LOGGING_INIT.set(()).ok();

    info!(
        target: "netstate::logging",
        level = level.as_str(),
        json = config.json,
        "logging initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        let config = LoggingConfig {
            level: "not a valid directive[".to_string(),
            json: false,
        };
        assert!(init_logging(&config).is_ok());
        assert!(init_logging(&LoggingConfig::default()).is_ok());
    }
}
