//! Log filter selection and subscriber setup

use anyhow::{Context, Result};
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Pick the log filter: an explicit `--log-level` wins, then `RUST_LOG`,
/// then `debug` or `info` depending on the config's debug flag.
///
/// An invalid explicit filter is an error. An invalid `RUST_LOG` falls back
/// to the default level; the returned message says so.
pub fn env_filter(
    log_level: Option<&str>,
    rust_log: Option<&str>,
    debug: bool,
) -> Result<(EnvFilter, Option<String>)> {
    let default_level = if debug { "debug" } else { "info" };

    if let Some(level) = log_level {
        let filter = EnvFilter::try_new(level)
            .with_context(|| format!("Invalid --log-level filter {:?}", level))?;
        return Ok((filter, None));
    }

    match rust_log.filter(|value| !value.trim().is_empty()) {
        Some(value) => match EnvFilter::try_new(value) {
            Ok(filter) => Ok((filter, None)),
            Err(e) => Ok((
                EnvFilter::new(default_level),
                Some(format!(
                    "Ignoring invalid {} filter {:?} ({}), using {:?}",
                    EnvFilter::DEFAULT_ENV,
                    value,
                    e,
                    default_level
                )),
            )),
        },
        None => Ok((EnvFilter::new(default_level), None)),
    }
}

/// Install the global subscriber
pub fn setup_logging(log_level: Option<&str>, debug: bool) -> Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let (filter, ignored) = env_filter(log_level, rust_log.as_deref(), debug)?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    if let Some(message) = ignored {
        warn!("{}", message);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_level_wins() {
        let (filter, ignored) = env_filter(Some("warn"), Some("trace"), true).unwrap();
        assert_eq!(filter.to_string(), "warn");
        assert!(ignored.is_none());
    }

    #[test]
    fn test_invalid_explicit_level_is_an_error() {
        let err = env_filter(Some("tunnelwarden=loud"), None, false).unwrap_err();
        assert!(err.to_string().contains("tunnelwarden=loud"));
    }

    #[test]
    fn test_rust_log_then_debug_flag() {
        let (filter, _) = env_filter(None, Some("tunnelwarden_proxy=trace"), false).unwrap();
        assert_eq!(filter.to_string(), "tunnelwarden_proxy=trace");

        let (filter, _) = env_filter(None, None, true).unwrap();
        assert_eq!(filter.to_string(), "debug");

        let (filter, _) = env_filter(None, Some(""), false).unwrap();
        assert_eq!(filter.to_string(), "info");
    }

    #[test]
    fn test_invalid_rust_log_falls_back_with_warning() {
        let (filter, ignored) = env_filter(None, Some("tunnelwarden=loud"), false).unwrap();
        assert_eq!(filter.to_string(), "info");

        let message = ignored.unwrap();
        assert!(message.contains("RUST_LOG"));
        assert!(message.contains("tunnelwarden=loud"));
    }
}
