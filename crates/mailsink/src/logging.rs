//! Subscriber setup.

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Simple,
    /// One JSON object per line.
    Json,
}

/// Crates whose events the `--log-level` value applies to.
const TARGETS: [&str; 3] = ["mailsink", "mailsink_smtp", "mailsink_core"];

/// Builds the directive string used when `RUST_LOG` is not set.
fn default_directives(level: &str) -> String {
    TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence over `level`.
pub fn init(level: &str, format: LogFormat) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives(level))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Simple => registry.with(tracing_subscriber::fmt::layer()).try_init()?,
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?,
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_cover_every_crate() {
        assert_eq!(
            default_directives("debug"),
            "mailsink=debug,mailsink_smtp=debug,mailsink_core=debug"
        );
        assert!(EnvFilter::try_new(default_directives("warn")).is_ok());
    }

    #[test]
    fn test_bad_level_is_rejected() {
        assert!(EnvFilter::try_new(default_directives("loud")).is_err());
    }

    #[test]
    fn test_format_names() {
        assert_eq!(LogFormat::from_str("json", true).unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::from_str("SIMPLE", true).unwrap(), LogFormat::Simple);
        assert!(LogFormat::from_str("xml", true).is_err());
    }
}
