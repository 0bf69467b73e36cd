//! Logging setup for the trade daemon and its tests.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

/// Environment variable that overrides the configured filter.
pub const LOG_ENV: &str = "TRADE_LOG";

/// `[log]` section of the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `traded=debug,info`.
    pub level: String,
    /// Emit JSON lines on stderr instead of the human format.
    pub json: bool,
    /// Directory for the daily-rolling JSON log file. Disabled when unset.
    pub directory: Option<PathBuf>,
    /// File name prefix inside `directory`.
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
            file_prefix: "traded.log".to_string(),
        }
    }
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    match std::env::var(LOG_ENV) {
        Ok(directive) if !directive.trim().is_empty() => EnvFilter::new(directive),
        _ => EnvFilter::new(&config.level),
    }
}

/// Install the global subscriber.
///
/// The returned guards flush the non-blocking file writer and must be kept
/// alive for the lifetime of the process.
pub fn init_logging(config: &LogConfig) -> Vec<WorkerGuard> {
    let mut guards = Vec::new();

    let stderr_layer = if config.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let file_layer = config.directory.as_ref().map(|dir| {
        let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        guards.push(guard);
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_current_span(true)
            .boxed()
    });

    let _ = tracing_subscriber::registry()
        .with(build_filter(config))
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    guards
}

/// Route log output through the test harness writer.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_test_logging() {
    let _ = fmt()
        .with_test_writer()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_log_to_stderr_only() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert!(config.directory.is_none());
    }

    #[test]
    fn log_config_parses_from_toml() {
        let config: LogConfig = toml::from_str(
            r#"
            level = "traded=debug"
            json = true
            directory = "/var/log/traded"
            "#,
        )
        .unwrap();
        assert!(config.json);
        assert_eq!(config.file_prefix, "traded.log");
        assert_eq!(config.directory, Some(PathBuf::from("/var/log/traded")));
    }

    #[test]
    fn file_layer_returns_guard() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            directory: Some(dir.path().to_path_buf()),
            ..LogConfig::default()
        };
        let guards = init_logging(&config);
        assert_eq!(guards.len(), 1);
        tracing::info!(target: "test", "file layer installed");
    }
}
