//! Logging setup for the shellcache binaries.
//!
//! Engine crates log at the configured level; the HTTP and SQLite stack
//! underneath only reports warnings. Output goes to stderr so command
//! results on stdout stay clean.

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Crates whose events follow the configured level.
const ENGINE_TARGETS: &[&str] = &[
    "shellcache",
    "shellcache_common",
    "shellcache_net",
    "shellcache_sw",
];

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    /// One line per event.
    Compact,
    /// One JSON object per event, fields flattened.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level for the engine crates.
    pub level: Level,
    pub format: LogFormat,
    /// Full directive string; replaces the per-crate defaults.
    pub directives: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            directives: None,
        }
    }
}

impl LogConfig {
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self.directives = None;
        self
    }

    /// Apply a filter setting: a bare level (`debug`) only changes the
    /// engine level, anything else (`shellcache_sw=trace,reqwest=debug`) is
    /// used as given.
    pub fn with_filter(self, filter: &str) -> Self {
        match filter.trim().parse::<Level>() {
            Ok(level) => self.with_level(level),
            Err(_) => Self {
                directives: Some(filter.to_string()),
                ..self
            },
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// The directive string handed to `EnvFilter`.
    pub fn filter_directives(&self) -> String {
        if let Some(ref directives) = self.directives {
            return directives.clone();
        }
        let level = self.level.as_str().to_ascii_lowercase();
        std::iter::once("warn".to_string())
            .chain(ENGINE_TARGETS.iter().map(|target| format!("{}={}", target, level)))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn env_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.filter_directives());
        match self.directives {
            Some(ref directives) => EnvFilter::try_new(directives).unwrap_or_else(|_| fallback()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins unless explicit directives were configured. Source
/// locations are included from `debug` down.
pub fn init_logging(config: LogConfig) {
    let with_location = config.level >= Level::DEBUG;
    let registry = tracing_subscriber::registry().with(config.env_filter());

    match config.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_file(with_location)
                    .with_line_number(with_location),
            )
            .init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr)
                    .with_target(with_location),
            )
            .init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}
