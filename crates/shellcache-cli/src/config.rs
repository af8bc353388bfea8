//! CLI configuration

use serde::{Deserialize, Serialize};
use shellcache_common::logging::{LogConfig, LogFormat};
use shellcache_common::{Result, ShellCacheError};
use shellcache_net::LoaderConfig;
use shellcache_sw::CacheConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// CLI configuration, read from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// SQLite cache store
    pub store_path: PathBuf,

    /// Logging settings
    pub log: LogSettings,

    /// HTTP loader settings
    pub loader: LoaderSettings,

    /// The cached site
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Filter directive, e.g. `info` or `shellcache_sw=debug`
    pub filter: String,

    /// Output format
    pub format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderSettings {
    /// Overrides the default user agent
    pub user_agent: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,

    /// Maximum redirects
    pub max_redirects: usize,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            store_path: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("shellcache")
                .join("caches.db"),
            log: LogSettings::default(),
            loader: LoaderSettings::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            user_agent: None,
            timeout_secs: Some(30),
            max_redirects: 10,
        }
    }
}

impl CliConfig {
    /// Load from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ShellCacheError::config_with_source(format!("cannot read {}", path.display()), e)
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            ShellCacheError::config_with_source(format!("invalid config {}", path.display()), e)
        })
    }

    /// `--verbose` raises the engine crates to `debug` over any configured filter.
    pub fn log_config(&self, verbose: bool) -> LogConfig {
        let config = LogConfig::default().with_format(self.log.format);
        if verbose {
            config.with_level(Level::DEBUG)
        } else {
            config.with_filter(&self.log.filter)
        }
    }

    pub fn loader_config(&self) -> LoaderConfig {
        let mut config = LoaderConfig {
            timeout: self.loader.timeout_secs.map(Duration::from_secs),
            max_redirects: self.loader.max_redirects,
            ..LoaderConfig::default()
        };
        if let Some(ref user_agent) = self.loader.user_agent {
            config.user_agent = user_agent.clone();
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_path_gives_defaults() {
        let config = CliConfig::load(None).unwrap();
        assert!(config.store_path.ends_with("shellcache/caches.db"));
        assert_eq!(config.cache.core_cache_name(), "arabsad-v1.0.0");
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shellcache.json");
        std::fs::write(
            &path,
            r#"{
                "store_path": "/tmp/site.db",
                "log": { "format": "json" },
                "cache": { "origin": "http://localhost:8080", "version": "1.1.0" }
            }"#,
        )
        .unwrap();

        let config = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(config.store_path, PathBuf::from("/tmp/site.db"));
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.log.filter, "info");
        assert_eq!(config.cache.origin, "http://localhost:8080");
        assert_eq!(config.cache.pages_cache_name(), "arabsad-v1.1.0-pages");
    }

    #[test]
    fn test_bad_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = CliConfig::load(Some(&path)).unwrap_err();
        assert_eq!(err.category(), "config");

        let err = CliConfig::load(Some(&dir.path().join("absent.json"))).unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_log_config_from_settings() {
        let mut config = CliConfig::default();
        config.log.filter = "shellcache_sw=trace".into();
        config.log.format = LogFormat::Json;

        let log = config.log_config(false);
        assert_eq!(log.format, LogFormat::Json);
        assert_eq!(log.filter_directives(), "shellcache_sw=trace");

        let log = config.log_config(true);
        assert_eq!(log.level, Level::DEBUG);
        assert!(log.filter_directives().contains("shellcache_net=debug"));
    }

    #[test]
    fn test_loader_config() {
        let mut config = CliConfig::default();
        config.loader.timeout_secs = None;
        config.loader.user_agent = Some("shellcache-test/1".into());

        let loader = config.loader_config();
        assert!(loader.timeout.is_none());
        assert_eq!(loader.user_agent, "shellcache-test/1");
        assert_eq!(loader.max_redirects, 10);
    }
}
