//! Errors for cache engine operations.
//!
//! None of these reach a controlled page. Fetch handling converts every
//! failure into a cached, fallback or `408` response; only install, activate
//! and configuration surface them to the host.

use shellcache_common::ShellCacheError;
use shellcache_net::NetError;
use thiserror::Error;

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Storage error: {0}")]
    Storage(#[from] ShellCacheError),

    #[error("Network error fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: NetError,
    },

    #[error("Unexpected status {status} for {url}")]
    BadStatus { url: String, status: u16 },

    #[error("Response for {url} left the site origin")]
    NotSameOrigin { url: String },

    #[error("Invalid manifest entry {entry:?}: {reason}")]
    InvalidManifestEntry { entry: String, reason: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Result type alias for cache engine operations.
pub type CacheResult<T> = Result<T, CacheError>;

impl From<CacheError> for ShellCacheError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Storage(inner) => inner,
            CacheError::Network { url, source } => {
                ShellCacheError::network_with_source(format!("fetching {}", url), source)
            }
            CacheError::BadStatus { .. } | CacheError::NotSameOrigin { .. } => {
                ShellCacheError::Install(err.to_string())
            }
            CacheError::InvalidManifestEntry { .. } | CacheError::Config(_) => {
                ShellCacheError::config(err.to_string())
            }
            CacheError::StateError(_) => ShellCacheError::InvalidArgument(err.to_string()),
            CacheError::Task(_) => ShellCacheError::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_status_maps_to_install_category() {
        let err = CacheError::BadStatus {
            url: "https://arabsad.com/favicon.ico".into(),
            status: 404,
        };
        let common: ShellCacheError = err.into();
        assert_eq!(common.category(), "install");
    }

    #[test]
    fn test_storage_error_unwraps() {
        let err = CacheError::from(ShellCacheError::storage("disk full"));
        let common: ShellCacheError = err.into();
        assert_eq!(common.category(), "storage");
    }
}
