//! # shellcache common
//!
//! Error types and logging configuration shared by the shellcache crates.
//!
//! ## Features
//!
//! - Unified error type with backtrace support for internal failures
//! - Logging configuration and setup
//! - Result and Option extension traits

use thiserror::Error;

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};

/// Unified error type for shellcache.
#[derive(Error, Debug)]
pub enum ShellCacheError {
    /// Network-related errors.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Cache storage errors (backend reads and writes).
    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Install step failed; the version never activates.
    #[error("Install failed: {0}")]
    Install(String),

    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        backtrace: Option<backtrace::Backtrace>,
    },
}

impl ShellCacheError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source.
    pub fn network_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Create a storage error with source.
    pub fn storage_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an internal error with backtrace.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            backtrace: Some(backtrace::Backtrace::new()),
        }
    }

    /// Whether a later attempt could succeed (the next request simply tries again).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ShellCacheError::Network { .. } | ShellCacheError::Io(_)
        )
    }

    /// Get the error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            ShellCacheError::Network { .. } => "network",
            ShellCacheError::Storage { .. } => "storage",
            ShellCacheError::Install(_) => "install",
            ShellCacheError::Config { .. } => "config",
            ShellCacheError::Io(_) => "io",
            ShellCacheError::NotFound(_) => "not_found",
            ShellCacheError::InvalidArgument(_) => "invalid_argument",
            ShellCacheError::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for shellcache operations.
pub type Result<T> = std::result::Result<T, ShellCacheError>;

/// Extension trait for Result.
pub trait ResultExt<T> {
    /// Wrap the error as a storage error with context.
    fn storage_context(self, message: impl Into<String>) -> Result<T>;

    /// Wrap the error as an internal error with context and a backtrace.
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn storage_context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| ShellCacheError::storage_with_source(message, e))
    }

    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| ShellCacheError::Internal {
            message: format!("{}: {}", message.into(), e),
            backtrace: Some(backtrace::Backtrace::new()),
        })
    }
}

/// Extension trait for Option.
pub trait OptionExt<T> {
    /// Convert None to a NotFound error.
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| ShellCacheError::NotFound(resource.into()))
    }
}
