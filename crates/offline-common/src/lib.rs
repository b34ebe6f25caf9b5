//! # Offline Common
//!
//! Error types and logging configuration shared by the offline caching worker
//! crates and the host harness.
//!
//! ## Features
//!
//! - Unified error type with backtrace support
//! - Logging configuration and setup
//! - Result extension traits

use thiserror::Error;

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};

/// Unified error type for hosts embedding the worker.
#[derive(Error, Debug)]
pub enum OfflineError {
    /// Network-related errors.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Cache storage errors.
    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

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

impl OfflineError {
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

    /// Create a cache error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
            source: None,
        }
    }

    /// Create a cache error with source.
    pub fn cache_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Cache {
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

    /// Create an internal error with backtrace.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            backtrace: Some(backtrace::Backtrace::new()),
        }
    }

    /// Check if this error is retryable.
    ///
    /// The worker itself never retries; hosts use this to decide whether a
    /// failed install is worth attempting again on the next navigation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OfflineError::Network { .. } | OfflineError::Io(_))
    }

    /// Get the error category for reporting.
    pub fn category(&self) -> &'static str {
        match self {
            OfflineError::Network { .. } => "network",
            OfflineError::Cache { .. } => "cache",
            OfflineError::Config { .. } => "config",
            OfflineError::Io(_) => "io",
            OfflineError::NotFound(_) => "not_found",
            OfflineError::InvalidArgument(_) => "invalid_argument",
            OfflineError::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for host operations.
pub type Result<T> = std::result::Result<T, OfflineError>;

/// Attach a description of the failed harness step to any error.
///
/// The harness reports through a single [`OfflineError`], so errors from the
/// URL parser, the network loader and the worker are flattened into an
/// internal error that names the step (`"invalid --script URL: ..."`).
pub trait ResultExt<T> {
    fn context(self, step: impl Into<String>) -> Result<T>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, step: impl Into<String>) -> Result<T> {
        self.map_err(|e| OfflineError::Internal {
            message: format!("{}: {}", step.into(), e),
            backtrace: Some(backtrace::Backtrace::new()),
        })
    }
}

/// Turn a missing worker, bucket or client into [`OfflineError::NotFound`].
pub trait OptionExt<T> {
    fn ok_or_not_found(self, what: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, what: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| OfflineError::NotFound(what.into()))
    }
}
