//! Error types for PulseCache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in PulseCache
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    // =========================================================================
    // Configuration Errors (fail fast at startup)
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown or invalid rate-limit tier
    #[error("Invalid tier: {0}")]
    InvalidTier(String),

    /// Unknown cache kind label
    #[error("Unknown cache kind: {0}")]
    UnknownCacheKind(String),

    // =========================================================================
    // Transient Backend Errors (degraded, never surfaced to request handlers)
    // =========================================================================
    /// Store backend failure
    #[error("Backend '{backend}' failed: {reason}")]
    Backend { backend: String, reason: String },

    /// Backend call exceeded its deadline
    #[error("Operation '{operation}' timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    /// Alert channel delivery failure
    #[error("Alert channel '{channel}' failed: {reason}")]
    AlertChannel { channel: String, reason: String },

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Logic Errors
    // =========================================================================
    /// Producer callback failed while computing a value on a cache miss
    #[error("Producer failed for key {key}: {reason}")]
    Producer { key: String, reason: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a backend error
    pub fn backend(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Backend {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    /// Build a producer error
    pub fn producer(key: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Producer {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this is a transient backend condition (unreachable store, timeout)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Backend { .. } | Error::Timeout { .. } | Error::Http(_) | Error::Io(_)
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
