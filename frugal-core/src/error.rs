//! Error types for access layer operations

use std::time::Duration;
use thiserror::Error;

/// Configuration errors. The only errors that fail construction.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Unknown priority: {value}")]
    UnknownPriority { value: String },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    pub(crate) fn invalid(
        field: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// A read against the backing store failed or timed out.
///
/// Recovered inside the read gateway; callers only observe it through logs
/// and metrics.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Fetch for {key} failed: {reason}")]
    Failed { key: String, reason: String },

    #[error("Fetch for {key} timed out after {timeout:?}")]
    TimedOut { key: String, timeout: Duration },
}

impl FetchError {
    pub fn failed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Failed { key, .. } | Self::TimedOut { key, .. } => key,
        }
    }
}

/// A batched write failed as a whole.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommitError {
    #[error("Batch commit failed: {reason}")]
    Failed { reason: String },

    #[error("Batch rejected by store: {reason}")]
    Rejected { reason: String },
}

impl CommitError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

/// Master error type for the access layer. Embedding applications can
/// funnel config, fetch and commit failures through this one type.
#[derive(Debug, Error)]
pub enum FrugalError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Commit error: {0}")]
    Commit(#[from] CommitError),
}

/// Result type alias for access layer operations.
pub type FrugalResult<T> = Result<T, FrugalError>;

// =============================================================================
// TESTS
// =============================================================================
