//! Custom error types for rerun-guard.
//!
//! Errors here never cross the controller, collector or reporter entry
//! points: those degrade to defaults and log instead. They surface from the
//! lower-level building blocks (settings parsing, config files, the round
//! lock file) and from the CLI.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for rerun-guard operations
#[derive(Error, Debug)]
pub enum RerunError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// A setting had a value that could not be parsed
    #[error("Invalid setting {key}={value}: {reason}")]
    InvalidSetting {
        key: String,
        value: String,
        reason: String,
    },

    /// Unknown backoff strategy name
    #[error("Unknown backoff strategy: {name}")]
    UnknownStrategy { name: String },

    // =========================================================================
    // Round Lock Errors
    // =========================================================================
    /// Round lock file could not be read, written or removed
    #[error("Round lock error at {path}: {message}")]
    RoundLock { path: PathBuf, message: String },

    /// Round lock contents were not `pid:round:start_ms`
    #[error("Malformed round lock record: {content:?}")]
    MalformedLock { content: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// TOML error wrapper
    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RerunError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create an invalid setting error
    pub fn invalid_setting(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidSetting {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a round lock error
    pub fn round_lock(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::RoundLock {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Check if this error came from configuration input
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::InvalidSetting { .. }
                | Self::UnknownStrategy { .. }
                | Self::Toml(_)
        )
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } | Self::InvalidSetting { .. } | Self::UnknownStrategy { .. } => 7,
            Self::RoundLock { .. } | Self::MalformedLock { .. } => 8,
            _ => 1,
        }
    }
}

/// Type alias for rerun-guard results
pub type Result<T> = std::result::Result<T, RerunError>;
