//! Error types for cloud-dl
//!
//! This module provides the error taxonomy used across the task tree:
//! - Cancellation, which is cooperative and never counted as a failure
//! - Data-source failures, classified as not-found, transient or rejected
//! - Fatal phase errors (authentication, directory layout)
//! - Internal invariant violations, which are never retried or counted

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for cloud-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for cloud-dl
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// The run was cancelled through its cancellation token
    #[error("operation was cancelled")]
    Cancelled,

    /// An argument passed to a constructor or operation is out of range
    #[error("invalid argument `{name}`: {message}")]
    InvalidArgument {
        /// Name of the offending argument
        name: &'static str,
        /// Human-readable description of the constraint that was violated
        message: String,
    },

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "retry.max_attempts")
        key: Option<String>,
    },

    /// Failure reported by a cloud data source
    #[error("data source error: {0}")]
    Source(#[from] SourceError),

    /// Credential exchange failed; fatal for the whole run
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Target directory layout could not be resolved or created; fatal for the files phase
    #[error("cannot prepare {path}: {message}")]
    Layout {
        /// The path that could not be prepared
        path: PathBuf,
        /// The reason it could not be prepared
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal invariant violation (programming error, never retried or counted)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Failures a cloud data source can report for a single request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The requested item does not exist or has no content
    #[error("not found: {0}")]
    NotFound(String),

    /// Rate limiting or a transient server fault; worth retrying
    #[error("transient failure: {0}")]
    Transient(String),

    /// The request was rejected for a reason retrying will not fix
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl Error {
    /// Shorthand for an [`Error::InvalidArgument`]
    pub fn invalid_argument(name: &'static str, message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            name,
            message: message.into(),
        }
    }

    /// Returns true if this error is a cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Returns true for errors that abort a whole phase instead of a single item
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Authentication(_) | Error::Layout { .. } | Error::Internal(_)
        )
    }

    /// Machine-readable error code, stable across releases
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Cancelled => "cancelled",
            Error::InvalidArgument { .. } => "invalid_argument",
            Error::Config { .. } => "config_error",
            Error::Source(SourceError::NotFound(_)) => "not_found",
            Error::Source(SourceError::Transient(_)) => "transient",
            Error::Source(SourceError::Rejected(_)) => "rejected",
            Error::Authentication(_) => "authentication_failed",
            Error::Layout { .. } => "layout_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::Internal(_) => "internal_error",
        }
    }
}
