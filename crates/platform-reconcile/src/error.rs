//! Error types for the reconciliation pipeline
//!
//! Every error value carries an [`ErrorKind`] tag. The tag is set where the
//! error originates (HTTP status, parser, validator) so that callers never
//! have to inspect error messages to decide what happened.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::api::ApiError;
use crate::client::ClientError;
use crate::config::ConfigError;
use crate::retry::RetryError;

/// Closed set of error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed YAML or unsupported manifest (never retried)
    Parse,
    /// Structural, policy or requirement violation (never retried)
    Validation,
    /// Identity lookup failed because of a remote condition
    Resolution,
    /// Transient failure that persisted after the retry policy was exhausted
    Retryable,
    /// Failure classified as permanent; attempted once
    NonRetryable,
    /// Cancelled before or during a retry wait
    Timeout,
    /// Remote object does not exist
    NotFound,
    /// Invalid configuration
    Config,
}

impl ErrorKind {
    /// Get error code for reports.
    pub fn error_code(&self) -> &'static str {
        match self {
            ErrorKind::Parse => "PARSE_ERROR",
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Resolution => "RESOLUTION_ERROR",
            ErrorKind::Retryable => "RETRYABLE_ERROR",
            ErrorKind::NonRetryable => "NON_RETRYABLE_ERROR",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Config => "CONFIG_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.error_code())
    }
}

/// Reconciliation error types.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Document could not be decoded into a domain object
    #[error("Parse error in {path}: {message}")]
    Parse {
        /// Source file path
        path: String,
        /// What was wrong with the document
        message: String,
    },

    /// Object violates a structural or policy rule
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Email could not be resolved because the lookup itself failed
    #[error("Failed to resolve {email}: {source}")]
    Resolution {
        /// Email being resolved
        email: String,
        /// Underlying client failure
        #[source]
        source: ClientError,
    },

    /// Remote call failed
    #[error(transparent)]
    Remote(#[from] ClientError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for reconciliation operations.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

impl ReconcileError {
    /// Create a parse error for a source path.
    pub fn parse(path: impl fmt::Display, message: impl Into<String>) -> Self {
        ReconcileError::Parse {
            path: path.to_string(),
            message: message.into(),
        }
    }

    /// The kind tag of this error.
    ///
    /// Cancellation wins over the wrapping context: a resolution that timed
    /// out is reported as [`ErrorKind::Timeout`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::Parse { .. } => ErrorKind::Parse,
            ReconcileError::Validation(_) => ErrorKind::Validation,
            ReconcileError::Resolution { source, .. } => match remote_kind(source) {
                ErrorKind::Timeout => ErrorKind::Timeout,
                _ => ErrorKind::Resolution,
            },
            ReconcileError::Remote(source) => remote_kind(source),
            ReconcileError::Config(_) => ErrorKind::Config,
        }
    }

    /// Check whether this error was caused by cancellation.
    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}

/// Kind of a client failure, surfacing not-found separately.
pub(crate) fn remote_kind(error: &ClientError) -> ErrorKind {
    match error {
        RetryError::NonRetryable {
            source: ApiError::NotFound { .. },
            ..
        } => ErrorKind::NotFound,
        other => other.kind(),
    }
}
