//! Crate-wide error type.
//!
//! Every fallible operation in both cores surfaces one of the error kinds
//! named in the design: `NotFound`, `Exists`, `InvalidArgument`,
//! `InvalidState`, `Unsupported`, `Internal`, `Cancelled`, `Timeout`. Each
//! carries a human-readable message and, where available, an underlying
//! cause.

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The error surfaced to RPC callers and library consumers.
#[derive(Error, Debug)]
pub enum Error {
    /// No record exists for the given id.
    #[error("not found: {message}")]
    NotFound {
        /// Description of what was not found.
        message: String,
    },

    /// A record with the given id already exists.
    #[error("already exists: {message}")]
    Exists {
        /// Description of the conflicting record.
        message: String,
    },

    /// The caller supplied a malformed or out-of-range argument.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// The operation is not valid for the current state of the resource.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the state conflict.
        message: String,
    },

    /// The operation is recognized but not implemented for this configuration.
    #[error("unsupported: {message}")]
    Unsupported {
        /// Description of what is unsupported.
        message: String,
    },

    /// An unexpected internal failure, optionally wrapping a cause.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
        /// Underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The operation was cancelled before completion.
    #[error("cancelled: {message}")]
    Cancelled {
        /// Description of why the operation was cancelled.
        message: String,
    },

    /// The operation did not complete within its allotted time.
    #[error("timed out after {timeout_secs}s: {message}")]
    Timeout {
        /// Description of the operation that timed out.
        message: String,
        /// The timeout that was exceeded, in seconds.
        timeout_secs: u64,
    },
}

impl Error {
    /// Build a [`Error::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Build a [`Error::Exists`].
    pub fn exists(message: impl Into<String>) -> Self {
        Self::Exists {
            message: message.into(),
        }
    }

    /// Build a [`Error::InvalidArgument`].
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Build a [`Error::InvalidState`].
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Build a [`Error::Unsupported`].
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Build a [`Error::Internal`] with no underlying cause.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Build a [`Error::Internal`] wrapping an underlying cause.
    pub fn internal_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Build a [`Error::Cancelled`].
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    /// Build a [`Error::Timeout`].
    pub fn timeout(message: impl Into<String>, timeout_secs: u64) -> Self {
        Self::Timeout {
            message: message.into(),
            timeout_secs,
        }
    }

    /// The stable error category, used for RPC error codes and metrics.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Exists { .. } => "exists",
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::InvalidState { .. } => "invalid_state",
            Self::Unsupported { .. } => "unsupported",
            Self::Internal { .. } => "internal",
            Self::Cancelled { .. } => "cancelled",
            Self::Timeout { .. } => "timeout",
        }
    }

    /// Whether a caller may reasonably retry the operation unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Internal { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::not_found(err.to_string()),
            std::io::ErrorKind::AlreadyExists => Error::exists(err.to_string()),
            _ => Error::internal_with("io failure", err),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::internal_with("json failure", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_are_stable() {
        assert_eq!(Error::not_found("x").category(), "not_found");
        assert_eq!(Error::exists("x").category(), "exists");
        assert_eq!(Error::invalid_argument("x").category(), "invalid_argument");
        assert_eq!(Error::invalid_state("x").category(), "invalid_state");
        assert_eq!(Error::unsupported("x").category(), "unsupported");
        assert_eq!(Error::internal("x").category(), "internal");
        assert_eq!(Error::cancelled("x").category(), "cancelled");
        assert_eq!(Error::timeout("x", 1).category(), "timeout");
    }

    #[test]
    fn only_timeout_and_internal_are_retryable() {
        assert!(Error::timeout("x", 1).is_retryable());
        assert!(Error::internal("x").is_retryable());
        assert!(!Error::not_found("x").is_retryable());
        assert!(!Error::invalid_state("x").is_retryable());
    }

    #[test]
    fn io_not_found_maps_to_not_found() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        assert_eq!(err.category(), "not_found");
    }
}
