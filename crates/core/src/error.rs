//! Error types for Codemode.

use thiserror::Error;

use crate::types::ErrorKind;

/// Result type alias using Codemode's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Codemode.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Request Errors
    // =========================================================================
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Path escapes sandbox root: {path} is outside {root}")]
    PathEscape { path: String, root: String },

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("File not found in sandbox: {0}")]
    FileNotFound(String),

    // =========================================================================
    // Pool Errors
    // =========================================================================
    #[error("No sandbox available within {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    #[error("Sandbox pool is shutting down")]
    ShuttingDown,

    #[error("Execution timed out after {0}ms")]
    Timeout(u64),

    #[error("Sandbox environment failure: {0}")]
    EnvironmentFailure(String),

    // =========================================================================
    // Remote Dispatch Errors
    // =========================================================================
    #[error("Remote dispatch error: {0}")]
    Remote(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create an invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a path escape error.
    pub fn path_escape(path: impl Into<String>, root: impl Into<String>) -> Self {
        Self::PathEscape {
            path: path.into(),
            root: root.into(),
        }
    }

    /// Create an environment failure error.
    pub fn environment(msg: impl Into<String>) -> Self {
        Self::EnvironmentFailure(msg.into())
    }

    /// Create a remote dispatch error.
    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the caller may retry the same request and expect a different outcome.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted { .. } | Self::ShuttingDown | Self::EnvironmentFailure(_)
        )
    }

    /// Whether the fault lies with the environment rather than the request.
    ///
    /// A handle that produced one of these must not be handed out again.
    pub fn compromises_environment(&self) -> bool {
        matches!(
            self,
            Self::EnvironmentFailure(_) | Self::Timeout(_) | Self::Other(_) | Self::Internal(_)
        )
    }

    /// Map to the execution-level error kind, where one applies.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::InvalidRequest(_) => Some(ErrorKind::InvalidRequest),
            Self::Timeout(_) => Some(ErrorKind::Timeout),
            Self::EnvironmentFailure(_) => Some(ErrorKind::EnvironmentFailure),
            _ => None,
        }
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::PathEscape { .. } => "path_escape",
            Self::NotADirectory(_) => "not_a_directory",
            Self::FileNotFound(_) => "file_not_found",
            Self::PoolExhausted { .. } => "pool_exhausted",
            Self::ShuttingDown => "shutting_down",
            Self::Timeout(_) => "timeout",
            Self::EnvironmentFailure(_) => "environment_failure",
            Self::Remote(_) => "remote_error",
            Self::Config(_) => "config_error",
            Self::Serialization(_) => "serialization_error",
            Self::Internal(_) | Self::Other(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::PoolExhausted { waited_ms: 0 }.retryable());
        assert!(Error::ShuttingDown.retryable());
        assert!(Error::environment("gone").retryable());
        assert!(!Error::invalid_request("empty").retryable());
        assert!(!Error::path_escape("../x", "/workspace").retryable());
    }

    #[test]
    fn test_file_contract_errors_do_not_compromise() {
        assert!(!Error::NotADirectory("/workspace/a.txt".into()).compromises_environment());
        assert!(!Error::FileNotFound("/workspace/missing".into()).compromises_environment());
        assert!(!Error::path_escape("/etc", "/workspace").compromises_environment());
        assert!(Error::environment("container vanished").compromises_environment());
        assert!(Error::Timeout(5).compromises_environment());
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::Timeout(1).kind(), Some(ErrorKind::Timeout));
        assert_eq!(
            Error::environment("x").kind(),
            Some(ErrorKind::EnvironmentFailure)
        );
        assert_eq!(Error::ShuttingDown.kind(), None);
    }
}
