//! Error types
//!
//! `ConfigError` covers everything that can be wrong with a server definition.
//! `PoolError` is what every pool, facade, registry and manager operation returns.
//! It is `Clone` because a single failed connect attempt is reported to every
//! caller that was waiting on it.

use thiserror::Error;

/// Result alias used across the pool crates
pub type PoolResult<T> = Result<T, PoolError>;

/// Invalid or conflicting server configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Server name must not be empty")]
    EmptyName,

    #[error("Server '{server}' has an empty command")]
    EmptyCommand { server: String },

    #[error("Server '{server}' uses the {transport} transport but has no url")]
    MissingUrl { server: String, transport: String },

    #[error("Server '{server}' has an invalid url: {reason}")]
    InvalidUrl { server: String, reason: String },

    #[error("Unknown transport type '{0}' (expected stdio, sse or streamable_http)")]
    InvalidTransport(String),

    #[error("Server '{server}' has an unparseable command: {reason}")]
    InvalidCommand { server: String, reason: String },

    #[error("Server '{server}' has a zero connect timeout")]
    InvalidTimeout { server: String },

    #[error("Server '{0}' is already configured")]
    DuplicateServer(String),

    #[error("Invalid value '{value}' for setting {key}")]
    InvalidSetting { key: String, value: String },

    #[error("Failed to parse server configuration: {0}")]
    Parse(String),
}

/// The coarse error categories callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    NotFound,
    Connection,
    ToolCall,
    PoolClosed,
    InvariantViolation,
}

/// A connection that could not be closed cleanly during teardown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFailure {
    pub server: String,
    pub message: String,
}

impl std::fmt::Display for CloseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.server, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Server '{0}' is not registered")]
    NotFound(String),

    #[error("Connection to '{server}' failed: {message}")]
    Connection { server: String, message: String },

    #[error("'{operation}' on '{server}' failed: {message}")]
    ToolCall {
        server: String,
        operation: String,
        message: String,
    },

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Connection pool has not been started")]
    NotRunning,

    #[error("Invariant violated for '{server}': {message}")]
    InvariantViolation { server: String, message: String },

    #[error("{} connection(s) failed to close: {}", .failures.len(), join_failures(.failures))]
    Teardown { failures: Vec<CloseFailure> },
}

fn join_failures(failures: &[CloseFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl PoolError {
    pub fn connection(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            server: server.into(),
            message: message.into(),
        }
    }

    pub fn tool_call(
        server: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ToolCall {
            server: server.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn invariant(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            PoolError::Config(_) => ErrorKind::Config,
            PoolError::NotFound(_) => ErrorKind::NotFound,
            PoolError::Connection { .. } | PoolError::Teardown { .. } => ErrorKind::Connection,
            PoolError::ToolCall { .. } => ErrorKind::ToolCall,
            PoolError::PoolClosed | PoolError::NotRunning => ErrorKind::PoolClosed,
            PoolError::InvariantViolation { .. } => ErrorKind::InvariantViolation,
        }
    }
}
