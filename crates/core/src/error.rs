//! Error types for the code-mode bridge.

use thiserror::Error;

/// Result type alias using the bridge's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type shared by every layer of the bridge.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Protocol Errors
    // =========================================================================
    #[error("Protocol error: {0}")]
    Protocol(String),

    // =========================================================================
    // Tool Errors
    // =========================================================================
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Schema error: {0}")]
    Schema(String),

    /// The tool ran and reported a failure; the text is passed through as is.
    #[error("{0}")]
    ToolFailed(String),

    // =========================================================================
    // Connection Errors
    // =========================================================================
    #[error("Connection unavailable: {0}")]
    ConnectionUnavailable(String),

    #[error("{0}")]
    ConnectionClosed(String),

    #[error("{0}")]
    Timeout(String),

    // =========================================================================
    // Tool Server Errors
    // =========================================================================
    #[error("Transport error: {0}")]
    Transport(String),

    // =========================================================================
    // Sandbox Errors
    // =========================================================================
    #[error("Sandbox error: {0}")]
    Sandbox(String),

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
    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a tool not found error.
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound(name.into())
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a schema compilation error.
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create a tool-reported failure.
    pub fn tool_failed(msg: impl Into<String>) -> Self {
        Self::ToolFailed(msg.into())
    }

    /// Create a connection unavailable error.
    pub fn connection_unavailable(id: impl Into<String>) -> Self {
        Self::ConnectionUnavailable(id.into())
    }

    /// Create a connection closed error.
    pub fn connection_closed(msg: impl Into<String>) -> Self {
        Self::ConnectionClosed(msg.into())
    }

    /// Create a timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a sandbox error.
    pub fn sandbox(msg: impl Into<String>) -> Self {
        Self::Sandbox(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
