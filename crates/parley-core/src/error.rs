//! Unified error handling for Parley.
//!
//! A single error type shared by every crate in the workspace so that the
//! agent layer can propagate model, tool and parse failures with `?`.

use crate::llm::LlmError;
use crate::tools::ToolError;

/// Unified error type for Parley.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Model invocation errors. Terminal for the current turn.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Tool execution errors.
    #[error("Tool error: {0}")]
    Tool(String),

    /// Validation errors.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Timeout errors.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Parse errors with location context.
    #[error("Parse error at {location}: {message}")]
    Parse { location: String, message: String },

    /// The turn was cancelled by the caller.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Generic internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error ends the current turn.
    ///
    /// Parse and tool failures degrade locally; everything else is surfaced.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Error::Parse { .. } | Error::Tool(_))
    }
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;

#[macro_export]
macro_rules! config_err {
    ($msg:expr) => {
        $crate::error::Error::Config($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! llm_err {
    ($msg:expr) => {
        $crate::error::Error::Llm($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Llm(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! parse_err {
    ($location:expr, $msg:expr) => {
        $crate::error::Error::Parse {
            location: $location.into(),
            message: $msg.into(),
        }
    };
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<LlmError> for Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Timeout(secs) => Error::Timeout(format!("model call timed out after {secs}s")),
            other => Error::Llm(other.to_string()),
        }
    }
}

impl From<ToolError> for Error {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::NotFound(name) => Error::NotFound(format!("tool {name}")),
            other => Error::Tool(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Internal(format!("task join error: {err}"))
    }
}
