//! Error types for the agent crate.
//!
//! This module re-exports the unified error type from core.

pub use parley_core::error::Error;
pub use parley_core::error::Result;

/// Reject caller input such as an empty user turn.
pub fn invalid_input(msg: impl Into<String>) -> Error {
    Error::Validation(msg.into())
}

/// Model output that could not be interpreted at `location`.
pub fn parse_failure(location: impl Into<String>, msg: impl Into<String>) -> Error {
    Error::Parse {
        location: location.into(),
        message: msg.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input() {
        let err = invalid_input("empty turn");
        assert!(err.to_string().contains("empty turn"));
        assert!(err.is_terminal());
    }

    #[test]
    fn test_parse_failure_is_recoverable() {
        let err = parse_failure("model output", "no tool call");
        assert!(err.to_string().contains("no tool call"));
        assert!(!err.is_terminal());
    }
}
