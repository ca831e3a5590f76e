//! Core error types.

use crate::automaton::StateId;
use thiserror::Error;

/// Errors raised while compiling a protocol.
///
/// Every variant is fatal to the compilation that produced it; the builder
/// never returns a partially built automaton.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("recursion label '{label}' is undefined or no longer in scope")]
    UndefinedOrInactiveRecursionLabel { label: String },

    #[error("empty activity list in {construct}: at least one activity is required")]
    EmptyActivityList { construct: &'static str },

    #[error("ambiguous dispatch key {key}: more than one branch selects on it")]
    AmbiguousDispatchKey { key: String },

    #[error("ambiguous interrupt: {reason}")]
    AmbiguousInterrupt { reason: String },

    #[error("interrupt already registered at state {state}")]
    InterruptConflict { state: StateId },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BuildError {
    /// Returns an error code suitable for machine-readable reports.
    pub fn error_code(&self) -> &'static str {
        match self {
            BuildError::UndefinedOrInactiveRecursionLabel { .. } => "UNDEFINED_RECURSION_LABEL",
            BuildError::EmptyActivityList { .. } => "EMPTY_ACTIVITY_LIST",
            BuildError::AmbiguousDispatchKey { .. } => "AMBIGUOUS_DISPATCH_KEY",
            BuildError::AmbiguousInterrupt { .. } => "AMBIGUOUS_INTERRUPT",
            BuildError::InterruptConflict { .. } => "INTERRUPT_CONFLICT",
            BuildError::Json(_) => "BAD_INPUT",
        }
    }

    /// Returns true if the error comes from the protocol's structure rather
    /// than from decoding its encoding.
    pub fn is_structural(&self) -> bool {
        !matches!(self, BuildError::Json(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = BuildError::UndefinedOrInactiveRecursionLabel {
            label: "loop".to_string(),
        };
        assert_eq!(err.error_code(), "UNDEFINED_RECURSION_LABEL");
        assert!(err.is_structural());
        assert_eq!(
            err.to_string(),
            "recursion label 'loop' is undefined or no longer in scope"
        );

        let err = BuildError::InterruptConflict {
            state: StateId::new(4),
        };
        assert_eq!(err.to_string(), "interrupt already registered at state s4");
    }

    #[test]
    fn test_json_error_is_not_structural() {
        let err: BuildError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.error_code(), "BAD_INPUT");
        assert!(!err.is_structural());
    }
}
