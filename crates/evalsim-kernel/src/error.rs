//! Crate-level error types for `evalsim-kernel`.
//!
//! [`EngineError`] is the single error type threaded through the pure data
//! structures in this crate (queue, log, placeholder resolution, tool
//! metadata validation). `evalsim-runtime` composes it into its own
//! richer error type but never replaces it — tool-level failures are
//! always surfaced to callers as one of these variants, never as a
//! panic or an unwind through the event loop (spec §7).

use thiserror::Error;

use crate::validation::ValidationFailureReason;

/// All errors that can be returned by kernel-level operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// A caller-supplied value was malformed: a negative time offset, an
    /// unresolvable placeholder target, a bad enum tag, etc.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A referenced entity — event id, app name, tool name, reminder —
    /// does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A tool was invoked in a context it is not allowed to run in (role
    /// mismatch, sandboxed path traversal, ...).
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A scheduled validator, agent-action validator, or final check
    /// failed. Fatal: the event loop stops with `EnvironmentState::Failed`.
    #[error("validation failed: {0}")]
    ValidationFailure(#[from] ValidationFailureReason),

    /// The fault-injection path of a [`crate::action::ToolMetadata`]
    /// tripped. Indistinguishable from a real tool failure to the caller.
    #[error("tool failure injection: {0}")]
    ToolFailureInjection(String),

    /// An event id was `put` into a queue that already holds it.
    #[error("event already scheduled: {0}")]
    AlreadyExists(String),

    /// An assertion failed inside the engine itself (e.g. a successor
    /// carried an event kind the loop does not know how to schedule).
    #[error("internal engine error: {0}")]
    Internal(String),

    /// A JSON (de)serialization error, usually from state dump/load.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A low-level I/O error, usually from dump-dir writes.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result alias for kernel operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_argument_display() {
        let e = EngineError::InvalidArgument("offset must be >= 0".into());
        assert_eq!(e.to_string(), "invalid argument: offset must be >= 0");
    }

    #[test]
    fn not_found_display_contains_target() {
        let e = EngineError::NotFound("event-42".into());
        assert!(e.to_string().contains("event-42"));
    }

    #[test]
    fn serde_error_converts_via_from() {
        let bad = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let engine_err: EngineError = bad.into();
        assert!(matches!(engine_err, EngineError::Serialization(_)));
    }

    #[test]
    fn io_error_converts_via_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let engine_err: EngineError = io_err.into();
        assert!(matches!(engine_err, EngineError::Io(_)));
    }
}
