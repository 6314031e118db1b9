//! Runtime-level error type.
//!
//! `evalsim-kernel::EngineError` remains the error every tool call and
//! kernel data structure returns; this module adds the handful of
//! failure modes that only make sense once there is a live environment
//! (unknown app, duplicate registration, a malformed scenario) and wraps
//! both in an [`error_stack::Report`] at the boundaries the controller
//! actually calls, the same composition `mofa-runtime`'s `dora_adapter`
//! error module uses for its own leaf error type.

use error_stack::Report;
use thiserror::Error;

use evalsim_kernel::EngineError;

/// Errors raised by `evalsim-runtime` itself, above the kernel layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RuntimeError {
    /// A kernel-level failure (bad argument, not found, validation, ...).
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// `register_apps` was called with two apps sharing a name.
    #[error("app '{0}' is already registered")]
    DuplicateApp(String),

    /// A tool call or scenario event referenced an app that was never
    /// registered.
    #[error("no app named '{0}' is registered")]
    UnknownApp(String),

    /// A tool call referenced a tool name the app does not expose.
    #[error("app '{app}' has no tool named '{tool}'")]
    UnknownTool { app: String, tool: String },

    /// `EnvironmentConfig` failed its own consistency checks
    /// (`queue_based_loop` without `oracle_mode`, `time_increment_in_seconds == 0`, ...).
    #[error("invalid environment configuration: {0}")]
    InvalidConfig(String),

    /// `wait_for_notification` was invoked while another call was already
    /// in flight (spec §9: must fail fast, not support re-entrancy).
    #[error("wait_for_notification is not reentrant")]
    NotificationWaitReentrant,

    /// An operation was attempted from a state that does not allow it
    /// (e.g. `schedule` after the loop has already stopped).
    #[error("environment is in state {0:?}, which does not allow this operation")]
    InvalidState(crate::environment::EnvironmentState),
}

/// Convenience result alias for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// `error_stack`-backed result alias, used at the controller-facing
/// boundary (`Environment::run`, CLI entry points) where a caller wants
/// a full causal chain rather than just the leaf error.
pub type RuntimeReport<T> = std::result::Result<T, Report<RuntimeError>>;

/// Extension trait mirroring `mofa-runtime`'s `IntoDoraReport`: lifts a
/// plain [`RuntimeResult`] into a [`RuntimeReport`] at the point where
/// the caller wants `error_stack`'s attachments/context chain.
pub trait IntoRuntimeReport<T> {
    fn into_report(self) -> RuntimeReport<T>;
}

impl<T> IntoRuntimeReport<T> for RuntimeResult<T> {
    #[inline]
    fn into_report(self) -> RuntimeReport<T> {
        self.map_err(Report::new)
    }
}
