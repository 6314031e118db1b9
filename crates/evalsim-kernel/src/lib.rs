//! Pure data and trait contracts for the deterministic agent-evaluation
//! simulator: virtual time, events, the dependency DAG, tool metadata,
//! and the extension points (`App`, `NotificationPolicy`,
//! `AgentActionValidator`) that `evalsim-runtime` drives.
//!
//! Nothing in this crate touches tokio, the filesystem, or a concrete
//! app implementation — that split mirrors `mofa-kernel` vs.
//! `mofa-runtime`.

// error module
pub mod error;

// time module
pub mod time;

// argument resolution
pub mod arg;

// actions and tool metadata
pub mod action;

// events, the event log, and the scheduling queue
pub mod event;
pub mod log;
pub mod queue;

// application extension point
pub mod app;

// validation machinery
pub mod validation;

// notification types
pub mod notification;

pub use error::{EngineError, EngineResult};
