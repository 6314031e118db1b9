//! The `Environment` event loop, its error type, the app registry,
//! notification system, validators, scenario framing, and controller
//! configuration — everything `evalsim-kernel`'s pure data types need to
//! actually run (spec §4–§6).
//!
//! Mirrors the `mofa-kernel` / `mofa-runtime` split: this crate owns
//! tokio, the filesystem, and every concrete coordination primitive;
//! `evalsim-kernel` stays dependency-light pure data.

pub mod config;
pub mod dispatch;
pub mod environment;
pub mod error;
pub mod notification;
pub mod registry;
pub mod scenario;

pub use config::EnvironmentConfig;
pub use dispatch::{AppCapture, SuppressLogging, ToolDispatcher};
pub use environment::{Environment, EnvironmentState};
pub use error::{IntoRuntimeReport, RuntimeError, RuntimeReport, RuntimeResult};
pub use notification::{NotificationSystem, SilentPolicy, VerbosePolicy};
pub use registry::AppRegistry;
pub use scenario::{Scenario, ScenarioValidator};
