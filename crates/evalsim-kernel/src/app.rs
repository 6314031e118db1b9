//! The `App` trait — the extension point every simulated application
//! (mail client, calendar, reminder service, ...) implements (spec §4.6).
//!
//! Grounded on `mofa-kernel::agent::core::MoFAAgent`: one required trait
//! with identity, lifecycle, and a single dispatch method, rather than a
//! pile of per-tool trait methods. Unlike `MoFAAgent`, `App` does not own
//! its own event loop — `evalsim-runtime::Environment` drives every call
//! through the dispatcher in `evalsim-runtime::dispatch`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::action::ToolMetadata;
use crate::error::EngineResult;

/// A protocol an app participates in, used for cross-app discovery at
/// registration time (e.g. a reminder app discovering which app exposes
/// the `"messaging"` protocol so it knows where to deliver a due
/// reminder). Concrete protocol payloads are out of scope here; this
/// crate only carries the identifier apps register against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Protocol(pub String);

impl Protocol {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

/// One simulated application.
///
/// # Lifecycle
///
/// `reset()` returns the app to its scenario-initial state; `get_state`/
/// `load_state` round-trip that state through `Environment`'s dump/load
/// machinery (spec §6). `delete_future_data` is called when the
/// controller rewinds virtual time (e.g. a test harness re-running from
/// an earlier checkpoint) so an app doesn't leave records dated after
/// the new "now".
#[async_trait]
pub trait App: Send + Sync {
    /// Stable name used as the `app` field of every `Action` this app
    /// handles, and as the prefix of its tools' private names.
    fn name(&self) -> &str;

    /// Every tool this app exposes, with its full typed signature.
    fn tools(&self) -> Vec<ToolMetadata>;

    /// Protocols this app participates in. Default: none.
    fn protocols(&self) -> &[Protocol] {
        &[]
    }

    /// Called once, after every app has been registered, with the
    /// resolved `Protocol -> app name` mapping for every protocol any
    /// registered app declared. Default: no-op.
    fn on_protocols_resolved(&mut self, _resolved: &HashMap<Protocol, String>) {}

    /// Invoke one of this app's tools by its public name.
    async fn invoke_tool(&mut self, tool: &str, args: &HashMap<String, Value>) -> EngineResult<Value>;

    /// A JSON snapshot of this app's entire internal state.
    fn get_state(&self) -> Value;

    /// Replace this app's internal state with a previously captured
    /// snapshot.
    fn load_state(&mut self, state: Value) -> EngineResult<()>;

    /// Reset to the state this app had immediately after scenario setup.
    fn reset(&mut self);

    /// Discard any internally tracked record dated at or after `cutoff`
    /// (virtual time), used when the controller rewinds the clock.
    fn delete_future_data(&mut self, _cutoff: f64) {}

    /// Called once per loop tick, before any event scheduled at `now` is
    /// processed, with the current virtual time. Default: no-op. Most
    /// apps never need this; it exists for the rare app (the AUI
    /// messaging surface's `get_current_time` tool) that needs to read
    /// "now" without the engine threading a time argument through every
    /// tool call.
    fn on_tick(&mut self, _now: f64) {}

    /// Downcast to this app's [`ReminderSource`] facet, if it has one.
    ///
    /// `evalsim-runtime::NotificationSystem::scan_reminders` needs to
    /// query every registered app for due reminders without knowing any
    /// concrete app type; rather than reach for `std::any::Any`
    /// downcasting or trait-object upcasting (unstable across the Rust
    /// versions this crate targets), apps that implement [`ReminderSource`]
    /// simply override this accessor to return `Some(self)`. Default: none.
    fn as_reminder_source(&self) -> Option<&dyn ReminderSource> {
        None
    }
}

/// One reminder an app is tracking, as seen by the notification system's
/// due-time scan (spec §4.5).
#[derive(Debug, Clone, PartialEq)]
pub struct Reminder {
    /// Stable identifier, unique within the owning app, used as half of
    /// the `(app, reminder_id)` at-most-once delivery key.
    pub reminder_id: String,
    pub due_at: f64,
    pub message: String,
}

/// Implemented by apps that track due-time reminders the notification
/// system should scan for and surface at most once each (spec §4.5). The
/// Rust equivalent of the source language's concrete `ReminderApp` base
/// class, kept to the one query the engine actually needs.
pub trait ReminderSource: Send + Sync {
    /// Every reminder currently known to this app whose due time has
    /// passed `now`, regardless of whether it was already notified —
    /// `NotificationSystem` is responsible for at-most-once filtering via
    /// its own last-seen bookkeeping, so this app-level query stays pure.
    fn due_reminders(&self, now: f64) -> Vec<Reminder>;
}
