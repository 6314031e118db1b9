//! The event-registration decorator contract, realized as an explicit
//! dispatcher (spec §4.6, §9).
//!
//! The source language marks a method with a decorator that transparently
//! wraps every call in an `Action`, executes it, and appends a completed
//! event to the log. A systems-language port cannot attach behavior to a
//! method at class-definition time without macros that obscure what
//! runs, so this crate makes the wrapping explicit: `Environment` never
//! calls `App::invoke_tool` directly — it always goes through
//! [`ToolDispatcher::dispatch`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use evalsim_kernel::action::{Action, ToolMetadata};
use evalsim_kernel::app::App;
use evalsim_kernel::error::EngineError;
use evalsim_kernel::event::{CompletedEvent, EventType};
use rand::Rng;
use serde_json::Value;

/// Wraps tool invocation in the log-producing behavior the source
/// language's decorator applied implicitly. One dispatcher per
/// `Environment`; it does not own the apps themselves (those live in
/// [`crate::registry::AppRegistry`]) so it can be threaded through
/// without fighting the borrow checker over `&mut App`.
#[derive(Default)]
pub struct ToolDispatcher {
    /// Set while a [`SuppressLogging`] guard is alive. A composite app
    /// operation (reply-to-email calling add-email internally) holds the
    /// guard for the duration of its own tool body so the inner call
    /// does not produce a second completed event (spec §4.6).
    suppressed: AtomicBool,
}

impl ToolDispatcher {
    pub fn new() -> Self {
        Self { suppressed: AtomicBool::new(false) }
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::SeqCst)
    }

    /// Temporarily suppress logging for the duration of the returned
    /// guard. Re-entrant: nesting two guards is harmless, the inner one
    /// simply restores suppression rather than clearing it, since the
    /// outer composite operation is still in progress when the inner
    /// guard drops.
    pub fn suppress_guard(&self) -> SuppressLogging<'_> {
        let was_suppressed = self.suppressed.swap(true, Ordering::SeqCst);
        SuppressLogging { dispatcher: self, restore_to: was_suppressed }
    }

    /// Invoke `app`'s tool, and — unless suppression is active — build
    /// the [`CompletedEvent`] the caller should append to the log.
    ///
    /// Returns `(return_value_or_error, Some(completed_event))` normally;
    /// the completed event is `None` only when a [`SuppressLogging`]
    /// guard is held, mirroring the source language's scope guard around
    /// composite operations.
    pub async fn dispatch(
        &self,
        event_id: impl Into<String>,
        event_time: f64,
        event_type: EventType,
        app: &mut dyn App,
        action: &Action,
        dependencies: Vec<String>,
        successors: Vec<String>,
    ) -> (Result<Value, String>, Option<CompletedEvent>) {
        let event_id = event_id.into();
        let outcome = match trip_failure_injection(&action.tool_metadata) {
            Some(message) => Err(EngineError::ToolFailureInjection(message).to_string()),
            None => app.invoke_tool(&action.tool, &action.resolved_args).await.map_err(|e| e.to_string()),
        };
        if self.is_suppressed() {
            return (outcome, None);
        }
        let completed = match &outcome {
            Ok(value) => CompletedEvent::success(
                event_id.clone(),
                event_time,
                event_type,
                action.app.clone(),
                action.tool.clone(),
                action.resolved_args.clone(),
                dependencies,
                successors,
                value.clone(),
            ),
            Err(err) => CompletedEvent::error(
                event_id.clone(),
                event_time,
                event_type,
                action.app.clone(),
                action.tool.clone(),
                action.resolved_args.clone(),
                dependencies,
                successors,
                err.to_string(),
                None,
            ),
        };
        (outcome, Some(completed))
    }
}

/// Roll the dice against a tool's configured failure probability (spec
/// §3.5, §6, §7). Returns `Some(message)` when injection trips, in which
/// case the caller must treat it exactly like a real tool error — the
/// dispatcher does not distinguish the two once tripped.
fn trip_failure_injection(tool_metadata: &ToolMetadata) -> Option<String> {
    let probability = tool_metadata.failure_probability?;
    if rand::thread_rng().gen::<f64>() >= probability {
        return None;
    }
    Some(match &tool_metadata.failure_message_template {
        Some(template) => template.replace("{tool}", &tool_metadata.public_name),
        None => format!("injected failure for {}", tool_metadata.private_name),
    })
}

/// RAII guard returned by [`ToolDispatcher::suppress_guard`]. Drop clears
/// suppression, unless an outer guard is still alive, in which case it
/// restores the prior (suppressed) state instead of clearing it.
pub struct SuppressLogging<'a> {
    dispatcher: &'a ToolDispatcher,
    restore_to: bool,
}

impl Drop for SuppressLogging<'_> {
    fn drop(&mut self) {
        self.dispatcher.suppressed.store(self.restore_to, Ordering::SeqCst);
    }
}

/// The capture-mode sibling of an app: methods with the same signature
/// as the app's tools, but which build an un-executed
/// [`evalsim_kernel::event::Event`] instead of invoking anything (spec
/// §4.6, §9). Scenario authors hold one `AppCapture` per app and call
/// its builder methods to compose the future event DAG declaratively.
///
/// This is deliberately a thin, generic builder rather than one method
/// per concrete tool — concrete apps are out of scope for this crate;
/// `evalsim-apps` wraps this type with typed convenience constructors
/// (e.g. `MailCapture::add_email(...)`).
pub struct AppCapture {
    app_name: String,
}

impl AppCapture {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self { app_name: app_name.into() }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Build an un-executed `Action` event for `tool` with `args`,
    /// without running anything — the capture-mode equivalent of calling
    /// the tool directly.
    pub fn capture_action(
        &self,
        tool: impl Into<String>,
        args: HashMap<String, evalsim_kernel::arg::Arg>,
        tool_metadata: ToolMetadata,
    ) -> Action {
        Action::new(self.app_name.clone(), tool, args, tool_metadata)
    }

    /// As [`Self::capture_action`], but wraps the result in a full
    /// [`evalsim_kernel::event::Event`] with a generated id, ready to
    /// hand to [`crate::scenario::Scenario::with_event`]. Scenario
    /// authors composing a DAG declaratively rarely have a natural id of
    /// their own for each future step.
    pub fn capture_event(
        &self,
        tool: impl Into<String>,
        args: HashMap<String, evalsim_kernel::arg::Arg>,
        tool_metadata: ToolMetadata,
        event_type: EventType,
    ) -> evalsim_kernel::event::Event {
        let action = self.capture_action(tool, args, tool_metadata);
        evalsim_kernel::event::Event::new_with_generated_id(event_type, evalsim_kernel::event::EventKind::Action(action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppress_guard_sets_and_clears_flag() {
        let dispatcher = ToolDispatcher::new();
        assert!(!dispatcher.is_suppressed());
        {
            let _guard = dispatcher.suppress_guard();
            assert!(dispatcher.is_suppressed());
        }
        assert!(!dispatcher.is_suppressed());
    }

    #[test]
    fn nested_guards_restore_suppressed_state_on_inner_drop() {
        let dispatcher = ToolDispatcher::new();
        let outer = dispatcher.suppress_guard();
        {
            let _inner = dispatcher.suppress_guard();
            assert!(dispatcher.is_suppressed());
        }
        // inner guard dropped, but outer is still alive: must stay suppressed
        assert!(dispatcher.is_suppressed());
        drop(outer);
        assert!(!dispatcher.is_suppressed());
    }

    #[tokio::test]
    async fn dispatch_builds_completed_event_unless_suppressed() {
        use async_trait::async_trait;
        use evalsim_kernel::action::{OperationTag, RoleTag, TypeTag};
        use evalsim_kernel::error::EngineResult;
        use serde_json::json;

        struct Echo;
        #[async_trait]
        impl App for Echo {
            fn name(&self) -> &str {
                "Echo"
            }
            fn tools(&self) -> Vec<ToolMetadata> {
                vec![]
            }
            async fn invoke_tool(&mut self, _tool: &str, _args: &HashMap<String, Value>) -> EngineResult<Value> {
                Ok(json!({"ok": true}))
            }
            fn get_state(&self) -> Value {
                json!({})
            }
            fn load_state(&mut self, _state: Value) -> EngineResult<()> {
                Ok(())
            }
            fn reset(&mut self) {}
        }

        let dispatcher = ToolDispatcher::new();
        let mut app = Echo;
        let meta = ToolMetadata::new("Echo", "ping", TypeTag::Any, OperationTag::Read, RoleTag::App);
        let action = Action::new("Echo", "ping", HashMap::new(), meta);

        let (result, completed) = dispatcher
            .dispatch("e1", 1.0, EventType::Agent, &mut app, &action, vec![], vec![])
            .await;
        assert!(result.is_ok());
        assert!(completed.is_some());

        let _guard = dispatcher.suppress_guard();
        let (result2, completed2) = dispatcher
            .dispatch("e2", 2.0, EventType::Agent, &mut app, &action, vec![], vec![])
            .await;
        assert!(result2.is_ok());
        assert!(completed2.is_none());
    }

    #[tokio::test]
    async fn dispatch_honors_tripped_failure_injection_without_invoking_the_tool() {
        use async_trait::async_trait;
        use evalsim_kernel::action::{OperationTag, RoleTag, TypeTag};
        use evalsim_kernel::error::EngineResult;
        use serde_json::json;

        struct Unreachable;
        #[async_trait]
        impl App for Unreachable {
            fn name(&self) -> &str {
                "Unreachable"
            }
            fn tools(&self) -> Vec<ToolMetadata> {
                vec![]
            }
            async fn invoke_tool(&mut self, _tool: &str, _args: &HashMap<String, Value>) -> EngineResult<Value> {
                panic!("invoke_tool must not run once failure injection trips");
            }
            fn get_state(&self) -> Value {
                json!({})
            }
            fn load_state(&mut self, _state: Value) -> EngineResult<()> {
                Ok(())
            }
            fn reset(&mut self) {}
        }

        let dispatcher = ToolDispatcher::new();
        let mut app = Unreachable;
        let meta = ToolMetadata::new("Unreachable", "ping", TypeTag::Any, OperationTag::Read, RoleTag::App)
            .with_failure_injection(1.0, "{tool} is down for maintenance");
        let action = Action::new("Unreachable", "ping", HashMap::new(), meta);

        let (result, completed) = dispatcher
            .dispatch("e1", 1.0, EventType::Agent, &mut app, &action, vec![], vec![])
            .await;

        let err = result.unwrap_err();
        assert!(err.contains("ping is down for maintenance"), "unexpected message: {err}");
        assert!(err.contains("tool failure injection"));
        let completed = completed.expect("non-suppressed dispatch still logs the failed event");
        assert_eq!(completed.status, evalsim_kernel::event::CompletedStatus::Error);
    }

    #[test]
    fn failure_injection_never_trips_without_a_configured_probability() {
        let meta = ToolMetadata::new(
            "Echo",
            "ping",
            evalsim_kernel::action::TypeTag::Any,
            evalsim_kernel::action::OperationTag::Read,
            evalsim_kernel::action::RoleTag::App,
        );
        assert!(trip_failure_injection(&meta).is_none());
    }

    #[test]
    fn capture_event_generates_a_distinct_id_per_call() {
        use evalsim_kernel::action::{OperationTag, RoleTag, TypeTag};
        use evalsim_kernel::event::EventKind;

        let capture = AppCapture::new("Echo");
        let meta = ToolMetadata::new("Echo", "ping", TypeTag::Any, OperationTag::Read, RoleTag::App);
        let e1 = capture.capture_event("ping", HashMap::new(), meta.clone(), EventType::Agent);
        let e2 = capture.capture_event("ping", HashMap::new(), meta, EventType::Agent);

        assert_ne!(e1.event_id, e2.event_id);
        assert!(matches!(e1.kind, EventKind::Action(_)));
    }
}
