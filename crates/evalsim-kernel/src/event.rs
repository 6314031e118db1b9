//! Events — the unit of scheduling, execution, and logging (spec §3.2–§3.3).
//!
//! An [`Event`] is a not-yet-executed entry in the [`crate::queue::EventQueue`];
//! a [`CompletedEvent`] is its immutable, serializable record once it has run,
//! appended to the [`crate::log::EventLog`]. Keeping these as separate types
//! (rather than one struct with optional result fields, as the source
//! language does) means a completed event can always be serialized without
//! dragging along the closures and trait objects a pending `ConditionCheck`
//! or `AgentValidation` event carries.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::Action;
use crate::arg::Arg;
use crate::validation::{AgentActionValidator, MilestoneSet};

/// Who or what originated an event, used for routing and for which
/// validators an event is visible to (spec §3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    User,
    Agent,
    Env,
    Condition,
    Validation,
}

/// The kind-specific payload of a pending event.
///
/// Deliberately not `Serialize`/`Deserialize`/`Clone`: `ConditionCheck`,
/// `Validation`, and `AgentValidation` all carry boxed predicates or
/// validator trait objects that only make sense in memory, for the
/// lifetime of one run. Persisted state is always the [`CompletedEvent`]
/// log, never the pending queue.
pub enum EventKind {
    /// Execute a tool call against a registered app.
    Action(Action),
    /// Re-check `predicate` every `check_interval_ticks` ticks until it
    /// succeeds or `timeout_ticks` elapses (spec §4.4, condition checks).
    ConditionCheck {
        milestone_set: MilestoneSet,
        achieved: std::collections::HashSet<String>,
        check_interval_ticks: u64,
        ticks_waited: u64,
    },
    /// A scheduled validator: evaluated on a fixed tick cadence regardless
    /// of agent activity.
    Validation {
        milestone_set: MilestoneSet,
        achieved: std::collections::HashSet<String>,
        check_interval_ticks: u64,
        ticks_waited: u64,
    },
    /// Installs an [`AgentActionValidator`] into the environment's active
    /// validator list; the event itself completes immediately, the
    /// validator lives on until its deadline or satisfaction.
    AgentValidation { validator: Box<dyn AgentActionValidator> },
    /// A scripted ground-truth action, executed identically to `Action`
    /// but exempt from fault injection and excluded from agent-facing
    /// transcripts (spec §3.6, oracle mode).
    Oracle(Action),
    /// Requests an orderly shutdown of the event loop once processed.
    Stop,
}

impl std::fmt::Debug for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Action(a) => f.debug_tuple("Action").field(&a.tool).finish(),
            EventKind::ConditionCheck { .. } => f.write_str("ConditionCheck(..)"),
            EventKind::Validation { .. } => f.write_str("Validation(..)"),
            EventKind::AgentValidation { validator } => {
                f.debug_struct("AgentValidation").field("id", &validator.id()).finish()
            }
            EventKind::Oracle(a) => f.debug_tuple("Oracle").field(&a.tool).finish(),
            EventKind::Stop => f.write_str("Stop"),
        }
    }
}

/// A not-yet-executed event sitting in the queue or the dependency DAG.
pub struct Event {
    pub event_id: String,
    /// Explicit absolute virtual time this event should fire at, if any.
    /// See [`Event::resolve_time`] for how this interacts with
    /// `dependencies`.
    pub event_time: Option<f64>,
    /// Time relative to the scenario's start, used only as a display aid
    /// and as the fallback ordering key when neither `event_time` nor a
    /// dependency resolves one.
    pub event_relative_time: f64,
    pub event_type: EventType,
    /// Event ids that must complete before this event becomes eligible.
    pub dependencies: Vec<String>,
    /// Event ids that list this event as a dependency — the forward edge
    /// of the DAG, populated by the scenario builder so completion can
    /// walk forward without scanning the whole graph (spec §3.3).
    pub successors: Vec<String>,
    pub kind: EventKind,
}

impl Event {
    pub fn new(
        event_id: impl Into<String>,
        event_type: EventType,
        kind: EventKind,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_time: None,
            event_relative_time: 0.0,
            event_type,
            dependencies: Vec::new(),
            successors: Vec::new(),
            kind,
        }
    }

    /// Build an event with a generated id, for callers (capture mode,
    /// agent-initiated scheduling) that don't have a natural one of
    /// their own to supply.
    pub fn new_with_generated_id(event_type: EventType, kind: EventKind) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), event_type, kind)
    }

    pub fn with_event_time(mut self, event_time: f64) -> Self {
        self.event_time = Some(event_time);
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Resolve the virtual time at which this event becomes eligible to
    /// run, given its already-completed dependencies.
    ///
    /// An explicit absolute `event_time` always wins over a time derived
    /// from dependencies, even when both are present — a scenario author
    /// who pins an event to a wall-clock-like moment means it, regardless
    /// of how its dependencies happen to resolve. When there is no
    /// explicit time, the event becomes eligible the moment its last
    /// dependency completes (the max of their completion times); with
    /// neither an explicit time nor dependencies, `event_relative_time`
    /// anchors it.
    pub fn resolve_time(&self, completed_dependencies: &[&CompletedEvent]) -> f64 {
        if let Some(explicit) = self.event_time {
            return explicit;
        }
        completed_dependencies
            .iter()
            .map(|dep| dep.event_time)
            .fold(None, |acc, t| Some(acc.map_or(t, |a: f64| a.max(t))))
            .unwrap_or(self.event_relative_time)
    }
}

/// Terminal status of a completed event, distinguishing an unremarkable
/// success from a tool exception or a condition-check timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletedStatus {
    Success,
    /// A `ConditionCheck`/`Validation` event whose predicate never
    /// succeeded before `timeout_ticks` elapsed.
    Timeout,
    /// The tool raised, or fault injection tripped.
    Error,
}

/// The immutable record of one executed event, as it appears in the
/// [`crate::log::EventLog`] and in state dumps (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedEvent {
    pub event_id: String,
    pub event_time: f64,
    pub event_type: EventType,
    pub app: Option<String>,
    pub tool: Option<String>,
    #[serde(default)]
    pub resolved_args: HashMap<String, Value>,
    pub dependencies: Vec<String>,
    pub successors: Vec<String>,
    pub return_value: Option<Value>,
    pub exception: Option<String>,
    #[serde(default)]
    pub exception_trace: Option<String>,
    pub status: CompletedStatus,
}

impl CompletedEvent {
    /// Build the record for a successfully executed action.
    pub fn success(
        event_id: impl Into<String>,
        event_time: f64,
        event_type: EventType,
        app: impl Into<String>,
        tool: impl Into<String>,
        resolved_args: HashMap<String, Value>,
        dependencies: Vec<String>,
        successors: Vec<String>,
        return_value: Value,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_time,
            event_type,
            app: Some(app.into()),
            tool: Some(tool.into()),
            resolved_args,
            dependencies,
            successors,
            return_value: Some(return_value),
            exception: None,
            exception_trace: None,
            status: CompletedStatus::Success,
        }
    }

    /// Build the record for a tool invocation that raised or was failed
    /// by fault injection.
    pub fn error(
        event_id: impl Into<String>,
        event_time: f64,
        event_type: EventType,
        app: impl Into<String>,
        tool: impl Into<String>,
        resolved_args: HashMap<String, Value>,
        dependencies: Vec<String>,
        successors: Vec<String>,
        exception: impl Into<String>,
        exception_trace: Option<String>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_time,
            event_type,
            app: Some(app.into()),
            tool: Some(tool.into()),
            resolved_args,
            dependencies,
            successors,
            return_value: None,
            exception: Some(exception.into()),
            exception_trace,
            status: CompletedStatus::Error,
        }
    }

    /// Build the record for a `ConditionCheck`/`Validation` event that
    /// timed out without its predicate succeeding.
    pub fn timeout(
        event_id: impl Into<String>,
        event_time: f64,
        event_type: EventType,
        dependencies: Vec<String>,
        successors: Vec<String>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_time,
            event_type,
            app: None,
            tool: None,
            resolved_args: HashMap::new(),
            dependencies,
            successors,
            return_value: None,
            exception: None,
            exception_trace: None,
            status: CompletedStatus::Timeout,
        }
    }

    /// Minimal constructor used by kernel unit tests (e.g. placeholder
    /// resolution against a prior event's return value) that don't care
    /// about the rest of the record.
    #[cfg(test)]
    pub fn new_for_test(event_id: impl Into<String>, return_value: Value) -> Self {
        Self {
            event_id: event_id.into(),
            event_time: 0.0,
            event_type: EventType::Env,
            app: None,
            tool: None,
            resolved_args: HashMap::new(),
            dependencies: Vec::new(),
            successors: Vec::new(),
            return_value: Some(return_value),
            exception: None,
            exception_trace: None,
            status: CompletedStatus::Success,
        }
    }
}

/// Raw args carried by an `Action`/`Oracle` event before resolution, kept
/// alongside so `Environment::process_event` can resolve them against the
/// log at execution time rather than at construction time (spec §4.2).
pub fn raw_args_of(kind: &EventKind) -> Option<&HashMap<String, Arg>> {
    match kind {
        EventKind::Action(action) | EventKind::Oracle(action) => Some(&action.raw_args),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, OperationTag, RoleTag, ToolMetadata, TypeTag};
    use serde_json::json;

    fn dummy_action() -> Action {
        let meta = ToolMetadata::new("Mail", "add_email", TypeTag::Str, OperationTag::Write, RoleTag::App);
        Action::new("Mail", "add_email", HashMap::new(), meta)
    }

    #[test]
    fn explicit_time_wins_over_dependency_time() {
        let event = Event::new("e2", EventType::Agent, EventKind::Action(dummy_action()))
            .with_event_time(100.0)
            .with_dependencies(vec!["e1".into()]);
        let dep = CompletedEvent::success(
            "e1",
            5.0,
            EventType::Agent,
            "Mail",
            "add_email",
            HashMap::new(),
            vec![],
            vec!["e2".into()],
            json!({"ok": true}),
        );
        assert_eq!(event.resolve_time(&[&dep]), 100.0);
    }

    #[test]
    fn dependency_time_used_when_no_explicit_time() {
        let event = Event::new("e2", EventType::Agent, EventKind::Action(dummy_action()))
            .with_dependencies(vec!["e1".into(), "e0".into()]);
        let dep1 = CompletedEvent::success(
            "e1", 5.0, EventType::Agent, "Mail", "add_email", HashMap::new(), vec![], vec![], json!(null),
        );
        let dep0 = CompletedEvent::success(
            "e0", 9.0, EventType::Agent, "Mail", "add_email", HashMap::new(), vec![], vec![], json!(null),
        );
        assert_eq!(event.resolve_time(&[&dep1, &dep0]), 9.0);
    }

    #[test]
    fn relative_time_used_with_no_time_or_dependencies() {
        let mut event = Event::new("e1", EventType::Agent, EventKind::Action(dummy_action()));
        event.event_relative_time = 42.0;
        assert_eq!(event.resolve_time(&[]), 42.0);
    }

    #[test]
    fn completed_event_round_trips_json() {
        let ev = CompletedEvent::success(
            "e1", 1.0, EventType::Agent, "Mail", "add_email", HashMap::new(), vec![], vec![], json!({"id": 1}),
        );
        let text = serde_json::to_string(&ev).unwrap();
        let back: CompletedEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(back.event_id, "e1");
        assert_eq!(back.status, CompletedStatus::Success);
    }
}
