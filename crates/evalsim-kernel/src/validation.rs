//! Validation machinery shared by scheduled validators, agent-action
//! validators, and condition checks (spec §4.4).
//!
//! Per the re-architecture notes in spec §9, validation failure is an
//! explicit return value rather than an exception: every validation step
//! returns a [`ValidationOutcome`], and the event loop (in `evalsim-runtime`)
//! inspects it to decide whether to transition the environment to
//! `Failed`.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::CompletedEvent;
use crate::log::EventLog;

/// A read-only view of engine state that predicates and validators can
/// inspect, without the kernel crate depending on the concrete
/// `Environment` type defined in `evalsim-runtime` — the same
/// kernel/foundation split the teacher uses for `AgentScheduler` /
/// `CronScheduler`.
pub trait EnvironmentView: Send + Sync {
    /// Current virtual time.
    fn current_time(&self) -> f64;
    /// The completed-event log, in execution order.
    fn event_log(&self) -> &EventLog;
    /// A snapshot of one registered app's state, if that app exists.
    fn app_state(&self, app_name: &str) -> Option<serde_json::Value>;
    /// Current tick count since the loop started.
    fn tick_count(&self) -> u64;
}

/// A named predicate over engine state.
///
/// The `label` is carried into [`ValidationFailureReason`] so a failed
/// run can say *which* milestone or minefield was responsible, without
/// the predicate closure itself needing to be `Debug`.
#[derive(Clone)]
pub struct Predicate {
    pub label: String,
    check: Arc<dyn Fn(&dyn EnvironmentView) -> bool + Send + Sync>,
}

impl Predicate {
    pub fn new(
        label: impl Into<String>,
        check: impl Fn(&dyn EnvironmentView) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            check: Arc::new(check),
        }
    }

    pub fn evaluate(&self, env: &dyn EnvironmentView) -> bool {
        (self.check)(env)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate").field("label", &self.label).finish()
    }
}

/// A set of milestones (must all become true) and minefields (must never
/// become true) evaluated within `timeout_ticks`, shared by all three
/// validator shapes (spec §4.4).
#[derive(Debug, Clone)]
pub struct MilestoneSet {
    pub milestones: Vec<Predicate>,
    pub minefields: Vec<Predicate>,
    pub timeout_ticks: u64,
}

impl MilestoneSet {
    pub fn new(milestones: Vec<Predicate>, minefields: Vec<Predicate>, timeout_ticks: u64) -> Self {
        Self {
            milestones,
            minefields,
            timeout_ticks,
        }
    }

    /// Evaluate every predicate once. Returns the first minefield label
    /// that fired, if any, and the set of milestone labels newly achieved
    /// this call (relative to `already_achieved`).
    pub fn evaluate(
        &self,
        env: &dyn EnvironmentView,
        already_achieved: &HashSet<String>,
    ) -> MilestoneEvaluation {
        for minefield in &self.minefields {
            if minefield.evaluate(env) {
                return MilestoneEvaluation {
                    triggered_minefield: Some(minefield.label.clone()),
                    newly_achieved: HashSet::new(),
                };
            }
        }
        let mut newly_achieved = HashSet::new();
        for milestone in &self.milestones {
            if !already_achieved.contains(&milestone.label) && milestone.evaluate(env) {
                newly_achieved.insert(milestone.label.clone());
            }
        }
        MilestoneEvaluation {
            triggered_minefield: None,
            newly_achieved,
        }
    }

    pub fn all_labels(&self) -> Vec<String> {
        self.milestones.iter().map(|m| m.label.clone()).collect()
    }
}

/// Result of evaluating a [`MilestoneSet`] once.
#[derive(Debug, Clone, Default)]
pub struct MilestoneEvaluation {
    pub triggered_minefield: Option<String>,
    pub newly_achieved: HashSet<String>,
}

/// Why a validation step failed (spec §7, `ValidationFailure`).
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationFailureReason {
    #[error("minefield triggered: {0}")]
    MinefieldTriggered(String),
    #[error("timeout with unmet milestones: {0:?}")]
    TimeoutWithUnmetMilestones(Vec<String>),
    #[error("agent validator '{validator}' timed out with unmet milestones: {unmet:?}")]
    AgentValidatorTimeout { validator: String, unmet: Vec<String> },
    #[error("validation events survived to final check: {0:?}")]
    SurvivingValidationEvents(Vec<String>),
}

/// The explicit result type every validation step returns, replacing the
/// exception-for-control-flow pattern of the source language (spec §9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Still waiting; carries the milestone labels achieved so far.
    Pending { achieved: HashSet<String> },
    /// All milestones achieved (or the predicate succeeded, for condition
    /// checks); no minefield fired.
    Succeeded,
    Failed(ValidationFailureReason),
}

impl ValidationOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, ValidationOutcome::Failed(_))
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, ValidationOutcome::Succeeded)
    }
}

/// Installed by an `AgentValidation` event into the environment's active
/// validator list; consulted on every subsequently completed
/// `EventType::Agent` event (spec §4.4).
#[async_trait]
pub trait AgentActionValidator: Send + Sync {
    /// Stable identifier used in failure messages and final-check reports.
    fn id(&self) -> &str;

    /// Evaluate this validator against one freshly completed agent event.
    async fn on_agent_event(
        &mut self,
        env: &dyn EnvironmentView,
        event: &CompletedEvent,
    ) -> ValidationOutcome;

    /// Tick count at which this validator's deadline expires. Checked by
    /// the loop independently of `on_agent_event` calls, since an agent
    /// may simply never act again.
    fn deadline_tick(&self) -> u64;

    /// Milestone labels not yet achieved, for final-check reporting.
    fn unmet_milestones(&self) -> Vec<String>;

    /// Whether every milestone has been achieved and no minefield fired.
    fn is_satisfied(&self) -> bool;
}
