//! Scenario framing: the concrete apps + future-event DAG a run executes,
//! plus the post-run acceptance predicate (spec §4.7).

use evalsim_kernel::app::App;
use evalsim_kernel::event::Event;
use evalsim_kernel::validation::{EnvironmentView, ValidationOutcome};

/// A boxed post-run acceptance check. Takes a read-only view of the
/// finished environment and returns a structured outcome rather than
/// raising, consistent with every other validation step in this crate
/// (spec §9).
pub type ScenarioValidator = Box<dyn Fn(&dyn EnvironmentView) -> ValidationOutcome + Send + Sync>;

/// Assembles a concrete set of apps and a dependency graph of future
/// events for one run (spec §4.7). `Environment::run` consumes this to
/// reset time, register the apps, schedule the events, and start the
/// loop.
pub struct Scenario {
    pub apps: Vec<Box<dyn App>>,
    pub events: Vec<Event>,
    pub start_time: f64,
    pub duration: Option<f64>,
    pub time_increment_in_seconds: u64,
    pub validate: Option<ScenarioValidator>,
}

impl Scenario {
    pub fn new(start_time: f64) -> Self {
        Self {
            apps: Vec::new(),
            events: Vec::new(),
            start_time,
            duration: None,
            time_increment_in_seconds: 1,
            validate: None,
        }
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_time_increment(mut self, seconds: u64) -> Self {
        self.time_increment_in_seconds = seconds;
        self
    }

    pub fn with_app(mut self, app: Box<dyn App>) -> Self {
        self.apps.push(app);
        self
    }

    pub fn with_event(mut self, event: Event) -> Self {
        self.events.push(event);
        self
    }

    pub fn with_validator(mut self, validate: ScenarioValidator) -> Self {
        self.validate = Some(validate);
        self
    }
}
