//! The on-disk scenario descriptor format: a `config`/`serde_yaml`
//! document naming which reference apps to register, the controller
//! flags to run under, and the future-event graph to schedule — parsed
//! once into an in-memory [`Scenario`], the way `mofa-cli`'s own
//! `config::loader` turns a YAML file into a typed struct before
//! anything runs.

use std::collections::HashMap as StdHashMap;

use anyhow::{bail, Context, Result};
use evalsim_apps::{AuiApp, MailApp, ReminderApp};
use evalsim_kernel::action::ToolMetadata;
use evalsim_kernel::app::App;
use evalsim_kernel::arg::Arg;
use evalsim_kernel::event::{Event, EventType, EventKind};
use evalsim_kernel::notification::NotableEventRule;
use evalsim_runtime::{EnvironmentConfig, Scenario, SilentPolicy, VerbosePolicy};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct ScenarioDescriptor {
    #[serde(default)]
    pub environment: EnvironmentSection,
    #[serde(default)]
    pub apps: Vec<String>,
    #[serde(default)]
    pub notable_events: Vec<NotableEventRule>,
    #[serde(default)]
    pub events: Vec<EventDescriptor>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EnvironmentSection {
    #[serde(default)]
    pub start_time: f64,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default = "default_time_increment")]
    pub time_increment_in_seconds: u64,
    #[serde(default)]
    pub oracle_mode: bool,
    #[serde(default)]
    pub queue_based_loop: bool,
    #[serde(default)]
    pub exit_when_no_events: bool,
    #[serde(default)]
    pub dump_dir: Option<String>,
    #[serde(default)]
    pub verbose_notifications: bool,
}

fn default_time_increment() -> u64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct EventDescriptor {
    pub id: String,
    pub app: String,
    pub tool: String,
    #[serde(default = "default_event_type")]
    pub event_type: EventType,
    #[serde(default)]
    pub time: Option<f64>,
    #[serde(default)]
    pub relative_time: f64,
    #[serde(default)]
    pub after: Vec<String>,
    #[serde(default)]
    pub args: StdHashMap<String, Value>,
}

fn default_event_type() -> EventType {
    EventType::Env
}

/// Instantiate a reference app by its descriptor name. Unrecognized
/// names are a hard configuration error rather than a silently empty
/// app set — a typo'd app name should fail the run loudly, not produce
/// a scenario where half the scheduled events have nowhere to land.
fn build_app(name: &str) -> Result<Box<dyn App>> {
    match name {
        "mail" => Ok(Box::new(MailApp::new("user@example.com"))),
        "aui" => Ok(Box::new(AuiApp::new())),
        "reminder" => Ok(Box::new(ReminderApp::new())),
        other => bail!("unknown app \"{other}\" in scenario descriptor"),
    }
}

fn find_tool_metadata(app: &dyn App, tool: &str) -> Option<ToolMetadata> {
    app.tools().into_iter().find(|t| t.public_name == tool)
}

impl ScenarioDescriptor {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .with_context(|| format!("loading scenario descriptor {}", path.display()))?;
        settings
            .try_deserialize()
            .with_context(|| format!("parsing scenario descriptor {}", path.display()))
    }

    /// Build the runtime [`EnvironmentConfig`] this descriptor calls for.
    pub fn environment_config(&self) -> EnvironmentConfig {
        let mut config = EnvironmentConfig::new(self.environment.start_time)
            .with_time_increment(self.environment.time_increment_in_seconds)
            .with_oracle_mode(self.environment.oracle_mode)
            .with_queue_based_loop(self.environment.queue_based_loop)
            .with_exit_when_no_events(self.environment.exit_when_no_events);
        if let Some(duration) = self.environment.duration {
            config = config.with_duration(duration);
        }
        if let Some(dump_dir) = &self.environment.dump_dir {
            config = config.with_dump_dir(dump_dir.clone());
        }
        config
    }

    pub fn notification_policy(&self) -> Box<dyn evalsim_kernel::notification::NotificationPolicy> {
        if self.environment.verbose_notifications {
            Box::new(VerbosePolicy::new(self.notable_events.clone()))
        } else {
            Box::new(SilentPolicy)
        }
    }

    /// Instantiate every named app, then build the dependency DAG of
    /// `Action` events against each app's own tool metadata so a
    /// misspelled tool name fails fast, before the loop ever starts.
    pub fn build_scenario(&self) -> Result<Scenario> {
        let apps: Vec<Box<dyn App>> =
            self.apps.iter().map(|name| build_app(name)).collect::<Result<_>>()?;

        let mut scenario = Scenario::new(self.environment.start_time)
            .with_time_increment(self.environment.time_increment_in_seconds);
        if let Some(duration) = self.environment.duration {
            scenario = scenario.with_duration(duration);
        }

        for event in &self.events {
            let app = apps
                .iter()
                .find(|a| a.name() == event.app)
                .with_context(|| format!("event {} references unregistered app {}", event.id, event.app))?;
            let tool_metadata = find_tool_metadata(app.as_ref(), &event.tool)
                .with_context(|| format!("event {} references unknown tool {}__{}", event.id, event.app, event.tool))?;

            let raw_args = event
                .args
                .iter()
                .map(|(k, v)| (k.clone(), Arg::parse(v.clone())))
                .collect();

            let action = evalsim_kernel::action::Action::new(event.app.clone(), event.tool.clone(), raw_args, tool_metadata);
            let mut built = Event::new(event.id.clone(), event.event_type, EventKind::Action(action))
                .with_dependencies(event.after.clone());
            if let Some(time) = event.time {
                built = built.with_event_time(time);
            }
            built.event_relative_time = event.relative_time;
            scenario = scenario.with_event(built);
        }

        for app in apps {
            scenario = scenario.with_app(app);
        }

        Ok(scenario)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_app_rejects_unknown_names() {
        let err = build_app("carrier_pigeon").unwrap_err();
        assert!(err.to_string().contains("unknown app"));
    }

    #[test]
    fn descriptor_parses_minimal_yaml() {
        let yaml = r#"
apps:
  - mail
  - aui
events:
  - id: e1
    app: AUI
    tool: send_message_to_agent
    event_type: User
    time: 1.0
    args:
      content: "hi there"
"#;
        let descriptor: ScenarioDescriptor = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(descriptor.apps, vec!["mail", "aui"]);
        assert_eq!(descriptor.events.len(), 1);
        assert_eq!(descriptor.events[0].event_type, EventType::User);
    }

    #[test]
    fn build_scenario_resolves_tool_metadata_and_rejects_typos() {
        let yaml = r#"
apps:
  - aui
events:
  - id: e1
    app: AUI
    tool: not_a_real_tool
    args: {}
"#;
        let descriptor: ScenarioDescriptor = serde_yaml::from_str(yaml).unwrap();
        let err = descriptor.build_scenario().unwrap_err();
        assert!(err.to_string().contains("unknown tool"));
    }

    #[test]
    fn build_scenario_builds_dependent_events() {
        let yaml = r#"
apps:
  - mail
events:
  - id: e1
    app: Mail
    tool: add_email
    args:
      sender: "bob@example.com"
      subject: "hi"
      content: "checking in"
  - id: e2
    app: Mail
    tool: get_emails
    after: [e1]
    args: {}
"#;
        let descriptor: ScenarioDescriptor = serde_yaml::from_str(yaml).unwrap();
        let scenario = descriptor.build_scenario().unwrap();
        assert_eq!(scenario.events.len(), 2);
        assert_eq!(scenario.events[1].dependencies, vec!["e1".to_string()]);
    }
}
