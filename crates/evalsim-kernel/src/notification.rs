//! Notification types exchanged between the environment and whatever is
//! driving the agent under evaluation (spec §4.5).
//!
//! The stateful owner of these (`NotificationSystem`, with its bounded
//! queue and reminder bookkeeping) lives in `evalsim-runtime`, since it
//! needs `tokio::sync` primitives and the app registry; this crate only
//! carries the message shapes and the policy trait, mirroring how
//! `mofa-kernel::bus` separates message types from the concrete bus.

use serde::{Deserialize, Serialize};

use crate::event::CompletedEvent;

/// Why a [`NotificationMessage`] was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    /// A scripted user proxy (AUI) sent the agent a message.
    UserMessage,
    /// A non-user environment event judged notable by the active
    /// [`NotificationPolicy`] (e.g. a reminder coming due).
    EnvironmentNotification,
    /// The environment reached a terminal state; no further notification
    /// will ever be delivered.
    EnvironmentStop,
    /// `wait_for_notification`'s deadline elapsed with nothing to report.
    WaitTimeout,
}

/// A file or structured payload riding along with a notification (e.g.
/// an email attachment referenced by a `UserMessage`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    pub data: serde_json::Value,
}

/// One item delivered by `wait_for_notification` or surfaced through the
/// notification queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub kind: NotificationKind,
    pub message: String,
    pub timestamp: f64,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl NotificationMessage {
    pub fn new(kind: NotificationKind, message: impl Into<String>, timestamp: f64) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp,
            attachments: Vec::new(),
        }
    }

    pub fn stop(timestamp: f64) -> Self {
        Self::new(NotificationKind::EnvironmentStop, "environment stopped", timestamp)
    }

    pub fn timeout(timestamp: f64) -> Self {
        Self::new(NotificationKind::WaitTimeout, "wait_for_notification timed out", timestamp)
    }
}

/// A data-driven rule describing which completed events a
/// [`NotificationPolicy`] should surface as notable, resolving spec §9's
/// "hardcoded notable-event list" open question in favor of
/// configuration rather than Rust match arms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotableEventRule {
    pub app: String,
    pub tool: String,
    /// Message template; `{return_value}` is substituted with the
    /// event's JSON return value when the rule fires.
    pub template: String,
}

impl NotableEventRule {
    pub fn matches(&self, event: &CompletedEvent) -> bool {
        event.app.as_deref() == Some(self.app.as_str()) && event.tool.as_deref() == Some(self.tool.as_str())
    }

    pub fn render(&self, event: &CompletedEvent) -> String {
        let value = event
            .return_value
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "null".to_string());
        self.template.replace("{return_value}", &value)
    }
}

/// Decides which completed events are worth surfacing as
/// [`NotificationMessage`]s. `evalsim-runtime` ships `SilentPolicy` and
/// `VerbosePolicy`; scenario authors may implement their own.
pub trait NotificationPolicy: Send + Sync {
    fn should_notify(&self, event: &CompletedEvent) -> Option<NotificationMessage>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn notable_event_rule_matches_app_and_tool() {
        let rule = NotableEventRule {
            app: "Reminder".into(),
            tool: "fire".into(),
            template: "reminder fired: {return_value}".into(),
        };
        let event = CompletedEvent::success(
            "e1",
            1.0,
            EventType::Env,
            "Reminder",
            "fire",
            HashMap::new(),
            vec![],
            vec![],
            json!({"id": 7}),
        );
        assert!(rule.matches(&event));
        assert_eq!(rule.render(&event), "reminder fired: {\"id\":7}");
    }

    #[test]
    fn notable_event_rule_does_not_match_other_tools() {
        let rule = NotableEventRule {
            app: "Reminder".into(),
            tool: "fire".into(),
            template: "x".into(),
        };
        let event = CompletedEvent::success(
            "e1",
            1.0,
            EventType::Env,
            "Reminder",
            "snooze",
            HashMap::new(),
            vec![],
            vec![],
            json!(null),
        );
        assert!(!rule.matches(&event));
    }
}
