//! A reminder app: lets a scenario schedule due-time nudges that
//! `evalsim_runtime::NotificationSystem::scan_reminders` will surface at
//! most once each (spec §4.5), and that `wait_for_notification` treats
//! as a candidate in its three-way time-jump minimum.
//!
//! Kept to the one concrete class the notification system actually
//! needs, per `evalsim-kernel::app::ReminderSource`'s doc comment — the
//! Rust stand-in for the source language's `ReminderApp` base class.

use std::collections::HashMap;

use async_trait::async_trait;
use evalsim_kernel::action::{OperationTag, ParamSpec, RoleTag, ToolMetadata, TypeTag};
use evalsim_kernel::app::{App, Reminder as KernelReminder, ReminderSource};
use evalsim_kernel::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledReminder {
    pub reminder_id: String,
    pub due_at: f64,
    pub message: String,
}

/// Tracks a flat list of due-time reminders. Does not remove a reminder
/// once its due time has passed — `NotificationSystem` is solely
/// responsible for at-most-once delivery bookkeeping, so this app's
/// query (`due_reminders`) stays an idempotent, pure read.
pub struct ReminderApp {
    reminders: Vec<ScheduledReminder>,
}

impl ReminderApp {
    pub fn new() -> Self {
        Self { reminders: Vec::new() }
    }
}

impl Default for ReminderApp {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl App for ReminderApp {
    fn name(&self) -> &str {
        "Reminder"
    }

    fn tools(&self) -> Vec<ToolMetadata> {
        vec![
            ToolMetadata::new("Reminder", "schedule_reminder", TypeTag::Object, OperationTag::Write, RoleTag::App)
                .with_params(vec![
                    ParamSpec::new("due_at", TypeTag::Float),
                    ParamSpec::new("message", TypeTag::Str),
                ])
                .with_description("Schedule a due-time nudge the notification system will surface once."),
            ToolMetadata::new("Reminder", "cancel_reminder", TypeTag::Bool, OperationTag::Write, RoleTag::App)
                .with_params(vec![ParamSpec::new("reminder_id", TypeTag::Str)]),
            ToolMetadata::new("Reminder", "list_reminders", TypeTag::List, OperationTag::Read, RoleTag::App),
        ]
    }

    async fn invoke_tool(&mut self, tool: &str, args: &HashMap<String, Value>) -> EngineResult<Value> {
        match tool {
            "schedule_reminder" => {
                let due_at = args
                    .get("due_at")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| EngineError::InvalidArgument("missing argument: due_at".into()))?;
                let message = args
                    .get("message")
                    .and_then(Value::as_str)
                    .ok_or_else(|| EngineError::InvalidArgument("missing argument: message".into()))?
                    .to_string();
                let reminder = ScheduledReminder {
                    reminder_id: Uuid::new_v4().simple().to_string(),
                    due_at,
                    message,
                };
                let id = reminder.reminder_id.clone();
                self.reminders.push(reminder);
                Ok(json!({ "reminder_id": id }))
            }
            "cancel_reminder" => {
                let reminder_id = args
                    .get("reminder_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| EngineError::InvalidArgument("missing argument: reminder_id".into()))?;
                let before = self.reminders.len();
                self.reminders.retain(|r| r.reminder_id != reminder_id);
                Ok(json!(self.reminders.len() < before))
            }
            "list_reminders" => Ok(json!(self.reminders)),
            other => Err(EngineError::NotFound(format!("Reminder has no tool {other}"))),
        }
    }

    fn get_state(&self) -> Value {
        json!({ "reminders": self.reminders })
    }

    fn load_state(&mut self, state: Value) -> EngineResult<()> {
        self.reminders = serde_json::from_value(state.get("reminders").cloned().unwrap_or(json!([])))?;
        Ok(())
    }

    fn reset(&mut self) {
        tracing::debug!(app = "Reminder", "clearing scheduled reminders");
        self.reminders.clear();
    }

    fn delete_future_data(&mut self, cutoff: f64) {
        let before = self.reminders.len();
        self.reminders.retain(|r| r.due_at <= cutoff);
        if self.reminders.len() != before {
            tracing::debug!(app = "Reminder", cutoff, dropped = before - self.reminders.len(), "rewound scheduled reminders");
        }
    }

    fn as_reminder_source(&self) -> Option<&dyn ReminderSource> {
        Some(self)
    }
}

impl ReminderSource for ReminderApp {
    fn due_reminders(&self, now: f64) -> Vec<KernelReminder> {
        self.reminders
            .iter()
            .filter(|r| r.due_at <= now)
            .map(|r| KernelReminder {
                reminder_id: r.reminder_id.clone(),
                due_at: r.due_at,
                message: r.message.clone(),
            })
            .collect()
    }
}
