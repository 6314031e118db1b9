//! The AUI ("agent user interface") app: the thin messaging surface an
//! agent under evaluation and a scripted user proxy talk through.
//!
//! `send_message_to_user` is the `App`-role tool the agent calls;
//! `send_message_to_agent` is the `User`-role tool a scenario's scripted
//! user actions call. Neither implements any agent policy — this app
//! only records the conversation transcript and returns the current
//! time, leaving `wait_for_notification`'s actual clock-jumping to
//! `evalsim_runtime::Environment` (spec §4.5, §9: "does not implement an
//! agent").

use std::collections::HashMap;

use async_trait::async_trait;
use evalsim_kernel::action::{OperationTag, ParamSpec, RoleTag, ToolMetadata, TypeTag};
use evalsim_kernel::app::App;
use evalsim_kernel::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageDirection {
    ToUser,
    ToAgent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub direction: MessageDirection,
    pub content: String,
    pub timestamp: f64,
}

/// The agent's messaging channel and clock query surface.
pub struct AuiApp {
    transcript: Vec<TranscriptEntry>,
    clock: f64,
}

impl AuiApp {
    pub fn new() -> Self {
        Self { transcript: Vec::new(), clock: 0.0 }
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }
}

impl Default for AuiApp {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl App for AuiApp {
    fn name(&self) -> &str {
        "AUI"
    }

    fn tools(&self) -> Vec<ToolMetadata> {
        vec![
            ToolMetadata::new("AUI", "send_message_to_user", TypeTag::Bool, OperationTag::Write, RoleTag::App)
                .with_params(vec![ParamSpec::new("content", TypeTag::Str)])
                .with_description("Send a message from the agent to the user."),
            ToolMetadata::new("AUI", "send_message_to_agent", TypeTag::Bool, OperationTag::Write, RoleTag::User)
                .with_params(vec![ParamSpec::new("content", TypeTag::Str)])
                .with_description("Deliver a message from the scripted user to the agent."),
            ToolMetadata::new("AUI", "get_current_time", TypeTag::Float, OperationTag::Read, RoleTag::App)
                .with_description("Read the current virtual time."),
        ]
    }

    async fn invoke_tool(&mut self, tool: &str, args: &HashMap<String, Value>) -> EngineResult<Value> {
        match tool {
            "send_message_to_user" => {
                let content = args
                    .get("content")
                    .and_then(Value::as_str)
                    .ok_or_else(|| EngineError::InvalidArgument("missing argument: content".into()))?;
                self.transcript.push(TranscriptEntry {
                    direction: MessageDirection::ToUser,
                    content: content.to_string(),
                    timestamp: self.clock,
                });
                Ok(json!(true))
            }
            "send_message_to_agent" => {
                let content = args
                    .get("content")
                    .and_then(Value::as_str)
                    .ok_or_else(|| EngineError::InvalidArgument("missing argument: content".into()))?;
                self.transcript.push(TranscriptEntry {
                    direction: MessageDirection::ToAgent,
                    content: content.to_string(),
                    timestamp: self.clock,
                });
                // The text content becomes the `CompletedEvent::return_value`
                // a `User`-typed event carries, which is exactly what
                // `NotificationPolicy::should_notify` surfaces verbatim.
                Ok(json!(content))
            }
            "get_current_time" => Ok(json!(self.clock)),
            other => Err(EngineError::NotFound(format!("AUI has no tool {other}"))),
        }
    }

    fn get_state(&self) -> Value {
        json!({ "transcript": self.transcript, "clock": self.clock })
    }

    fn load_state(&mut self, state: Value) -> EngineResult<()> {
        self.transcript = serde_json::from_value(state.get("transcript").cloned().unwrap_or(json!([])))?;
        self.clock = state.get("clock").and_then(Value::as_f64).unwrap_or(0.0);
        Ok(())
    }

    fn reset(&mut self) {
        tracing::debug!(app = "AUI", "clearing transcript");
        self.transcript.clear();
    }

    fn delete_future_data(&mut self, cutoff: f64) {
        let before = self.transcript.len();
        self.transcript.retain(|entry| entry.timestamp <= cutoff);
        if self.transcript.len() != before {
            tracing::debug!(app = "AUI", cutoff, dropped = before - self.transcript.len(), "rewound transcript entries");
        }
    }

    fn on_tick(&mut self, now: f64) {
        self.clock = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_message_to_agent_returns_content_for_notification_surfacing() {
        let mut app = AuiApp::new();
        app.on_tick(3.0);
        let mut args = HashMap::new();
        args.insert("content".into(), json!("please review the draft"));
        let result = app.invoke_tool("send_message_to_agent", &args).await.unwrap();
        assert_eq!(result, json!("please review the draft"));
        assert_eq!(app.transcript().len(), 1);
        assert_eq!(app.transcript()[0].timestamp, 3.0);
    }

    #[tokio::test]
    async fn get_current_time_reflects_last_observed_clock() {
        let mut app = AuiApp::new();
        app.on_tick(42.0);
        let result = app.invoke_tool("get_current_time", &HashMap::new()).await.unwrap();
        assert_eq!(result, json!(42.0));
    }

    #[tokio::test]
    async fn missing_content_argument_is_rejected() {
        let mut app = AuiApp::new();
        let err = app
            .invoke_tool("send_message_to_user", &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }
}
