//! A minimal mail client app: enough folder/send/receive surface to drive
//! dependency chains and notable-event rules through the engine.
//!
//! Grounded on `are/simulation/apps/email_client.py`'s `EmailClientApp` —
//! kept to the inbox/sent split and the handful of tools a scenario
//! actually needs to exercise scheduling, validation, and notifications.

use std::collections::HashMap;

use async_trait::async_trait;
use evalsim_kernel::action::{OperationTag, ParamSpec, RoleTag, ToolMetadata, TypeTag};
use evalsim_kernel::app::{App, Protocol};
use evalsim_kernel::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    pub email_id: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub content: String,
    pub timestamp: f64,
    pub is_read: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Folder {
    Inbox,
    Sent,
}

/// An app exposing a two-folder inbox/sent mailbox.
///
/// `add_email` is the `Env`-role entry point scripted scenario actions
/// use to simulate incoming mail; `send_email` is the `App`-role tool
/// the agent under evaluation calls.
pub struct MailApp {
    owner: String,
    inbox: Vec<Email>,
    sent: Vec<Email>,
}

impl MailApp {
    pub fn new(owner: impl Into<String>) -> Self {
        Self { owner: owner.into(), inbox: Vec::new(), sent: Vec::new() }
    }

    fn folder(&self, folder: Folder) -> &[Email] {
        match folder {
            Folder::Inbox => &self.inbox,
            Folder::Sent => &self.sent,
        }
    }

    fn folder_mut(&mut self, folder: Folder) -> &mut Vec<Email> {
        match folder {
            Folder::Inbox => &mut self.inbox,
            Folder::Sent => &mut self.sent,
        }
    }
}

fn string_arg(args: &HashMap<String, Value>, name: &str) -> EngineResult<String> {
    args.get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| EngineError::InvalidArgument(format!("missing argument: {name}")))
}

fn float_arg(args: &HashMap<String, Value>, name: &str, default: f64) -> f64 {
    args.get(name).and_then(Value::as_f64).unwrap_or(default)
}

fn string_list_arg(args: &HashMap<String, Value>, name: &str) -> Vec<String> {
    args.get(name)
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

#[async_trait]
impl App for MailApp {
    fn name(&self) -> &str {
        "Mail"
    }

    fn protocols(&self) -> &[Protocol] {
        // Declared so a reminder or AUI app can discover "who handles
        // mail" without hardcoding the app name.
        static PROTOCOLS: std::sync::OnceLock<Vec<Protocol>> = std::sync::OnceLock::new();
        PROTOCOLS.get_or_init(|| vec![Protocol::new("mail")])
    }

    fn tools(&self) -> Vec<ToolMetadata> {
        vec![
            ToolMetadata::new("Mail", "add_email", TypeTag::Object, OperationTag::Write, RoleTag::Env)
                .with_params(vec![
                    ParamSpec::new("sender", TypeTag::Str),
                    ParamSpec::new("subject", TypeTag::Str),
                    ParamSpec::new("content", TypeTag::Str),
                    ParamSpec::new("timestamp", TypeTag::Float).with_default(json!(0.0)),
                ])
                .with_description("Deliver a new message into the inbox, as a third party would."),
            ToolMetadata::new("Mail", "send_email", TypeTag::Object, OperationTag::Write, RoleTag::App)
                .with_params(vec![
                    ParamSpec::new("recipients", TypeTag::List),
                    ParamSpec::new("subject", TypeTag::Str),
                    ParamSpec::new("content", TypeTag::Str),
                ])
                .with_description("Send a message, filing a copy in the sent folder."),
            ToolMetadata::new("Mail", "get_emails", TypeTag::List, OperationTag::Read, RoleTag::App)
                .with_params(vec![
                    ParamSpec::new("folder", TypeTag::Str).with_default(json!("inbox")),
                    ParamSpec::new("offset", TypeTag::Int).with_default(json!(0)),
                    ParamSpec::new("limit", TypeTag::Int).with_default(json!(5)),
                ])
                .with_description("List messages in a folder, most recent first."),
            ToolMetadata::new("Mail", "mark_as_read", TypeTag::Bool, OperationTag::Write, RoleTag::App)
                .with_params(vec![ParamSpec::new("email_id", TypeTag::Str)]),
        ]
    }

    async fn invoke_tool(&mut self, tool: &str, args: &HashMap<String, Value>) -> EngineResult<Value> {
        match tool {
            "add_email" => {
                let email = Email {
                    email_id: Uuid::new_v4().simple().to_string(),
                    sender: string_arg(args, "sender")?,
                    recipients: vec![self.owner.clone()],
                    subject: string_arg(args, "subject")?,
                    content: string_arg(args, "content")?,
                    timestamp: float_arg(args, "timestamp", 0.0),
                    is_read: false,
                };
                let id = email.email_id.clone();
                self.inbox.insert(0, email);
                Ok(json!({ "email_id": id }))
            }
            "send_email" => {
                let email = Email {
                    email_id: Uuid::new_v4().simple().to_string(),
                    sender: self.owner.clone(),
                    recipients: string_list_arg(args, "recipients"),
                    subject: string_arg(args, "subject")?,
                    content: string_arg(args, "content")?,
                    timestamp: float_arg(args, "timestamp", 0.0),
                    is_read: true,
                };
                let id = email.email_id.clone();
                self.sent.insert(0, email);
                Ok(json!({ "email_id": id }))
            }
            "get_emails" => {
                let folder = match args.get("folder").and_then(Value::as_str).unwrap_or("inbox") {
                    "sent" => Folder::Sent,
                    _ => Folder::Inbox,
                };
                let offset = args.get("offset").and_then(Value::as_u64).unwrap_or(0) as usize;
                let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(5) as usize;
                let emails = self.folder(folder);
                if offset > emails.len() {
                    return Err(EngineError::InvalidArgument(format!(
                        "offset {offset} exceeds {} messages",
                        emails.len()
                    )));
                }
                let end = (offset + limit).min(emails.len());
                Ok(json!(emails[offset..end].to_vec()))
            }
            "mark_as_read" => {
                let email_id = string_arg(args, "email_id")?;
                let email = self
                    .inbox
                    .iter_mut()
                    .find(|e| e.email_id == email_id)
                    .ok_or_else(|| EngineError::NotFound(format!("email {email_id}")))?;
                email.is_read = true;
                Ok(json!(true))
            }
            other => Err(EngineError::NotFound(format!("Mail has no tool {other}"))),
        }
    }

    fn get_state(&self) -> Value {
        json!({ "owner": self.owner, "inbox": self.inbox, "sent": self.sent })
    }

    fn load_state(&mut self, state: Value) -> EngineResult<()> {
        self.owner = state
            .get("owner")
            .and_then(Value::as_str)
            .unwrap_or(&self.owner)
            .to_string();
        self.inbox = serde_json::from_value(state.get("inbox").cloned().unwrap_or(json!([])))?;
        self.sent = serde_json::from_value(state.get("sent").cloned().unwrap_or(json!([])))?;
        Ok(())
    }

    fn reset(&mut self) {
        tracing::debug!(app = "Mail", "clearing inbox and sent folders");
        self.inbox.clear();
        self.sent.clear();
    }

    fn delete_future_data(&mut self, cutoff: f64) {
        let before = self.inbox.len() + self.sent.len();
        self.inbox.retain(|e| e.timestamp <= cutoff);
        self.sent.retain(|e| e.timestamp <= cutoff);
        let dropped = before - (self.inbox.len() + self.sent.len());
        if dropped > 0 {
            tracing::debug!(app = "Mail", cutoff, dropped, "rewound past-cutoff messages");
        }
    }
}
