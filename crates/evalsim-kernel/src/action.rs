//! Actions and tool metadata — the typed description of "what an app can
//! do" (spec §3.4–§3.5).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::arg::Arg;

/// Coarse type tag for a tool parameter or return value.
///
/// Stands in for the dynamically-typed parameter descriptions the source
/// language infers from method signatures at decoration time
/// (`are/simulation/tool_utils.py::AppToolArg`); Rust tool authors declare
/// these explicitly alongside their typed method signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum TypeTag {
    Str,
    Int,
    Float,
    Bool,
    List,
    Object,
    /// Escape hatch for app-specific enums/structs that don't map cleanly
    /// onto the tags above.
    Any,
}

/// `READ` vs `WRITE` classification of a tool, used by monitoring and by
/// scenario authors deciding which calls are safe to replay idempotently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationTag {
    Read,
    Write,
}

/// Which audience is allowed to invoke a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleTag {
    /// Callable by the agent under evaluation.
    App,
    /// Callable only by the environment's own scripted actions.
    Env,
    /// Callable only during data bootstrap (scenario setup, before the
    /// loop starts).
    Data,
    /// Callable only by a scripted user proxy (AUI).
    User,
}

/// One typed parameter of a [`ToolMetadata`] entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub type_tag: TypeTag,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, type_tag: TypeTag) -> Self {
        Self {
            name: name.into(),
            type_tag,
            default: None,
            description: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// A named, typed, documented operation on an app (spec §3.5).
///
/// Captured once at tool-registration time and snapshotted again at
/// action-creation time (`tool_metadata` on [`Action`]) so that a replayed
/// event log still shows the signature the tool had when it actually ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    /// Identifier used for event routing and audit, e.g. `"Mail__add_email"`.
    pub private_name: String,
    /// Identifier exposed to agents; may differ from `private_name`.
    pub public_name: String,
    pub params: Vec<ParamSpec>,
    pub return_type: TypeTag,
    pub operation: OperationTag,
    pub role: RoleTag,
    #[serde(default)]
    pub description: Option<String>,
    /// Probability in `[0, 1]` that this tool fails with
    /// [`crate::error::EngineError::ToolFailureInjection`] instead of
    /// running, for fault-injection scenarios.
    #[serde(default)]
    pub failure_probability: Option<f64>,
    #[serde(default)]
    pub failure_message_template: Option<String>,
}

impl ToolMetadata {
    pub fn new(
        app_name: &str,
        method_name: impl Into<String>,
        return_type: TypeTag,
        operation: OperationTag,
        role: RoleTag,
    ) -> Self {
        let method_name = method_name.into();
        Self {
            private_name: format!("{app_name}__{method_name}"),
            public_name: method_name,
            params: Vec::new(),
            return_type,
            operation,
            role,
            description: None,
            failure_probability: None,
            failure_message_template: None,
        }
    }

    pub fn with_public_name(mut self, public_name: impl Into<String>) -> Self {
        self.public_name = public_name.into();
        self
    }

    pub fn with_params(mut self, params: Vec<ParamSpec>) -> Self {
        self.params = params;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_failure_injection(
        mut self,
        probability: f64,
        message_template: impl Into<String>,
    ) -> Self {
        self.failure_probability = Some(probability);
        self.failure_message_template = Some(message_template.into());
        self
    }
}

/// A concrete invocation descriptor: tool + resolved arguments (spec §3.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub app: String,
    pub tool: String,
    pub raw_args: HashMap<String, Arg>,
    pub resolved_args: HashMap<String, Value>,
    pub tool_metadata: ToolMetadata,
}

impl Action {
    pub fn new(
        app: impl Into<String>,
        tool: impl Into<String>,
        raw_args: HashMap<String, Arg>,
        tool_metadata: ToolMetadata,
    ) -> Self {
        Self {
            app: app.into(),
            tool: tool.into(),
            raw_args,
            resolved_args: HashMap::new(),
            tool_metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_metadata_builds_private_name() {
        let meta = ToolMetadata::new(
            "Mail",
            "add_email",
            TypeTag::Str,
            OperationTag::Write,
            RoleTag::App,
        );
        assert_eq!(meta.private_name, "Mail__add_email");
        assert_eq!(meta.public_name, "add_email");
    }

    #[test]
    fn param_spec_required_vs_optional() {
        let required = ParamSpec::new("subject", TypeTag::Str);
        assert!(required.is_required());

        let optional = ParamSpec::new("cc", TypeTag::List).with_default(Value::Array(vec![]));
        assert!(!optional.is_required());
    }

    #[test]
    fn tool_metadata_round_trips_json() {
        let meta = ToolMetadata::new(
            "Mail",
            "add_email",
            TypeTag::Str,
            OperationTag::Write,
            RoleTag::App,
        )
        .with_params(vec![ParamSpec::new("subject", TypeTag::Str)])
        .with_failure_injection(0.1, "mail server unavailable");

        let json = serde_json::to_string(&meta).unwrap();
        let back: ToolMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back.private_name, "Mail__add_email");
        assert_eq!(back.failure_probability, Some(0.1));
    }
}
