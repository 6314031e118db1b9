//! Argument values and placeholder resolution.
//!
//! The source language represents every argument as a plain string and
//! detects `"{{event_id.key1.key2}}"` placeholders by regex at dispatch
//! time (spec §4.2). The re-architecture notes in spec §9 call for a
//! strongly-typed replacement: [`Arg`] is parsed once, at event-construction
//! time, into either a literal value or a reference into a prior event's
//! return value.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::CompletedEvent;

/// One argument value in an event's `raw_args` map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Arg {
    /// A plain value, copied through unchanged at resolution time.
    Literal(Value),
    /// A reference to a (not-yet-completed) event's return value, walked
    /// through `path` once the referenced event completes.
    Ref { event_id: String, path: Vec<String> },
}

impl Arg {
    /// Build a literal argument.
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// Parse a caller-supplied value into an [`Arg`], recognizing the
    /// `"{{event_id.key1.key2}}"` placeholder shape (exact match on the
    /// whole string, whitespace-tolerant) and falling back to a literal
    /// for everything else — including strings that merely *contain* `{{`.
    pub fn parse(value: Value) -> Self {
        let Value::String(s) = &value else {
            return Self::Literal(value);
        };
        let trimmed = s.trim();
        let Some(inner) = trimmed
            .strip_prefix("{{")
            .and_then(|rest| rest.strip_suffix("}}"))
        else {
            return Self::Literal(value);
        };
        let inner = inner.trim();
        let mut parts = inner.split('.').map(str::trim).filter(|p| !p.is_empty());
        let Some(event_id) = parts.next() else {
            return Self::Literal(value);
        };
        let path: Vec<String> = parts.map(str::to_string).collect();
        if event_id.is_empty() {
            return Self::Literal(value);
        }
        Self::Ref {
            event_id: event_id.to_string(),
            path,
        }
    }

    /// Resolve this argument against a lookup function returning completed
    /// events by id. Unresolvable references are left as the literal
    /// placeholder string and logged, never treated as fatal (spec §4.2).
    pub fn resolve<'a, F>(&'a self, lookup: F) -> Value
    where
        F: FnOnce(&str) -> Option<&'a CompletedEvent>,
    {
        match self {
            Arg::Literal(v) => v.clone(),
            Arg::Ref { event_id, path } => match lookup(event_id) {
                Some(completed) => walk_path(completed.return_value.as_ref(), path)
                    .cloned()
                    .unwrap_or_else(|| {
                        tracing::warn!(
                            event_id = %event_id,
                            path = ?path,
                            "placeholder path did not resolve against event return value"
                        );
                        Value::String(self.placeholder_literal())
                    }),
                None => {
                    tracing::warn!(
                        event_id = %event_id,
                        "placeholder referenced an event that has not completed"
                    );
                    Value::String(self.placeholder_literal())
                }
            },
        }
    }

    fn placeholder_literal(&self) -> String {
        match self {
            Arg::Literal(_) => String::new(),
            Arg::Ref { event_id, path } => {
                if path.is_empty() {
                    format!("{{{{{event_id}}}}}")
                } else {
                    format!("{{{{{event_id}.{}}}}}", path.join("."))
                }
            }
        }
    }
}

fn walk_path<'a>(value: Option<&'a Value>, path: &[String]) -> Option<&'a Value> {
    let mut current = value?;
    for key in path {
        current = match current {
            Value::Object(map) => map.get(key)?,
            Value::Array(arr) => arr.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}
