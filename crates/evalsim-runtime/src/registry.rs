//! The set of registered apps and the resolved protocol → app-name map
//! (spec §4.6, cross-app discovery).

use std::collections::HashMap;

use evalsim_kernel::app::{App, Protocol};
use serde_json::Value;

use crate::error::{RuntimeError, RuntimeResult};

/// Owns every app registered with an [`crate::environment::Environment`]
/// and the protocol-discovery map built once, after registration closes.
pub struct AppRegistry {
    apps: HashMap<String, Box<dyn App>>,
    /// Registration order, preserved so `get_tools_by_app` and state dumps
    /// read back deterministically rather than in hash-map order.
    order: Vec<String>,
    protocols: HashMap<Protocol, String>,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self {
            apps: HashMap::new(),
            order: Vec::new(),
            protocols: HashMap::new(),
        }
    }

    /// Register one app. Rejects a second app under the same name.
    pub fn register(&mut self, app: Box<dyn App>) -> RuntimeResult<()> {
        let name = app.name().to_string();
        if self.apps.contains_key(&name) {
            return Err(RuntimeError::DuplicateApp(name));
        }
        self.order.push(name.clone());
        self.apps.insert(name, app);
        Ok(())
    }

    /// Build the protocol → app-name map from every registered app's
    /// declared protocols, then hand it to each app via
    /// `on_protocols_resolved` (spec §4.6). Called once, after all
    /// `register` calls, by `Environment::register_apps`.
    ///
    /// A protocol claimed by more than one app keeps the first
    /// registration order wins (consistent with `order`), logging a
    /// warning — concrete protocol arbitration is an application
    /// concern, out of scope here.
    pub fn resolve_protocols(&mut self) {
        let mut resolved: HashMap<Protocol, String> = HashMap::new();
        for name in &self.order {
            let app = self.apps.get(name).expect("app in order must be registered");
            for protocol in app.protocols() {
                resolved.entry(protocol.clone()).or_insert_with(|| {
                    name.clone()
                });
            }
        }
        for name in &self.order {
            if let Some(app) = self.apps.get_mut(name) {
                app.on_protocols_resolved(&resolved);
            }
        }
        self.protocols = resolved;
    }

    pub fn protocol_owner(&self, protocol: &Protocol) -> Option<&str> {
        self.protocols.get(protocol).map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&dyn App> {
        self.apps.get(name).map(|b| b.as_ref())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Box<dyn App>> {
        self.apps.get_mut(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn apps_state_json(&self) -> Value {
        let mut entries = Vec::new();
        for name in &self.order {
            if let Some(app) = self.apps.get(name) {
                let mut state = app.get_state();
                if let Value::Object(map) = &mut state {
                    map.insert("app_name".to_string(), Value::String(name.clone()));
                } else {
                    let mut wrapper = serde_json::Map::new();
                    wrapper.insert("app_name".to_string(), Value::String(name.clone()));
                    wrapper.insert("state".to_string(), state);
                    state = Value::Object(wrapper);
                }
                entries.push(state);
            }
        }
        Value::Array(entries)
    }

    pub fn get_tools_by_app(&self) -> HashMap<String, Vec<evalsim_kernel::action::ToolMetadata>> {
        self.order
            .iter()
            .filter_map(|name| self.apps.get(name).map(|app| (name.clone(), app.tools())))
            .collect()
    }

    /// Only tools with [`evalsim_kernel::action::RoleTag::App`] — the
    /// surface actually exposed to the agent under evaluation (spec §6,
    /// `get_user_tools_by_app`... despite the Python name, this is the
    /// agent-facing list; the scripted-user surface is `RoleTag::User`).
    pub fn get_user_tools_by_app(&self) -> HashMap<String, Vec<evalsim_kernel::action::ToolMetadata>> {
        self.order
            .iter()
            .filter_map(|name| {
                self.apps.get(name).map(|app| {
                    let tools = app
                        .tools()
                        .into_iter()
                        .filter(|t| matches!(t.role, evalsim_kernel::action::RoleTag::App))
                        .collect();
                    (name.clone(), tools)
                })
            })
            .collect()
    }

    pub fn reset_all(&mut self) {
        for app in self.apps.values_mut() {
            app.reset();
        }
    }

    pub fn delete_future_data_all(&mut self, cutoff: f64) {
        for app in self.apps.values_mut() {
            app.delete_future_data(cutoff);
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for AppRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use evalsim_kernel::action::ToolMetadata;
    use evalsim_kernel::error::EngineResult;
    use serde_json::json;
    use std::collections::HashMap as StdHashMap;

    struct StubApp {
        name: String,
        protocols: Vec<Protocol>,
        resolved: Option<HashMap<Protocol, String>>,
    }

    #[async_trait]
    impl App for StubApp {
        fn name(&self) -> &str {
            &self.name
        }
        fn tools(&self) -> Vec<ToolMetadata> {
            Vec::new()
        }
        fn protocols(&self) -> &[Protocol] {
            &self.protocols
        }
        fn on_protocols_resolved(&mut self, resolved: &HashMap<Protocol, String>) {
            self.resolved = Some(resolved.clone());
        }
        async fn invoke_tool(&mut self, _tool: &str, _args: &StdHashMap<String, Value>) -> EngineResult<Value> {
            Ok(json!(null))
        }
        fn get_state(&self) -> Value {
            json!({"name": self.name})
        }
        fn load_state(&mut self, _state: Value) -> EngineResult<()> {
            Ok(())
        }
        fn reset(&mut self) {}
    }

    #[test]
    fn register_rejects_duplicate_names() {
        let mut registry = AppRegistry::new();
        registry
            .register(Box::new(StubApp { name: "Mail".into(), protocols: vec![], resolved: None }))
            .unwrap();
        let err = registry
            .register(Box::new(StubApp { name: "Mail".into(), protocols: vec![], resolved: None }))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::DuplicateApp(_)));
    }

    #[test]
    fn resolve_protocols_hands_map_to_every_app() {
        let mut registry = AppRegistry::new();
        registry
            .register(Box::new(StubApp {
                name: "FileSystem".into(),
                protocols: vec![Protocol::new("file_system")],
                resolved: None,
            }))
            .unwrap();
        registry
            .register(Box::new(StubApp { name: "Mail".into(), protocols: vec![], resolved: None }))
            .unwrap();
        registry.resolve_protocols();
        assert_eq!(
            registry.protocol_owner(&Protocol::new("file_system")),
            Some("FileSystem")
        );
    }

    #[test]
    fn apps_state_json_tags_app_name() {
        let mut registry = AppRegistry::new();
        registry
            .register(Box::new(StubApp { name: "Mail".into(), protocols: vec![], resolved: None }))
            .unwrap();
        let state = registry.apps_state_json();
        assert_eq!(state[0]["app_name"], json!("Mail"));
    }
}
