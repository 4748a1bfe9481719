//! Declarative step definitions
//!
//! A StepDefinition is the serializable unit produced by format adapters
//! (YAML/JSON). It names a registered capability and carries the raw
//! parameter map that the binder will hand to the capability's factory.

use serde::{Deserialize, Serialize};

/// The four capability kinds an automation is composed of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    Trigger,
    Condition,
    Action,
    Variable,
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CapabilityKind::Trigger => "trigger",
            CapabilityKind::Condition => "condition",
            CapabilityKind::Action => "action",
            CapabilityKind::Variable => "variable",
        };
        write!(f, "{}", s)
    }
}

/// A declarative, named step within an automation definition
///
/// All fields other than `name` and `alias` are collected into the raw
/// parameter map, so definitions stay flat in YAML:
///
/// ```yaml
/// - name: metadata_equals
///   alias: door is open
///   key: door
///   equals: open
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Optional human-readable alias for traces and logs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Capability name to resolve in the registry
    pub name: String,

    /// Raw parameters for the capability
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl StepDefinition {
    /// Create a definition with no parameters
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            alias: None,
            name: name.into(),
            params: serde_json::Map::new(),
        }
    }

    /// Set the alias
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// The raw parameters as a JSON object value
    pub fn params_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.params.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_definition_flattens_params() {
        let json = r#"{
            "name": "metadata_equals",
            "alias": "door is open",
            "key": "door",
            "equals": "open"
        }"#;

        let def: StepDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.name, "metadata_equals");
        assert_eq!(def.alias.as_deref(), Some("door is open"));
        assert_eq!(def.params["key"], json!("door"));
        assert_eq!(def.params["equals"], json!("open"));
    }

    #[test]
    fn test_step_definition_builder() {
        let def = StepDefinition::new("set")
            .with_alias("x")
            .with_param("key", json!("x"))
            .with_param("value", json!(1));

        assert_eq!(def.params_value()["key"], json!("x"));
        assert_eq!(def.params_value()["value"], json!(1));
    }

    #[test]
    fn test_capability_kind_display() {
        assert_eq!(CapabilityKind::Trigger.to_string(), "trigger");
        assert_eq!(CapabilityKind::Variable.to_string(), "variable");
    }
}
