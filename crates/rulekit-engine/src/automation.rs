//! Automations
//!
//! An automation is the bound form of a declarative config: variable,
//! trigger, condition, and action definitions resolved through the binder
//! into step lists, reused across every event. Automations hold no per-run
//! state; everything mutable lives on the [`EventContext`].

use std::sync::Arc;

use rulekit_core::{ActionOutcome, EngineError, EngineResult, StepDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use ulid::Ulid;

use crate::binder::StepBinder;
use crate::context::EventContext;
use crate::list::{ActionList, PredicateList, VariableList};

/// Declarative automation configuration
///
/// The serde shape accepts both singular and plural section keys, so YAML
/// written either way round-trips:
///
/// ```yaml
/// id: doorbell_announce
/// triggers:
///   - name: event_type
///     equals: doorbell_pressed
/// actions:
///   - name: log
///     message: ding dong
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Stable identifier; generated when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Human-readable name, preferred in logs and traces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, alias = "variable", skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<StepDefinition>,

    #[serde(default, alias = "trigger", skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<StepDefinition>,

    #[serde(default, alias = "condition", skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<StepDefinition>,

    #[serde(default, alias = "action", skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<StepDefinition>,

    /// Value computed after the actions complete, templated when a
    /// renderer is installed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Resolve variables concurrently instead of in declaration order
    #[serde(default)]
    pub concurrent_variables: bool,
}

/// A bound, executable automation
pub struct Automation {
    id: String,
    config: AutomationConfig,
    variables: VariableList,
    triggers: PredicateList,
    conditions: PredicateList,
    actions: ActionList,
}

impl Automation {
    /// Bind a config's definitions into an executable automation
    ///
    /// Every referenced capability is resolved here, so an automation that
    /// builds successfully cannot later fail on a missing capability.
    pub fn build(config: AutomationConfig, binder: &StepBinder) -> EngineResult<Self> {
        let id = match &config.id {
            Some(id) if !id.trim().is_empty() => id.clone(),
            Some(_) => {
                return Err(EngineError::InvalidDefinition(
                    "automation id must not be empty".to_string(),
                ))
            }
            None => Ulid::new().to_string(),
        };

        let variables = binder.bind_variables(&config.variables)?;
        let triggers = binder.bind_triggers(&config.triggers)?;
        let conditions = binder.bind_conditions(&config.conditions)?;
        let actions = binder.bind_actions(&config.actions)?;

        debug!(
            automation = %id,
            triggers = triggers.len(),
            conditions = conditions.len(),
            actions = actions.len(),
            "built automation"
        );

        Ok(Self {
            id,
            config,
            variables,
            triggers,
            conditions,
            actions,
        })
    }

    /// Stable identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Alias when configured, id otherwise
    pub fn display_name(&self) -> &str {
        self.config.alias.as_deref().unwrap_or(&self.id)
    }

    /// The configuration this automation was built from
    pub fn config(&self) -> &AutomationConfig {
        &self.config
    }

    /// The declared result value, if any
    pub fn result_spec(&self) -> Option<&Value> {
        self.config.result.as_ref()
    }

    /// Resolve the automation's variables into the context metadata
    pub async fn resolve_variables(&self, ctx: &Arc<EventContext>) -> EngineResult<()> {
        if self.config.concurrent_variables {
            self.variables.resolve_concurrent(ctx).await
        } else {
            self.variables.resolve_all(ctx).await
        }
    }

    /// Whether any trigger fires for this context
    ///
    /// An automation without triggers never activates on its own; it can
    /// still be executed directly.
    pub async fn any_trigger_activated(&self, ctx: &Arc<EventContext>) -> EngineResult<bool> {
        if self.triggers.is_empty() {
            return Ok(false);
        }
        self.triggers.any(ctx).await
    }

    /// Whether every condition holds for this context (true when there are
    /// no conditions)
    pub async fn all_conditions_met(&self, ctx: &Arc<EventContext>) -> EngineResult<bool> {
        self.conditions.all(ctx).await
    }

    /// Run the action list
    ///
    /// The stop-automation signal unwinds through any nesting to here and
    /// converts into a normal completion.
    pub async fn perform_actions(&self, ctx: &Arc<EventContext>) -> EngineResult<ActionOutcome> {
        match self.actions.execute_all(ctx).await {
            Err(EngineError::StopAutomation(reason)) => {
                debug!(automation = %self.id, reason = %reason, "automation stopped");
                Ok(ActionOutcome::Continue)
            }
            other => other,
        }
    }
}

impl std::fmt::Debug for Automation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Automation")
            .field("id", &self.id)
            .field("alias", &self.config.alias)
            .field("variables", &self.variables.len())
            .field("triggers", &self.triggers.len())
            .field("conditions", &self.conditions.len())
            .field("actions", &self.actions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::InterceptorRegistry;
    use crate::registry::CapabilityRegistry;
    use rulekit_core::{CapabilityKind, Context, Event};
    use serde_json::json;

    fn binder() -> StepBinder {
        let registry = CapabilityRegistry::new();
        registry.register_trigger("always", |_call| async { Ok(true) });
        registry.register_condition("always", |_call| async { Ok(true) });
        registry.register_action("noop", |_call| async { Ok(ActionOutcome::Continue) });
        StepBinder::new(Arc::new(registry), Arc::new(InterceptorRegistry::new()))
    }

    fn ctx() -> Arc<EventContext> {
        Arc::new(EventContext::new(Event::new(
            "test_event",
            json!({}),
            Context::new(),
        )))
    }

    #[test]
    fn test_config_accepts_singular_and_plural_keys() {
        let yaml = r#"
id: door
trigger:
  - name: always
actions:
  - name: noop
"#;
        let config: AutomationConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.triggers.len(), 1);
        assert_eq!(config.actions.len(), 1);
    }

    #[test]
    fn test_build_generates_id_when_omitted() {
        let automation = Automation::build(AutomationConfig::default(), &binder()).unwrap();
        assert!(!automation.id().is_empty());
        assert_eq!(automation.display_name(), automation.id());
    }

    #[test]
    fn test_build_fails_fast_on_unknown_capability() {
        let config = AutomationConfig {
            triggers: vec![StepDefinition::new("doesNotExist")],
            ..Default::default()
        };
        let err = Automation::build(config, &binder()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::CapabilityNotFound {
                kind: CapabilityKind::Trigger,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_no_triggers_never_activates() {
        let automation = Automation::build(AutomationConfig::default(), &binder()).unwrap();
        assert!(!automation.any_trigger_activated(&ctx()).await.unwrap());
        assert!(automation.all_conditions_met(&ctx()).await.unwrap());
    }

    #[tokio::test]
    async fn test_display_name_prefers_alias() {
        let config = AutomationConfig {
            id: Some("auto_1".to_string()),
            alias: Some("Doorbell".to_string()),
            ..Default::default()
        };
        let automation = Automation::build(config, &binder()).unwrap();
        assert_eq!(automation.id(), "auto_1");
        assert_eq!(automation.display_name(), "Doorbell");
    }
}
