//! Stock leaf capabilities
//!
//! A small set of triggers, conditions, variables, and actions that work
//! against the event payload and context metadata alone, with no external
//! collaborators. Hosts register their own capabilities next to these.

use std::sync::Arc;

use regex::Regex;
use rulekit_core::ActionOutcome;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::context::EventContext;
use crate::registry::CapabilityRegistry;

#[derive(Debug, Deserialize)]
struct EventTypeParams {
    #[serde(default)]
    equals: Option<String>,
    #[serde(default)]
    one_of: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MetadataEqualsParams {
    key: String,
    equals: Value,
}

#[derive(Debug, Deserialize)]
struct MetadataMatchesParams {
    key: String,
    pattern: String,
}

#[derive(Debug, Deserialize)]
struct InitiatedByParams {
    user: String,
}

#[derive(Debug, Deserialize)]
struct SetParams {
    key: String,
    value: Value,
}

#[derive(Debug, Deserialize)]
struct FromEventParams {
    key: String,
    /// JSON pointer into the event payload, e.g. `/device/id`
    path: String,
    #[serde(default)]
    default: Option<Value>,
}

fn default_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize)]
struct LogParams {
    message: String,
    #[serde(default = "default_level")]
    level: String,
}

/// Register the stock capabilities
pub fn install(capabilities: &CapabilityRegistry) {
    capabilities.register_trigger("always", |_call| async { Ok(true) });

    capabilities.register_trigger_typed(
        "event_type",
        |ctx: Arc<EventContext>, p: EventTypeParams| async move {
            let actual = ctx.event().event_type.as_str();
            if let Some(expected) = &p.equals {
                return Ok(actual == expected);
            }
            Ok(p.one_of.iter().any(|t| t == actual))
        },
    );

    capabilities.register_condition("always", |_call| async { Ok(true) });

    capabilities.register_condition_typed(
        "metadata_equals",
        |ctx: Arc<EventContext>, p: MetadataEqualsParams| async move {
            Ok(ctx.meta(&p.key).as_ref() == Some(&p.equals))
        },
    );

    capabilities.register_condition_typed(
        "initiated_by",
        |ctx: Arc<EventContext>, p: InitiatedByParams| async move {
            Ok(ctx.event().context.user_id.as_deref() == Some(p.user.as_str()))
        },
    );

    capabilities.register_condition("metadata_matches", |call| async move {
        let p: MetadataMatchesParams = call.params_as()?;
        let pattern = Regex::new(&p.pattern)
            .map_err(|e| call.error(format!("bad pattern {:?}: {}", p.pattern, e)))?;
        let value = match call.ctx.meta(&p.key) {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => return Ok(false),
        };
        Ok(pattern.is_match(&value))
    });

    capabilities.register_variable_typed(
        "set",
        |ctx: Arc<EventContext>, p: SetParams| async move {
            ctx.set_meta(p.key, p.value);
            Ok(())
        },
    );

    capabilities.register_variable("from_event", |call| async move {
        let p: FromEventParams = call.params_as()?;
        let value = match call.ctx.event().data.pointer(&p.path) {
            Some(value) => value.clone(),
            None => p
                .default
                .ok_or_else(|| call.error(format!("no value at event path {}", p.path)))?,
        };
        call.ctx.set_meta(p.key, value);
        Ok(())
    });

    capabilities.register_action_typed(
        "log",
        |_ctx: Arc<EventContext>, p: LogParams| async move {
            emit_log(&p.level, &p.message);
            Ok(ActionOutcome::Continue)
        },
    );

    capabilities.register_action_typed(
        "set_metadata",
        |ctx: Arc<EventContext>, p: SetParams| async move {
            ctx.set_meta(p.key, p.value);
            Ok(ActionOutcome::Continue)
        },
    );
}

fn emit_log(level: &str, message: &str) {
    match level {
        "error" => error!("{}", message),
        "warn" => warn!("{}", message),
        "debug" => debug!("{}", message),
        _ => info!("{}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::StepBinder;
    use crate::interceptor::InterceptorRegistry;
    use rulekit_core::{Context, EngineError, Event, StepDefinition};
    use serde_json::json;

    fn binder() -> StepBinder {
        let registry = CapabilityRegistry::new();
        install(&registry);
        StepBinder::new(Arc::new(registry), Arc::new(InterceptorRegistry::new()))
    }

    fn ctx_for(event_type: &str, data: Value) -> Arc<EventContext> {
        Arc::new(EventContext::new(Event::new(
            event_type,
            data,
            Context::new(),
        )))
    }

    #[tokio::test]
    async fn test_event_type_trigger() {
        let binder = binder();
        let ctx = ctx_for("doorbell_pressed", json!({}));

        let equals = binder
            .bind_trigger(
                &StepDefinition::new("event_type").with_param("equals", json!("doorbell_pressed")),
            )
            .unwrap();
        assert!(equals.invoke(&ctx).await.unwrap());

        let one_of = binder
            .bind_trigger(
                &StepDefinition::new("event_type")
                    .with_param("one_of", json!(["motion", "doorbell_pressed"])),
            )
            .unwrap();
        assert!(one_of.invoke(&ctx).await.unwrap());

        let miss = binder
            .bind_trigger(&StepDefinition::new("event_type").with_param("equals", json!("motion")))
            .unwrap();
        assert!(!miss.invoke(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_metadata_conditions() {
        let binder = binder();
        let ctx = ctx_for("test_event", json!({}));
        ctx.set_meta("door", json!("front"));

        let equals = binder
            .bind_condition(
                &StepDefinition::new("metadata_equals")
                    .with_param("key", json!("door"))
                    .with_param("equals", json!("front")),
            )
            .unwrap();
        assert!(equals.invoke(&ctx).await.unwrap());

        let matches = binder
            .bind_condition(
                &StepDefinition::new("metadata_matches")
                    .with_param("key", json!("door"))
                    .with_param("pattern", json!("^fr")),
            )
            .unwrap();
        assert!(matches.invoke(&ctx).await.unwrap());

        // Missing key is false, not an error
        let missing = binder
            .bind_condition(
                &StepDefinition::new("metadata_matches")
                    .with_param("key", json!("window"))
                    .with_param("pattern", json!(".*")),
            )
            .unwrap();
        assert!(!missing.invoke(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_initiated_by_matches_the_event_principal() {
        let binder = binder();
        let condition = binder
            .bind_condition(
                &StepDefinition::new("initiated_by").with_param("user", json!("alice")),
            )
            .unwrap();

        let alice = Arc::new(EventContext::new(Event::new(
            "button_pressed",
            json!({}),
            Context::for_user("alice"),
        )));
        assert!(condition.invoke(&alice).await.unwrap());

        let bob = Arc::new(EventContext::new(Event::new(
            "button_pressed",
            json!({}),
            Context::for_user("bob"),
        )));
        assert!(!condition.invoke(&bob).await.unwrap());

        // Events with no principal never match
        let anonymous = ctx_for("button_pressed", json!({}));
        assert!(!condition.invoke(&anonymous).await.unwrap());
    }

    #[tokio::test]
    async fn test_bad_pattern_is_execution_error() {
        let binder = binder();
        let ctx = ctx_for("test_event", json!({}));
        ctx.set_meta("door", json!("front"));

        let bad = binder
            .bind_condition(
                &StepDefinition::new("metadata_matches")
                    .with_param("key", json!("door"))
                    .with_param("pattern", json!("(unclosed")),
            )
            .unwrap();
        assert!(matches!(
            bad.invoke(&ctx).await.unwrap_err(),
            EngineError::Execution { .. }
        ));
    }

    #[tokio::test]
    async fn test_from_event_variable() {
        let binder = binder();
        let ctx = ctx_for("sensor_update", json!({"device": {"id": "dev_42"}}));

        let variable = binder
            .bind_variable(
                &StepDefinition::new("from_event")
                    .with_param("key", json!("device"))
                    .with_param("path", json!("/device/id")),
            )
            .unwrap();
        variable.invoke(&ctx).await.unwrap();
        assert_eq!(ctx.meta("device"), Some(json!("dev_42")));

        let missing = binder
            .bind_variable(
                &StepDefinition::new("from_event")
                    .with_param("key", json!("nope"))
                    .with_param("path", json!("/missing")),
            )
            .unwrap();
        assert!(missing.invoke(&ctx).await.is_err());

        let defaulted = binder
            .bind_variable(
                &StepDefinition::new("from_event")
                    .with_param("key", json!("fallback"))
                    .with_param("path", json!("/missing"))
                    .with_param("default", json!(0)),
            )
            .unwrap();
        defaulted.invoke(&ctx).await.unwrap();
        assert_eq!(ctx.meta("fallback"), Some(json!(0)));
    }

    #[tokio::test]
    async fn test_set_variable_and_action() {
        let binder = binder();
        let ctx = ctx_for("test_event", json!({}));

        binder
            .bind_variable(
                &StepDefinition::new("set")
                    .with_param("key", json!("x"))
                    .with_param("value", json!(1)),
            )
            .unwrap()
            .invoke(&ctx)
            .await
            .unwrap();

        let outcome = binder
            .bind_action(
                &StepDefinition::new("set_metadata")
                    .with_param("key", json!("y"))
                    .with_param("value", json!(2)),
            )
            .unwrap()
            .invoke(&ctx)
            .await
            .unwrap();

        assert_eq!(outcome, ActionOutcome::Continue);
        assert_eq!(ctx.meta("x"), Some(json!(1)));
        assert_eq!(ctx.meta("y"), Some(json!(2)));
    }
}
