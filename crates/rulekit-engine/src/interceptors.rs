//! Built-in interceptors
//!
//! Three cross-cutting behaviors ship with the engine: parameter
//! templating (outermost, so everything downstream sees rendered
//! parameters), step logging, and trace recording (innermost, so the
//! recorded timing excludes other interceptors). Hosts register their own
//! interceptors around these using the priority ordering.

use std::sync::Arc;
use std::time::Instant;

use rulekit_core::ActionOutcome;
use rulekit_trace::{now_millis, TraceEntry};
use serde_json::Value;
use tracing::debug;

use crate::interceptor::InterceptorRegistry;
use crate::registry::{BoundFn, StepCall, StepFuture};
use crate::template::{render_value, TemplateRenderer};

/// Priority of the templating interceptor (outermost shipped behavior)
pub const TEMPLATING_PRIORITY: i32 = -100;

/// Priority of the step logging interceptor
pub const LOGGING_PRIORITY: i32 = -10;

/// Priority of the trace recording interceptor (innermost shipped behavior)
pub const TRACING_PRIORITY: i32 = 0;

fn logging_interceptor<T: 'static>(call: StepCall, next: BoundFn<T>) -> StepFuture<T> {
    Box::pin(async move {
        let meta = call.meta.clone();
        debug!(kind = %meta.kind, name = %meta.name, "evaluating step");
        let started = Instant::now();
        let result = next(call).await;
        debug!(
            kind = %meta.kind,
            name = %meta.name,
            elapsed_ms = started.elapsed().as_millis() as i64,
            ok = result.is_ok(),
            "step finished"
        );
        result
    })
}

/// Install step logging for every capability kind
pub fn install_logging(interceptors: &InterceptorRegistry) {
    interceptors.register_trigger_interceptor(LOGGING_PRIORITY, logging_interceptor);
    interceptors.register_condition_interceptor(LOGGING_PRIORITY, logging_interceptor);
    interceptors.register_action_interceptor(LOGGING_PRIORITY, logging_interceptor);
    interceptors.register_variable_interceptor(LOGGING_PRIORITY, logging_interceptor);
}

fn tracing_interceptor<T: 'static>(
    value_of: fn(&T) -> Option<Value>,
) -> impl Fn(StepCall, BoundFn<T>) -> StepFuture<T> + Send + Sync + 'static {
    move |call: StepCall, next: BoundFn<T>| {
        Box::pin(async move {
            let Some(trace) = call.ctx.trace() else {
                return next(call).await;
            };
            let meta = call.meta.clone();
            let started = now_millis();
            let result = next(call).await;

            let mut entry = TraceEntry::new(&meta.name, meta.alias.clone(), started);
            entry.duration_ms = Some(now_millis() - started);
            match &result {
                Ok(value) => entry.value = value_of(value),
                Err(err) => entry.error = Some(err.to_string()),
            }
            trace.add(meta.kind, entry);
            result
        }) as StepFuture<T>
    }
}

/// Install trace recording for every capability kind
///
/// Recording is a no-op on contexts without an active trace, so the
/// interceptors are safe to install unconditionally.
pub fn install_tracing(interceptors: &InterceptorRegistry) {
    interceptors.register_trigger_interceptor(
        TRACING_PRIORITY,
        tracing_interceptor(|matched: &bool| Some(Value::Bool(*matched))),
    );
    interceptors.register_condition_interceptor(
        TRACING_PRIORITY,
        tracing_interceptor(|held: &bool| Some(Value::Bool(*held))),
    );
    interceptors.register_action_interceptor(
        TRACING_PRIORITY,
        tracing_interceptor(|outcome: &ActionOutcome| serde_json::to_value(outcome).ok()),
    );
    interceptors.register_variable_interceptor(
        TRACING_PRIORITY,
        tracing_interceptor(|_resolved: &()| None),
    );
}

fn templating_interceptor<T: 'static>(
    renderer: Arc<dyn TemplateRenderer>,
) -> impl Fn(StepCall, BoundFn<T>) -> StepFuture<T> + Send + Sync + 'static {
    move |mut call: StepCall, next: BoundFn<T>| {
        let renderer = renderer.clone();
        Box::pin(async move {
            let scope = call.ctx.template_scope();
            call.params = render_value(renderer.as_ref(), &call.params, &scope)?;
            next(call).await
        }) as StepFuture<T>
    }
}

/// Install parameter templating for every capability kind
pub fn install_templating(interceptors: &InterceptorRegistry, renderer: Arc<dyn TemplateRenderer>) {
    interceptors
        .register_trigger_interceptor(TEMPLATING_PRIORITY, templating_interceptor(renderer.clone()));
    interceptors.register_condition_interceptor(
        TEMPLATING_PRIORITY,
        templating_interceptor(renderer.clone()),
    );
    interceptors
        .register_action_interceptor(TEMPLATING_PRIORITY, templating_interceptor(renderer.clone()));
    interceptors
        .register_variable_interceptor(TEMPLATING_PRIORITY, templating_interceptor(renderer));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::StepBinder;
    use crate::context::EventContext;
    use crate::registry::CapabilityRegistry;
    use crate::template::MetadataRenderer;
    use rulekit_core::{Context, Event, StepDefinition};
    use serde_json::json;

    fn ctx() -> Arc<EventContext> {
        Arc::new(EventContext::new(Event::new(
            "test_event",
            json!({}),
            Context::new(),
        )))
    }

    #[tokio::test]
    async fn test_tracing_interceptor_records_entries() {
        let registry = CapabilityRegistry::new();
        registry.register_condition("yes", |_call| async { Ok(true) });
        registry.register_action("noop", |_call| async { Ok(ActionOutcome::Continue) });

        let interceptors = InterceptorRegistry::new();
        install_tracing(&interceptors);

        let binder = StepBinder::new(Arc::new(registry), Arc::new(interceptors));
        let condition = binder
            .bind_condition(&StepDefinition::new("yes").with_alias("check"))
            .unwrap();
        let action = binder.bind_action(&StepDefinition::new("noop")).unwrap();

        let ctx = ctx();
        let trace = ctx.trace_or_init("test automation");
        condition.invoke(&ctx).await.unwrap();
        action.invoke(&ctx).await.unwrap();

        let finished = trace.complete();
        assert_eq!(finished.conditions.len(), 1);
        assert_eq!(finished.conditions[0].name, "yes");
        assert_eq!(finished.conditions[0].alias.as_deref(), Some("check"));
        assert_eq!(finished.conditions[0].value, Some(json!(true)));
        assert_eq!(finished.actions.len(), 1);
        assert_eq!(finished.actions[0].value, Some(json!("continue")));
    }

    #[tokio::test]
    async fn test_tracing_interceptor_noop_without_trace() {
        let registry = CapabilityRegistry::new();
        registry.register_condition("yes", |_call| async { Ok(true) });

        let interceptors = InterceptorRegistry::new();
        install_tracing(&interceptors);

        let binder = StepBinder::new(Arc::new(registry), Arc::new(interceptors));
        let condition = binder.bind_condition(&StepDefinition::new("yes")).unwrap();

        let ctx = ctx();
        assert!(condition.invoke(&ctx).await.unwrap());
        assert!(ctx.trace().is_none());
    }

    #[tokio::test]
    async fn test_tracing_interceptor_records_errors() {
        let registry = CapabilityRegistry::new();
        registry.register_condition("boom", |call| async move {
            Err::<bool, _>(call.error("broken"))
        });

        let interceptors = InterceptorRegistry::new();
        install_tracing(&interceptors);

        let binder = StepBinder::new(Arc::new(registry), Arc::new(interceptors));
        let condition = binder.bind_condition(&StepDefinition::new("boom")).unwrap();

        let ctx = ctx();
        let trace = ctx.trace_or_init("test automation");
        assert!(condition.invoke(&ctx).await.is_err());

        let finished = trace.complete();
        assert_eq!(finished.conditions.len(), 1);
        assert!(finished.conditions[0]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("broken")));
    }

    #[tokio::test]
    async fn test_templating_interceptor_renders_params() {
        let registry = CapabilityRegistry::new();
        registry.register_condition("message_is", |call: StepCall| async move {
            Ok(call.params["message"] == json!("hello kitchen"))
        });

        let interceptors = InterceptorRegistry::new();
        install_templating(&interceptors, Arc::new(MetadataRenderer));

        let binder = StepBinder::new(Arc::new(registry), Arc::new(interceptors));
        let condition = binder
            .bind_condition(
                &StepDefinition::new("message_is")
                    .with_param("message", json!("hello {{ room }}")),
            )
            .unwrap();

        let ctx = ctx();
        ctx.set_meta("room", json!("kitchen"));
        assert!(condition.invoke(&ctx).await.unwrap());
    }
}
