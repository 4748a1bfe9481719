//! Capability registry
//!
//! Capabilities (triggers, conditions, actions, variables) are registered
//! by name in per-kind maps and resolved by the step binder at automation
//! build time. Handlers are async closures receiving a [`StepCall`] and
//! returning a boxed future, stored behind `Arc` so the same registration
//! serves every bound step and every event.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use rulekit_core::{ActionOutcome, CapabilityKind, EngineError, EngineResult};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::binder::StepBinder;
use crate::context::EventContext;

/// Future type returned by capability evaluations
pub type StepFuture<T> = Pin<Box<dyn Future<Output = EngineResult<T>> + Send>>;

/// An executable bound unit: the terminal capability wrapped by its
/// interceptor chain
pub type BoundFn<T> = Arc<dyn Fn(StepCall) -> StepFuture<T> + Send + Sync>;

/// Identity of a bound step, shared by the step and its interceptors
#[derive(Debug, Clone)]
pub struct StepMeta {
    pub kind: CapabilityKind,
    pub name: String,
    pub alias: Option<String>,
}

/// One invocation of a bound step
///
/// Bundles everything an interceptor or capability needs: the step's
/// identity, the (possibly interceptor-rewritten) parameters, and the
/// run's event context.
#[derive(Clone)]
pub struct StepCall {
    pub meta: Arc<StepMeta>,
    pub params: Value,
    pub ctx: Arc<EventContext>,
}

impl StepCall {
    /// Convert the call's parameters into a typed shape
    pub fn params_as<P: DeserializeOwned>(&self) -> EngineResult<P> {
        serde_json::from_value(self.params.clone()).map_err(|e| {
            EngineError::conversion(self.meta.kind, self.meta.name.clone(), e.to_string())
        })
    }

    /// Shorthand for an execution error attributed to this step
    pub fn error(&self, message: impl Into<String>) -> EngineError {
        EngineError::execution(self.meta.kind, self.meta.name.clone(), message)
    }
}

/// Factory producing an executable unit from raw bind-time parameters
///
/// Leaf capabilities ignore the parameters here (they read them per call);
/// the indirection exists so composite actions can bind nested definitions
/// once at build time.
pub type LeafFactory<T> = Arc<dyn Fn(&Value) -> EngineResult<BoundFn<T>> + Send + Sync>;

/// Factory for actions; receives the binder so composite actions can bind
/// nested condition/action definitions recursively
pub type ActionFactory =
    Arc<dyn Fn(&StepBinder, &Value) -> EngineResult<BoundFn<ActionOutcome>> + Send + Sync>;

struct Registered<F> {
    factory: F,
    schema: Option<Arc<jsonschema::JSONSchema>>,
}

/// Name-keyed registry of all pluggable capabilities
///
/// Populated by collaborators at startup, queried by the binder at
/// automation build time. Lookup failure is
/// [`EngineError::CapabilityNotFound`].
#[derive(Default)]
pub struct CapabilityRegistry {
    triggers: DashMap<String, Registered<LeafFactory<bool>>>,
    conditions: DashMap<String, Registered<LeafFactory<bool>>>,
    variables: DashMap<String, Registered<LeafFactory<()>>>,
    actions: DashMap<String, Registered<ActionFactory>>,
}

/// Compile an optional JSON Schema for bind-time parameter validation
fn compile_schema(
    kind: CapabilityKind,
    name: &str,
    schema: Option<Value>,
) -> EngineResult<Option<Arc<jsonschema::JSONSchema>>> {
    match schema {
        None => Ok(None),
        Some(value) => jsonschema::JSONSchema::compile(&value)
            .map(|s| Some(Arc::new(s)))
            .map_err(|e| {
                EngineError::InvalidDefinition(format!(
                    "bad parameter schema for {} {}: {}",
                    kind, name, e
                ))
            }),
    }
}

fn erase_handler<T, F, Fut>(handler: F) -> BoundFn<T>
where
    F: Fn(StepCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EngineResult<T>> + Send + 'static,
{
    Arc::new(move |call| Box::pin(handler(call)) as StepFuture<T>)
}

fn erase_typed_handler<T, P, F, Fut>(handler: F) -> BoundFn<T>
where
    T: 'static,
    P: DeserializeOwned + Send + 'static,
    F: Fn(Arc<EventContext>, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EngineResult<T>> + Send + 'static,
{
    let handler = Arc::new(handler);
    Arc::new(move |call: StepCall| {
        let handler = handler.clone();
        Box::pin(async move {
            let params: P = call.params_as()?;
            handler(call.ctx.clone(), params).await
        }) as StepFuture<T>
    })
}

fn leaf_factory<T>(bound: BoundFn<T>) -> LeafFactory<T>
where
    T: 'static,
{
    Arc::new(move |_params| Ok(bound.clone()))
}

macro_rules! kind_registration {
    ($register:ident, $register_typed:ident, $register_with_schema:ident,
     $lookup:ident, $map:ident, $kind:expr, $out:ty) => {
        /// Register a raw handler under this name; the handler reads its
        /// parameters from the call
        pub fn $register<F, Fut>(&self, name: impl Into<String>, handler: F)
        where
            F: Fn(StepCall) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = EngineResult<$out>> + Send + 'static,
        {
            self.$register_with_schema(name, handler, None)
                .expect("registration without schema cannot fail");
        }

        /// Register a handler whose parameters deserialize into `P` per
        /// call (after interceptors have run, so templated parameters are
        /// already rendered)
        pub fn $register_typed<P, F, Fut>(&self, name: impl Into<String>, handler: F)
        where
            P: DeserializeOwned + Send + 'static,
            F: Fn(Arc<EventContext>, P) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = EngineResult<$out>> + Send + 'static,
        {
            let name = name.into();
            debug!(kind = %$kind, name = %name, "registering capability");
            self.$map.insert(
                name,
                Registered {
                    factory: leaf_factory(erase_typed_handler(handler)),
                    schema: None,
                },
            );
        }

        /// Register a raw handler plus a JSON Schema validated against the
        /// raw parameters at bind time (fail fast, before any event)
        pub fn $register_with_schema<F, Fut>(
            &self,
            name: impl Into<String>,
            handler: F,
            schema: Option<Value>,
        ) -> EngineResult<()>
        where
            F: Fn(StepCall) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = EngineResult<$out>> + Send + 'static,
        {
            let name = name.into();
            debug!(kind = %$kind, name = %name, "registering capability");
            let schema = compile_schema($kind, &name, schema)?;
            self.$map.insert(
                name,
                Registered {
                    factory: leaf_factory(erase_handler(handler)),
                    schema,
                },
            );
            Ok(())
        }

        pub(crate) fn $lookup(
            &self,
            name: &str,
        ) -> EngineResult<(LeafFactory<$out>, Option<Arc<jsonschema::JSONSchema>>)> {
            self.$map
                .get(name)
                .map(|r| (r.factory.clone(), r.schema.clone()))
                .ok_or_else(|| EngineError::CapabilityNotFound {
                    kind: $kind,
                    name: name.to_string(),
                })
        }
    };
}

impl CapabilityRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    kind_registration!(
        register_trigger,
        register_trigger_typed,
        register_trigger_with_schema,
        lookup_trigger,
        triggers,
        CapabilityKind::Trigger,
        bool
    );

    kind_registration!(
        register_condition,
        register_condition_typed,
        register_condition_with_schema,
        lookup_condition,
        conditions,
        CapabilityKind::Condition,
        bool
    );

    kind_registration!(
        register_variable,
        register_variable_typed,
        register_variable_with_schema,
        lookup_variable,
        variables,
        CapabilityKind::Variable,
        ()
    );

    /// Register a raw action handler
    pub fn register_action<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(StepCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<ActionOutcome>> + Send + 'static,
    {
        let bound = erase_handler(handler);
        self.register_action_factory(name, move |_binder: &StepBinder, _params: &Value| {
            Ok(bound.clone())
        });
    }

    /// Register an action handler with typed per-call parameters
    pub fn register_action_typed<P, F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(Arc<EventContext>, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<ActionOutcome>> + Send + 'static,
    {
        let bound = erase_typed_handler(handler);
        self.register_action_factory(name, move |_binder: &StepBinder, _params: &Value| {
            Ok(bound.clone())
        });
    }

    /// Register an action built at bind time
    ///
    /// The factory receives the binder and the raw parameters once per
    /// automation build; composite actions use this to bind their nested
    /// condition and action definitions.
    pub fn register_action_factory<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(&StepBinder, &Value) -> EngineResult<BoundFn<ActionOutcome>> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(kind = %CapabilityKind::Action, name = %name, "registering capability");
        self.actions.insert(
            name,
            Registered {
                factory: Arc::new(factory),
                schema: None,
            },
        );
    }

    /// Register an action factory plus a bind-time parameter schema
    pub fn register_action_factory_with_schema<F>(
        &self,
        name: impl Into<String>,
        factory: F,
        schema: Option<Value>,
    ) -> EngineResult<()>
    where
        F: Fn(&StepBinder, &Value) -> EngineResult<BoundFn<ActionOutcome>> + Send + Sync + 'static,
    {
        let name = name.into();
        let schema = compile_schema(CapabilityKind::Action, &name, schema)?;
        self.actions.insert(
            name,
            Registered {
                factory: Arc::new(factory),
                schema,
            },
        );
        Ok(())
    }

    pub(crate) fn lookup_action(
        &self,
        name: &str,
    ) -> EngineResult<(ActionFactory, Option<Arc<jsonschema::JSONSchema>>)> {
        self.actions
            .get(name)
            .map(|r| (r.factory.clone(), r.schema.clone()))
            .ok_or_else(|| EngineError::CapabilityNotFound {
                kind: CapabilityKind::Action,
                name: name.to_string(),
            })
    }

    /// Whether a capability is registered under this kind and name
    pub fn contains(&self, kind: CapabilityKind, name: &str) -> bool {
        match kind {
            CapabilityKind::Trigger => self.triggers.contains_key(name),
            CapabilityKind::Condition => self.conditions.contains_key(name),
            CapabilityKind::Action => self.actions.contains_key(name),
            CapabilityKind::Variable => self.variables.contains_key(name),
        }
    }

    /// Number of registered capabilities across all kinds
    pub fn len(&self) -> usize {
        self.triggers.len() + self.conditions.len() + self.actions.len() + self.variables.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rulekit_core::{Context, Event};
    use serde_json::json;

    fn call(registry_params: Value) -> StepCall {
        StepCall {
            meta: Arc::new(StepMeta {
                kind: CapabilityKind::Trigger,
                name: "test".to_string(),
                alias: None,
            }),
            params: registry_params,
            ctx: Arc::new(EventContext::new(Event::new(
                "test_event",
                json!({}),
                Context::new(),
            ))),
        }
    }

    #[tokio::test]
    async fn test_register_and_lookup_trigger() {
        let registry = CapabilityRegistry::new();
        registry.register_trigger("always", |_call| async { Ok(true) });

        let (factory, schema) = registry.lookup_trigger("always").unwrap();
        assert!(schema.is_none());

        let bound = factory(&json!({})).unwrap();
        assert!(bound(call(json!({}))).await.unwrap());
    }

    #[tokio::test]
    async fn test_lookup_unknown_is_not_found() {
        let registry = CapabilityRegistry::new();
        // The Ok side holds an Arc'd closure, so take the error directly
        let err = registry.lookup_trigger("doesNotExist").err().unwrap();
        assert!(matches!(
            err,
            EngineError::CapabilityNotFound {
                kind: CapabilityKind::Trigger,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_typed_registration_converts_per_call() {
        #[derive(serde::Deserialize)]
        struct EqualsParams {
            left: i64,
            right: i64,
        }

        let registry = CapabilityRegistry::new();
        registry.register_condition_typed("equals", |_ctx, p: EqualsParams| async move {
            Ok(p.left == p.right)
        });

        let (factory, _) = registry.lookup_condition("equals").unwrap();
        let bound = factory(&json!({})).unwrap();

        let ok = bound(call(json!({"left": 2, "right": 2}))).await.unwrap();
        assert!(ok);

        let err = bound(call(json!({"left": "nope"}))).await.unwrap_err();
        assert!(matches!(err, EngineError::ParameterConversion { .. }));
    }

    #[test]
    fn test_contains_and_len() {
        let registry = CapabilityRegistry::new();
        assert!(registry.is_empty());

        registry.register_trigger("always", |_call| async { Ok(true) });
        registry.register_variable("noop", |_call| async { Ok(()) });

        assert!(registry.contains(CapabilityKind::Trigger, "always"));
        assert!(!registry.contains(CapabilityKind::Condition, "always"));
        assert_eq!(registry.len(), 2);
    }
}
