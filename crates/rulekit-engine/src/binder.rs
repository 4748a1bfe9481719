//! Step binder
//!
//! The binder is the boundary between declarative definitions and hot-path
//! execution. It resolves a named step against the capability registry,
//! validates the raw parameters against the capability's schema (if one was
//! declared), asks the factory for the executable unit, and wraps it with
//! the interceptor chain for its kind. All of this happens once per
//! automation build; the resulting [`BoundStep`] is immutable and reused
//! for every event.

use std::sync::Arc;

use rulekit_core::{ActionOutcome, CapabilityKind, EngineError, EngineResult, StepDefinition};
use serde_json::Value;
use tracing::debug;

use crate::context::EventContext;
use crate::interceptor::InterceptorRegistry;
use crate::list::{ActionList, PredicateList, VariableList};
use crate::registry::{BoundFn, CapabilityRegistry, StepCall, StepFuture, StepMeta};

/// A resolved, chain-wrapped, executable step
pub struct BoundStep<T> {
    meta: Arc<StepMeta>,
    params: Value,
    call: BoundFn<T>,
}

impl<T> BoundStep<T> {
    /// Capability name this step resolves to
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// Alias from the definition, if any
    pub fn alias(&self) -> Option<&str> {
        self.meta.alias.as_deref()
    }

    /// Kind of the underlying capability
    pub fn kind(&self) -> CapabilityKind {
        self.meta.kind
    }

    /// Evaluate the step against a run's context
    pub fn invoke(&self, ctx: &Arc<EventContext>) -> StepFuture<T> {
        (self.call)(StepCall {
            meta: self.meta.clone(),
            params: self.params.clone(),
            ctx: ctx.clone(),
        })
    }
}

impl<T> Clone for BoundStep<T> {
    fn clone(&self) -> Self {
        Self {
            meta: self.meta.clone(),
            params: self.params.clone(),
            call: self.call.clone(),
        }
    }
}

impl<T> std::fmt::Debug for BoundStep<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundStep")
            .field("kind", &self.meta.kind)
            .field("name", &self.meta.name)
            .field("alias", &self.meta.alias)
            .finish()
    }
}

/// Resolves step definitions into bound steps
#[derive(Clone)]
pub struct StepBinder {
    capabilities: Arc<CapabilityRegistry>,
    interceptors: Arc<InterceptorRegistry>,
}

fn check_definition(def: &StepDefinition) -> EngineResult<()> {
    if def.name.trim().is_empty() {
        return Err(EngineError::InvalidDefinition(
            "step definition has an empty capability name".to_string(),
        ));
    }
    Ok(())
}

fn validate_schema(
    kind: CapabilityKind,
    name: &str,
    schema: Option<&jsonschema::JSONSchema>,
    params: &Value,
) -> EngineResult<()> {
    let Some(schema) = schema else {
        return Ok(());
    };
    if let Err(mut errors) = schema.validate(params) {
        let message = errors
            .next()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "schema validation failed".to_string());
        return Err(EngineError::conversion(kind, name, message));
    }
    Ok(())
}

impl StepBinder {
    /// Create a binder over a capability registry and interceptor set
    pub fn new(
        capabilities: Arc<CapabilityRegistry>,
        interceptors: Arc<InterceptorRegistry>,
    ) -> Self {
        Self {
            capabilities,
            interceptors,
        }
    }

    /// Bind a trigger definition
    pub fn bind_trigger(&self, def: &StepDefinition) -> EngineResult<BoundStep<bool>> {
        check_definition(def)?;
        let (factory, schema) = self.capabilities.lookup_trigger(&def.name)?;
        let params = def.params_value();
        validate_schema(CapabilityKind::Trigger, &def.name, schema.as_deref(), &params)?;
        let terminal = factory(&params)?;
        debug!(name = %def.name, "bound trigger");
        Ok(self.wrap(CapabilityKind::Trigger, def, params, |ints| {
            ints.trigger_chain(terminal)
        }))
    }

    /// Bind a condition definition
    pub fn bind_condition(&self, def: &StepDefinition) -> EngineResult<BoundStep<bool>> {
        check_definition(def)?;
        let (factory, schema) = self.capabilities.lookup_condition(&def.name)?;
        let params = def.params_value();
        validate_schema(
            CapabilityKind::Condition,
            &def.name,
            schema.as_deref(),
            &params,
        )?;
        let terminal = factory(&params)?;
        debug!(name = %def.name, "bound condition");
        Ok(self.wrap(CapabilityKind::Condition, def, params, |ints| {
            ints.condition_chain(terminal)
        }))
    }

    /// Bind a variable definition
    pub fn bind_variable(&self, def: &StepDefinition) -> EngineResult<BoundStep<()>> {
        check_definition(def)?;
        let (factory, schema) = self.capabilities.lookup_variable(&def.name)?;
        let params = def.params_value();
        validate_schema(
            CapabilityKind::Variable,
            &def.name,
            schema.as_deref(),
            &params,
        )?;
        let terminal = factory(&params)?;
        debug!(name = %def.name, "bound variable");
        Ok(self.wrap(CapabilityKind::Variable, def, params, |ints| {
            ints.variable_chain(terminal)
        }))
    }

    /// Bind an action definition
    ///
    /// Action factories receive the binder itself, so composite actions
    /// bind their nested definitions recursively here.
    pub fn bind_action(&self, def: &StepDefinition) -> EngineResult<BoundStep<ActionOutcome>> {
        check_definition(def)?;
        let (factory, schema) = self.capabilities.lookup_action(&def.name)?;
        let params = def.params_value();
        validate_schema(CapabilityKind::Action, &def.name, schema.as_deref(), &params)?;
        let terminal = factory(self, &params)?;
        debug!(name = %def.name, "bound action");
        Ok(self.wrap(CapabilityKind::Action, def, params, |ints| {
            ints.action_chain(terminal)
        }))
    }

    /// Bind a whole trigger list
    pub fn bind_triggers(&self, defs: &[StepDefinition]) -> EngineResult<PredicateList> {
        let steps = defs
            .iter()
            .map(|d| self.bind_trigger(d))
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(PredicateList::new(steps))
    }

    /// Bind a whole condition list
    pub fn bind_conditions(&self, defs: &[StepDefinition]) -> EngineResult<PredicateList> {
        let steps = defs
            .iter()
            .map(|d| self.bind_condition(d))
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(PredicateList::new(steps))
    }

    /// Bind a whole variable list
    pub fn bind_variables(&self, defs: &[StepDefinition]) -> EngineResult<VariableList> {
        let steps = defs
            .iter()
            .map(|d| self.bind_variable(d))
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(VariableList::new(steps))
    }

    /// Bind a whole action list
    pub fn bind_actions(&self, defs: &[StepDefinition]) -> EngineResult<ActionList> {
        let steps = defs
            .iter()
            .map(|d| self.bind_action(d))
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(ActionList::new(steps))
    }

    fn wrap<T>(
        &self,
        kind: CapabilityKind,
        def: &StepDefinition,
        params: Value,
        chain: impl FnOnce(&InterceptorRegistry) -> BoundFn<T>,
    ) -> BoundStep<T> {
        BoundStep {
            meta: Arc::new(StepMeta {
                kind,
                name: def.name.clone(),
                alias: def.alias.clone(),
            }),
            params,
            call: chain(&self.interceptors),
        }
    }
}
