//! Embeddable rule and automation engine
//!
//! Hosts register named capabilities (triggers, conditions, actions,
//! variables), declare automations that reference them by name, and feed
//! events in. The engine binds each automation once, wraps every step with
//! an interceptor chain, and evaluates variables, triggers, conditions,
//! and actions per event, optionally recording a hierarchical execution
//! trace.
//!
//! ```no_run
//! use std::sync::Arc;
//! use rulekit_core::{Context, Event};
//! use rulekit_engine::{AutomationConfig, Engine};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let engine = Engine::new();
//! let config: AutomationConfig = serde_yaml::from_str(r#"
//! id: doorbell_announce
//! triggers:
//!   - name: event_type
//!     equals: doorbell_pressed
//! actions:
//!   - name: log
//!     message: ding dong
//! "#)?;
//! engine.add(config)?;
//!
//! let event = Event::new("doorbell_pressed", serde_json::json!({}), Context::new());
//! let outcomes = engine.process_event(event).await?;
//! assert!(outcomes[0].executed);
//! # Ok(())
//! # }
//! ```

pub mod automation;
pub mod binder;
pub mod builtin;
pub mod context;
pub mod control;
pub mod engine;
pub mod interceptor;
pub mod interceptors;
pub mod list;
pub mod registry;
pub mod template;

pub use automation::{Automation, AutomationConfig};
pub use binder::{BoundStep, StepBinder};
pub use context::EventContext;
pub use engine::{AutomationOutcome, Engine, EngineConfig, ProcessedEvent};
pub use interceptor::{AutomationFn, AutomationInterceptorFn, InterceptorFn, InterceptorRegistry};
pub use list::{ActionList, PredicateList, VariableList};
pub use registry::{BoundFn, CapabilityRegistry, StepCall, StepFuture, StepMeta};
pub use template::{render_value, TemplateRenderer};

pub use rulekit_core::{
    ActionOutcome, CapabilityKind, Context, EngineError, EngineResult, Event, EventType,
    StepDefinition, ELSE_BRANCH,
};
pub use rulekit_trace::{ExecutionTrace, TraceChildren, TraceContext, TraceEntry};
