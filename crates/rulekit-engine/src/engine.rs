//! The engine orchestrator
//!
//! Owns the capability and interceptor registries, the registered
//! automations, and the per-event run loop: variables, then triggers, then
//! conditions, then the action list, then the optional result value. Each
//! run goes through the automation-level interceptor chain, and completed
//! events are broadcast to subscribers.

use std::sync::{Arc, RwLock};

use rulekit_core::{ActionOutcome, EngineError, EngineResult, Event};
use rulekit_trace::{now_millis, ExecutionTrace, TraceEntry};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::automation::{Automation, AutomationConfig};
use crate::binder::StepBinder;
use crate::builtin;
use crate::context::EventContext;
use crate::control;
use crate::interceptor::{AutomationFn, InterceptorRegistry};
use crate::interceptors::{install_logging, install_templating, install_tracing};
use crate::registry::CapabilityRegistry;
use crate::template::{render_value, TemplateRenderer};

fn default_channel_capacity() -> usize {
    1024
}

/// Engine tuning knobs
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of the processed-event broadcast channel
    pub channel_capacity: usize,

    /// Record an execution trace for every run
    pub tracing: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            tracing: false,
        }
    }
}

/// The result of evaluating one automation against one event
#[derive(Debug, Clone)]
pub struct AutomationOutcome {
    pub automation_id: String,
    pub alias: Option<String>,

    /// False means triggers or conditions did not pass; never an error
    pub executed: bool,

    /// True when the run paused with resume markers on the context's
    /// execution stack
    pub suspended: bool,

    /// The automation's declared result value, when it ran to completion
    pub result: Option<Value>,

    /// The finished execution trace, when tracing was enabled for the run
    pub trace: Option<ExecutionTrace>,

    /// The context the run used; carries final metadata and, for a
    /// suspended run, the execution stack to persist for resume
    pub context: Arc<EventContext>,
}

impl AutomationOutcome {
    fn skipped(automation: &Automation, ctx: Arc<EventContext>) -> Self {
        Self {
            automation_id: automation.id().to_string(),
            alias: automation.config().alias.clone(),
            executed: false,
            suspended: false,
            result: None,
            trace: ctx.take_trace().map(|t| t.complete()),
            context: ctx,
        }
    }

    fn executed(
        automation: &Automation,
        ctx: Arc<EventContext>,
        suspended: bool,
        result: Option<Value>,
    ) -> Self {
        Self {
            automation_id: automation.id().to_string(),
            alias: automation.config().alias.clone(),
            executed: true,
            suspended,
            result,
            trace: ctx.take_trace().map(|t| t.complete()),
            context: ctx,
        }
    }
}

/// An event after all automations were evaluated against it, broadcast to
/// subscribers
#[derive(Debug, Clone)]
pub struct ProcessedEvent {
    pub event: Event,

    /// The shared run context; absent when automations ran isolated
    pub context: Option<Arc<EventContext>>,
}

/// The rule engine
///
/// Construction order matters: interceptor chains are composed when an
/// automation is built, so install the renderer and any host interceptors
/// before building automations.
pub struct Engine {
    capabilities: Arc<CapabilityRegistry>,
    interceptors: Arc<InterceptorRegistry>,
    binder: StepBinder,
    renderer: Option<Arc<dyn TemplateRenderer>>,
    automations: RwLock<Vec<Arc<Automation>>>,
    processed_tx: broadcast::Sender<ProcessedEvent>,
    config: EngineConfig,
}

impl Engine {
    /// Create an engine with default configuration
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create an engine, installing the stock capabilities, control-flow
    /// actions, and shipped interceptors
    pub fn with_config(config: EngineConfig) -> Self {
        let capabilities = Arc::new(CapabilityRegistry::new());
        builtin::install(&capabilities);
        control::install(&capabilities);

        let interceptors = Arc::new(InterceptorRegistry::new());
        install_logging(&interceptors);
        install_tracing(&interceptors);

        let binder = StepBinder::new(capabilities.clone(), interceptors.clone());
        let (processed_tx, _) = broadcast::channel(config.channel_capacity.max(1));

        Self {
            capabilities,
            interceptors,
            binder,
            renderer: None,
            automations: RwLock::new(Vec::new()),
            processed_tx,
            config,
        }
    }

    /// Install a template renderer; step parameters and result values get
    /// rendered against the context from then on
    pub fn with_renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        install_templating(&self.interceptors, renderer.clone());
        self.renderer = Some(renderer);
        self
    }

    /// The capability registry, for hosts registering their own
    /// capabilities
    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    /// The interceptor registry, for hosts registering their own
    /// interceptors
    pub fn interceptors(&self) -> &InterceptorRegistry {
        &self.interceptors
    }

    /// The step binder
    pub fn binder(&self) -> &StepBinder {
        &self.binder
    }

    /// Bind a config into an automation without registering it
    pub fn build_automation(&self, config: AutomationConfig) -> EngineResult<Automation> {
        Automation::build(config, &self.binder)
    }

    /// Register an automation for event processing
    pub fn register(&self, automation: Automation) -> EngineResult<Arc<Automation>> {
        let automation = Arc::new(automation);
        let mut automations = self.automations.write().unwrap();
        if automations.iter().any(|a| a.id() == automation.id()) {
            return Err(EngineError::InvalidDefinition(format!(
                "automation id already registered: {}",
                automation.id()
            )));
        }
        debug!(automation = %automation.id(), "registered automation");
        automations.push(automation.clone());
        Ok(automation)
    }

    /// Build and register in one step
    pub fn add(&self, config: AutomationConfig) -> EngineResult<Arc<Automation>> {
        self.register(self.build_automation(config)?)
    }

    /// Remove an automation by id; returns whether one was removed
    pub fn remove(&self, id: &str) -> bool {
        let mut automations = self.automations.write().unwrap();
        let before = automations.len();
        automations.retain(|a| a.id() != id);
        before != automations.len()
    }

    /// Remove every registered automation
    pub fn remove_all(&self) {
        self.automations.write().unwrap().clear();
    }

    /// Snapshot of the registered automations
    pub fn automations(&self) -> Vec<Arc<Automation>> {
        self.automations.read().unwrap().clone()
    }

    /// Subscribe to events after all automations were evaluated
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessedEvent> {
        self.processed_tx.subscribe()
    }

    /// Evaluate every registered automation against an event, in
    /// registration order over one shared context
    ///
    /// Sequential evaluation preserves registration-order effects on the
    /// shared metadata. The first capability error aborts the remaining
    /// automations and propagates.
    pub async fn process_event(&self, event: Event) -> EngineResult<Vec<AutomationOutcome>> {
        let automations = self.automations();
        debug!(
            event_type = %event.event_type.as_str(),
            automations = automations.len(),
            "processing event"
        );

        let ctx = Arc::new(EventContext::new(event.clone()));
        let run = self.chained_run();
        let mut outcomes = Vec::with_capacity(automations.len());
        for automation in automations {
            outcomes.push(run(automation, ctx.clone()).await?);
        }

        // Nobody listening is fine
        let _ = self.processed_tx.send(ProcessedEvent {
            event,
            context: Some(ctx),
        });
        Ok(outcomes)
    }

    /// Evaluate every registered automation concurrently, each over its
    /// own context
    ///
    /// Each run sees the event under a child of the incoming causality
    /// context, so separate runs stay attributable to the one event that
    /// set them off. All runs complete before the first error (in
    /// registration order) is reported.
    pub async fn process_event_isolated(
        &self,
        event: Event,
    ) -> EngineResult<Vec<AutomationOutcome>> {
        let automations = self.automations();
        let run = self.chained_run();

        let runs = automations.into_iter().map(|automation| {
            let mut run_event = event.clone();
            run_event.context = event.context.child();
            let ctx = Arc::new(EventContext::new(run_event));
            run(automation, ctx)
        });
        let results = futures::future::join_all(runs).await;

        let mut outcomes = Vec::with_capacity(results.len());
        for result in results {
            outcomes.push(result?);
        }

        let _ = self.processed_tx.send(ProcessedEvent {
            event,
            context: None,
        });
        Ok(outcomes)
    }

    /// Evaluate one automation against a supplied context, bypassing the
    /// registry
    ///
    /// This is the entry point for ad-hoc runs and for resuming a
    /// suspended run: restore the persisted execution stack onto the
    /// context first, and the run goes straight to the action list.
    pub async fn execute(
        &self,
        automation: Arc<Automation>,
        ctx: Arc<EventContext>,
    ) -> EngineResult<AutomationOutcome> {
        self.chained_run()(automation, ctx).await
    }

    fn chained_run(&self) -> AutomationFn {
        let renderer = self.renderer.clone();
        let tracing = self.config.tracing;
        let terminal: AutomationFn = Arc::new(move |automation, ctx| {
            let renderer = renderer.clone();
            Box::pin(run_automation(automation, ctx, renderer, tracing))
        });
        self.interceptors.automation_chain(terminal)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// One automation run: the terminal of the automation interceptor chain
async fn run_automation(
    automation: Arc<Automation>,
    ctx: Arc<EventContext>,
    renderer: Option<Arc<dyn TemplateRenderer>>,
    tracing: bool,
) -> EngineResult<AutomationOutcome> {
    if tracing {
        ctx.trace_or_init(automation.display_name());
    }

    // A context with suspended branches is a resume: the variables,
    // triggers, and conditions already passed when the run first started,
    // so it goes straight back into the action list.
    let resuming = ctx.has_suspended_branches();
    if !resuming {
        automation.resolve_variables(&ctx).await?;

        if !automation.any_trigger_activated(&ctx).await? {
            debug!(automation = %automation.id(), "no trigger fired, skipping");
            return Ok(AutomationOutcome::skipped(&automation, ctx));
        }
        if !automation.all_conditions_met(&ctx).await? {
            debug!(automation = %automation.id(), "conditions not met, skipping");
            return Ok(AutomationOutcome::skipped(&automation, ctx));
        }
    }

    let outcome = automation.perform_actions(&ctx).await?;
    let suspended = outcome == ActionOutcome::Pause;

    let result = if suspended {
        None
    } else {
        compute_result(&automation, &ctx, renderer.as_deref())?
    };
    if let (Some(trace), Some(result)) = (ctx.trace(), &result) {
        let mut entry = TraceEntry::new("result", None, now_millis());
        entry.value = Some(result.clone());
        trace.set_result(entry);
    }

    debug!(
        automation = %automation.id(),
        suspended,
        "automation run finished"
    );
    Ok(AutomationOutcome::executed(&automation, ctx, suspended, result))
}

fn compute_result(
    automation: &Automation,
    ctx: &Arc<EventContext>,
    renderer: Option<&dyn TemplateRenderer>,
) -> EngineResult<Option<Value>> {
    let Some(spec) = automation.result_spec() else {
        return Ok(None);
    };
    match renderer {
        Some(renderer) => render_value(renderer, spec, &ctx.template_scope()).map(Some),
        None => Ok(Some(spec.clone())),
    }
}
