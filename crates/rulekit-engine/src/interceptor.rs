//! Interceptor chains
//!
//! A chain wraps a bound capability with zero or more ordered cross-cutting
//! behaviors (templating, tracing, logging, host-supplied concerns). The
//! chain is a right fold over the interceptor list: the terminal capability
//! is wrapped by the last interceptor, which is wrapped by the one before
//! it, so invocation order equals list order and each interceptor decides
//! if, when, and how to invoke the remainder.
//!
//! Chains are composed once at bind time and cached on the bound step; they
//! retain no per-call state and are freely re-entrant.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use rulekit_core::ActionOutcome;

use crate::automation::Automation;
use crate::context::EventContext;
use crate::engine::AutomationOutcome;
use crate::registry::{BoundFn, StepCall, StepFuture};

/// A step-level interceptor: receives the call and the remainder of the
/// chain, and may rewrite parameters before `next`, skip `next`, or act
/// after it returns
pub type InterceptorFn<T> = Arc<dyn Fn(StepCall, BoundFn<T>) -> StepFuture<T> + Send + Sync>;

/// The composed automation-level execution path
pub type AutomationFn =
    Arc<dyn Fn(Arc<Automation>, Arc<EventContext>) -> StepFuture<AutomationOutcome> + Send + Sync>;

/// An automation-level interceptor, wrapping one whole automation run
pub type AutomationInterceptorFn = Arc<
    dyn Fn(Arc<Automation>, Arc<EventContext>, AutomationFn) -> StepFuture<AutomationOutcome>
        + Send
        + Sync,
>;

/// Compose an ordered interceptor list around a terminal capability
pub fn compose<T: 'static>(interceptors: &[InterceptorFn<T>], terminal: BoundFn<T>) -> BoundFn<T> {
    let mut next = terminal;
    for interceptor in interceptors.iter().rev() {
        let interceptor = interceptor.clone();
        let inner = next;
        next = Arc::new(move |call| interceptor(call, inner.clone()));
    }
    next
}

/// Compose automation-level interceptors around a terminal run function
pub fn compose_automation(
    interceptors: &[AutomationInterceptorFn],
    terminal: AutomationFn,
) -> AutomationFn {
    let mut next = terminal;
    for interceptor in interceptors.iter().rev() {
        let interceptor = interceptor.clone();
        let inner = next;
        next = Arc::new(move |automation, ctx| interceptor(automation, ctx, inner.clone()));
    }
    next
}

struct Slot<F> {
    priority: i32,
    seq: u64,
    interceptor: F,
}

fn insert_sorted<F>(slots: &mut Vec<Slot<F>>, slot: Slot<F>) {
    let at = slots
        .iter()
        .position(|s| (s.priority, s.seq) > (slot.priority, slot.seq))
        .unwrap_or(slots.len());
    slots.insert(at, slot);
}

fn ordered<F: Clone>(slots: &[Slot<F>]) -> Vec<F> {
    slots.iter().map(|s| s.interceptor.clone()).collect()
}

/// Ordered interceptor registrations, per capability kind plus the
/// automation level
///
/// Ordering is deterministic: ascending priority, with registration order
/// breaking ties. Chains snapshot the registrations at bind time, so
/// interceptors registered later only affect automations built later.
#[derive(Default)]
pub struct InterceptorRegistry {
    seq: AtomicU64,
    triggers: RwLock<Vec<Slot<InterceptorFn<bool>>>>,
    conditions: RwLock<Vec<Slot<InterceptorFn<bool>>>>,
    actions: RwLock<Vec<Slot<InterceptorFn<ActionOutcome>>>>,
    variables: RwLock<Vec<Slot<InterceptorFn<()>>>>,
    automations: RwLock<Vec<Slot<AutomationInterceptorFn>>>,
}

macro_rules! interceptor_registration {
    ($register:ident, $chain:ident, $field:ident, $out:ty) => {
        /// Register an interceptor at the given priority (lower runs first)
        pub fn $register<F>(&self, priority: i32, interceptor: F)
        where
            F: Fn(StepCall, BoundFn<$out>) -> StepFuture<$out> + Send + Sync + 'static,
        {
            let slot = Slot {
                priority,
                seq: self.seq.fetch_add(1, Ordering::SeqCst),
                interceptor: Arc::new(interceptor) as InterceptorFn<$out>,
            };
            insert_sorted(&mut self.$field.write().unwrap(), slot);
        }

        /// Compose the currently registered interceptors around a terminal
        pub fn $chain(&self, terminal: BoundFn<$out>) -> BoundFn<$out> {
            compose(&ordered(&self.$field.read().unwrap()), terminal)
        }
    };
}

impl InterceptorRegistry {
    /// Create an empty interceptor registry
    pub fn new() -> Self {
        Self::default()
    }

    interceptor_registration!(register_trigger_interceptor, trigger_chain, triggers, bool);
    interceptor_registration!(
        register_condition_interceptor,
        condition_chain,
        conditions,
        bool
    );
    interceptor_registration!(
        register_action_interceptor,
        action_chain,
        actions,
        ActionOutcome
    );
    interceptor_registration!(register_variable_interceptor, variable_chain, variables, ());

    /// Register an automation-level interceptor
    pub fn register_automation_interceptor<F>(&self, priority: i32, interceptor: F)
    where
        F: Fn(Arc<Automation>, Arc<EventContext>, AutomationFn) -> StepFuture<AutomationOutcome>
            + Send
            + Sync
            + 'static,
    {
        let slot = Slot {
            priority,
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            interceptor: Arc::new(interceptor) as AutomationInterceptorFn,
        };
        insert_sorted(&mut self.automations.write().unwrap(), slot);
    }

    /// Compose the automation-level chain around a terminal run function
    pub fn automation_chain(&self, terminal: AutomationFn) -> AutomationFn {
        compose_automation(&ordered(&self.automations.read().unwrap()), terminal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StepMeta;
    use rulekit_core::{CapabilityKind, Context, Event};
    use serde_json::{json, Value};
    use std::sync::Mutex;

    fn call() -> StepCall {
        StepCall {
            meta: Arc::new(StepMeta {
                kind: CapabilityKind::Condition,
                name: "test".to_string(),
                alias: None,
            }),
            params: json!({}),
            ctx: Arc::new(EventContext::new(Event::new(
                "test_event",
                json!({}),
                Context::new(),
            ))),
        }
    }

    fn recording_interceptor(
        log: Arc<Mutex<Vec<&'static str>>>,
        label: &'static str,
    ) -> InterceptorFn<bool> {
        Arc::new(move |call, next| {
            let log = log.clone();
            Box::pin(async move {
                log.lock().unwrap().push(label);
                next(call).await
            })
        })
    }

    #[tokio::test]
    async fn test_invocation_order_equals_list_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let interceptors = vec![
            recording_interceptor(log.clone(), "first"),
            recording_interceptor(log.clone(), "second"),
        ];

        let log_terminal = log.clone();
        let terminal: BoundFn<bool> = Arc::new(move |_call| {
            let log = log_terminal.clone();
            Box::pin(async move {
                log.lock().unwrap().push("terminal");
                Ok(true)
            })
        });

        let chain = compose(&interceptors, terminal);
        assert!(chain(call()).await.unwrap());
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "terminal"]);
    }

    #[tokio::test]
    async fn test_interceptor_can_skip_next() {
        let registry = InterceptorRegistry::new();
        registry.register_condition_interceptor(0, |_call, _next| {
            Box::pin(async { Ok(false) }) as StepFuture<bool>
        });

        let terminal: BoundFn<bool> =
            Arc::new(|_call| Box::pin(async { panic!("terminal must not run") }));
        let chain = registry.condition_chain(terminal);
        assert!(!chain(call()).await.unwrap());
    }

    #[tokio::test]
    async fn test_interceptor_can_rewrite_params() {
        let registry = InterceptorRegistry::new();
        registry.register_condition_interceptor(0, |mut call, next| {
            call.params = json!({"rewritten": true});
            next(call)
        });

        let terminal: BoundFn<bool> = Arc::new(|call| {
            Box::pin(async move { Ok(call.params["rewritten"] == Value::Bool(true)) })
        });
        let chain = registry.condition_chain(terminal);
        assert!(chain(call()).await.unwrap());
    }

    #[tokio::test]
    async fn test_priority_then_registration_order() {
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let registry = InterceptorRegistry::new();

        let push = |log: &Arc<Mutex<Vec<&'static str>>>, label: &'static str| {
            let log = log.clone();
            move |call: StepCall, next: BoundFn<bool>| {
                let log = log.clone();
                Box::pin(async move {
                    log.lock().unwrap().push(label);
                    next(call).await
                }) as StepFuture<bool>
            }
        };

        registry.register_condition_interceptor(10, push(&log, "late"));
        registry.register_condition_interceptor(-10, push(&log, "early"));
        registry.register_condition_interceptor(10, push(&log, "late_tie"));

        let terminal: BoundFn<bool> = Arc::new(|_call| Box::pin(async { Ok(true) }));
        let chain = registry.condition_chain(terminal);
        chain(call()).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["early", "late", "late_tie"]);
    }

    #[tokio::test]
    async fn test_chain_is_reentrant() {
        let registry = InterceptorRegistry::new();
        let counter = Arc::new(Mutex::new(0));
        let counter_ic = counter.clone();
        registry.register_condition_interceptor(0, move |call, next| {
            *counter_ic.lock().unwrap() += 1;
            next(call)
        });

        let terminal: BoundFn<bool> = Arc::new(|_call| Box::pin(async { Ok(true) }));
        let chain = registry.condition_chain(terminal);

        for _ in 0..3 {
            chain(call()).await.unwrap();
        }
        assert_eq!(*counter.lock().unwrap(), 3);
    }
}
