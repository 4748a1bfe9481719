//! Per-run execution context
//!
//! An EventContext wraps one incoming event for the duration of a run. Its
//! metadata map is the only channel by which variables communicate values
//! to later triggers, conditions, actions, and result computation in the
//! same run. The context is shared as `Arc<EventContext>` across the run's
//! bound steps; interior mutability replaces `&mut` plumbing through boxed
//! futures.

use std::sync::{Arc, Mutex, RwLock};

use indexmap::IndexMap;
use rulekit_core::Event;
use rulekit_trace::TraceContext;
use serde_json::Value;

/// Mutable state carried through one automation run
pub struct EventContext {
    event: Event,
    /// Ordered metadata map, shared for the whole run
    metadata: RwLock<IndexMap<String, Value>>,
    /// Branch markers of currently suspended composite actions (LIFO)
    execution_stack: Mutex<Vec<i64>>,
    /// Lazily created trace recorder; None means tracing is off for this run
    trace: Mutex<Option<Arc<TraceContext>>>,
}

impl EventContext {
    /// Create a fresh context for an incoming event
    pub fn new(event: Event) -> Self {
        Self {
            event,
            metadata: RwLock::new(IndexMap::new()),
            execution_stack: Mutex::new(Vec::new()),
            trace: Mutex::new(None),
        }
    }

    /// The event this run is processing
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Set (or overwrite) a metadata value
    pub fn set_meta(&self, key: impl Into<String>, value: Value) {
        self.metadata.write().unwrap().insert(key.into(), value);
    }

    /// Get a metadata value
    pub fn meta(&self, key: &str) -> Option<Value> {
        self.metadata.read().unwrap().get(key).cloned()
    }

    /// Remove a metadata value, returning it if present
    pub fn remove_meta(&self, key: &str) -> Option<Value> {
        self.metadata.write().unwrap().shift_remove(key)
    }

    /// Snapshot of the full metadata map, in insertion order
    pub fn metadata(&self) -> IndexMap<String, Value> {
        self.metadata.read().unwrap().clone()
    }

    /// Push a branch marker for a composite action suspending mid-branch
    pub fn push_branch(&self, marker: i64) {
        self.execution_stack.lock().unwrap().push(marker);
    }

    /// Pop the most recent branch marker when resuming
    pub fn pop_branch(&self) -> Option<i64> {
        self.execution_stack.lock().unwrap().pop()
    }

    /// Whether this run is suspended inside nested branches
    pub fn has_suspended_branches(&self) -> bool {
        !self.execution_stack.lock().unwrap().is_empty()
    }

    /// Snapshot of the execution stack, bottom first (for persistence)
    pub fn execution_stack(&self) -> Vec<i64> {
        self.execution_stack.lock().unwrap().clone()
    }

    /// Restore a previously persisted execution stack onto this context
    pub fn restore_execution_stack(&self, stack: Vec<i64>) {
        *self.execution_stack.lock().unwrap() = stack;
    }

    /// The trace recorder, if tracing is enabled for this run
    pub fn trace(&self) -> Option<Arc<TraceContext>> {
        self.trace.lock().unwrap().clone()
    }

    /// Return the run's trace recorder, creating it on first use
    ///
    /// Creating the recorder is what enables tracing for the run; the
    /// alias names the automation in the finished trace.
    pub fn trace_or_init(&self, alias: &str) -> Arc<TraceContext> {
        let mut slot = self.trace.lock().unwrap();
        slot.get_or_insert_with(|| Arc::new(TraceContext::new(alias)))
            .clone()
    }

    /// Detach the trace recorder, leaving the slot empty
    ///
    /// The orchestrator takes the recorder when a run finishes so the next
    /// automation evaluated against the same context starts its own trace.
    pub fn take_trace(&self) -> Option<Arc<TraceContext>> {
        self.trace.lock().unwrap().take()
    }

    /// Scope value handed to template rendering: event payload + metadata
    pub fn template_scope(&self) -> Value {
        let mut scope = serde_json::Map::new();
        scope.insert(
            "event".to_string(),
            serde_json::to_value(&self.event).unwrap_or(Value::Null),
        );
        let metadata: serde_json::Map<String, Value> = self
            .metadata
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        scope.insert("metadata".to_string(), Value::Object(metadata));
        Value::Object(scope)
    }
}

impl std::fmt::Debug for EventContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventContext")
            .field("event_type", &self.event.event_type.as_str())
            .field("metadata_keys", &self.metadata.read().unwrap().len())
            .field("execution_stack", &self.execution_stack.lock().unwrap())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rulekit_core::Context;
    use serde_json::json;

    fn sample_ctx() -> EventContext {
        EventContext::new(Event::new("test_event", json!({"n": 1}), Context::new()))
    }

    #[test]
    fn test_metadata_set_get_overwrite() {
        let ctx = sample_ctx();
        ctx.set_meta("x", json!(1));
        ctx.set_meta("x", json!(2));
        ctx.set_meta("y", json!("on"));

        assert_eq!(ctx.meta("x"), Some(json!(2)));
        assert_eq!(ctx.meta("y"), Some(json!("on")));
        assert_eq!(ctx.meta("missing"), None);
    }

    #[test]
    fn test_metadata_preserves_insertion_order() {
        let ctx = sample_ctx();
        ctx.set_meta("first", json!(1));
        ctx.set_meta("second", json!(2));
        ctx.set_meta("third", json!(3));

        let keys: Vec<_> = ctx.metadata().keys().cloned().collect();
        assert_eq!(keys, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_execution_stack_lifo() {
        let ctx = sample_ctx();
        ctx.push_branch(0);
        ctx.push_branch(2);

        assert!(ctx.has_suspended_branches());
        assert_eq!(ctx.pop_branch(), Some(2));
        assert_eq!(ctx.pop_branch(), Some(0));
        assert_eq!(ctx.pop_branch(), None);
        assert!(!ctx.has_suspended_branches());
    }

    #[test]
    fn test_execution_stack_snapshot_restore() {
        let ctx = sample_ctx();
        ctx.push_branch(1);
        ctx.push_branch(-1);
        let stack = ctx.execution_stack();

        let resumed = sample_ctx();
        resumed.restore_execution_stack(stack);
        assert_eq!(resumed.pop_branch(), Some(-1));
        assert_eq!(resumed.pop_branch(), Some(1));
    }

    #[test]
    fn test_trace_lazy_init() {
        let ctx = sample_ctx();
        assert!(ctx.trace().is_none());

        let trace = ctx.trace_or_init("my_automation");
        let again = ctx.trace_or_init("other_alias");
        assert!(Arc::ptr_eq(&trace, &again));
        assert!(ctx.trace().is_some());
    }

    #[test]
    fn test_template_scope_shape() {
        let ctx = sample_ctx();
        ctx.set_meta("door", json!("open"));

        let scope = ctx.template_scope();
        assert_eq!(scope["event"]["data"]["n"], 1);
        assert_eq!(scope["metadata"]["door"], "open");
    }
}
