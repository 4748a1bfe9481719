//! The per-run trace recorder

use std::sync::Mutex;

use rulekit_core::CapabilityKind;
use tracing::warn;

use crate::entry::{ExecutionTrace, TraceChildren, TraceEntry};
use crate::now_millis;

struct TraceInner {
    alias: String,
    started: i64,
    /// Scope stack; index 0 is the root scope and is never popped
    scopes: Vec<TraceChildren>,
    /// Scope popped by the most recent `exit_scope`, waiting to be attached
    /// as the `children` of the composite entry recorded next
    pending_children: Option<TraceChildren>,
}

/// Stack-based hierarchical recorder for one automation run
///
/// All methods take `&self`; the recorder is driven from a single task per
/// run, the mutex only guards against the context being shared via `Arc`.
pub struct TraceContext {
    inner: Mutex<TraceInner>,
}

impl TraceContext {
    /// Start recording a run for the given automation alias
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(TraceInner {
                alias: alias.into(),
                started: now_millis(),
                scopes: vec![TraceChildren::default()],
                pending_children: None,
            }),
        }
    }

    /// Append an entry of the given kind to the current scope
    pub fn add(&self, kind: CapabilityKind, entry: TraceEntry) {
        match kind {
            CapabilityKind::Variable => self.add_variable(entry),
            CapabilityKind::Trigger => self.add_trigger(entry),
            CapabilityKind::Condition => self.add_condition(entry),
            CapabilityKind::Action => self.add_action(entry),
        }
    }

    /// Append a variable entry to the current scope
    pub fn add_variable(&self, entry: TraceEntry) {
        let mut inner = self.inner.lock().unwrap();
        current(&mut inner).variables.push(entry);
    }

    /// Append a trigger entry to the current scope
    pub fn add_trigger(&self, entry: TraceEntry) {
        let mut inner = self.inner.lock().unwrap();
        current(&mut inner).triggers.push(entry);
    }

    /// Append a condition entry to the current scope
    pub fn add_condition(&self, entry: TraceEntry) {
        let mut inner = self.inner.lock().unwrap();
        current(&mut inner).conditions.push(entry);
    }

    /// Append an action entry to the current scope
    ///
    /// If a nested scope was just exited, its children attach to this
    /// entry: the composite action that ran the branch is recorded right
    /// after its branch finishes.
    pub fn add_action(&self, mut entry: TraceEntry) {
        let mut inner = self.inner.lock().unwrap();
        if entry.children.is_none() {
            entry.children = inner
                .pending_children
                .take()
                .filter(|c| !c.is_empty())
                .map(Box::new);
        } else {
            inner.pending_children = None;
        }
        current(&mut inner).actions.push(entry);
    }

    /// Set the single result entry of the current scope
    pub fn set_result(&self, entry: TraceEntry) {
        let mut inner = self.inner.lock().unwrap();
        current(&mut inner).result = Some(entry);
    }

    /// Push a fresh nested scope; subsequent entries record into it
    pub fn enter_scope(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.scopes.push(TraceChildren::default());
    }

    /// Pop back to the parent scope
    ///
    /// The popped scope is parked until the next `add_action` attaches it
    /// as that entry's children. Refuses to pop below the root.
    pub fn exit_scope(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.scopes.len() <= 1 {
            warn!("trace scope underflow ignored");
            return;
        }
        let popped = inner.scopes.pop().expect("scope stack checked above");
        inner.pending_children = Some(popped);
    }

    /// Current nesting depth (1 = root only)
    pub fn depth(&self) -> usize {
        self.inner.lock().unwrap().scopes.len()
    }

    /// Stamp the finish time and return the finished, fully nested tree
    ///
    /// The root scope's contents become the trace's top-level fields. Any
    /// scopes left open (a bug in a composite) collapse into the root.
    pub fn complete(&self) -> ExecutionTrace {
        let mut inner = self.inner.lock().unwrap();
        while inner.scopes.len() > 1 {
            warn!("unclosed trace scope at completion");
            let popped = inner.scopes.pop().expect("scope stack checked above");
            let root = current(&mut inner);
            root.variables.extend(popped.variables);
            root.triggers.extend(popped.triggers);
            root.conditions.extend(popped.conditions);
            root.actions.extend(popped.actions);
        }

        let root = inner.scopes[0].clone();
        ExecutionTrace {
            alias: inner.alias.clone(),
            started: inner.started,
            finished: Some(now_millis()),
            variables: root.variables,
            triggers: root.triggers,
            conditions: root.conditions,
            actions: root.actions,
            result: root.result,
        }
    }
}

fn current(inner: &mut TraceInner) -> &mut TraceChildren {
    inner
        .scopes
        .last_mut()
        .expect("scope stack always holds the root")
}
