//! Trace data structures

use serde::{Deserialize, Serialize};

/// One recorded step evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Capability name of the step
    pub name: String,

    /// Step alias, if the definition carried one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Start time, epoch milliseconds
    pub started: i64,

    /// Wall-clock duration of the evaluation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,

    /// Evaluation outcome (boolean for triggers/conditions, control-flow
    /// outcome for actions, null for variables)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,

    /// Error message when the evaluation failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Nested scope recorded by a composite action's branch; boxed to keep
    /// the mutually recursive entry/children pair finite-size
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Box<TraceChildren>>,
}

impl TraceEntry {
    /// Create an entry with a start timestamp and nothing else recorded yet
    pub fn new(name: impl Into<String>, alias: Option<String>, started: i64) -> Self {
        Self {
            name: name.into(),
            alias,
            started,
            duration_ms: None,
            value: None,
            error: None,
            children: None,
        }
    }
}

/// Ordered per-kind entries recorded within one scope
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceChildren {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<TraceEntry>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<TraceEntry>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<TraceEntry>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<TraceEntry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TraceEntry>,
}

impl TraceChildren {
    /// Whether nothing was recorded in this scope
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
            && self.triggers.is_empty()
            && self.conditions.is_empty()
            && self.actions.is_empty()
            && self.result.is_none()
    }
}

/// The finished trace of one automation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTrace {
    /// Automation alias (or id) the run belongs to
    pub alias: String,

    /// Run start, epoch milliseconds
    pub started: i64,

    /// Run finish, epoch milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<TraceEntry>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<TraceEntry>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<TraceEntry>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<TraceEntry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TraceEntry>,
}
