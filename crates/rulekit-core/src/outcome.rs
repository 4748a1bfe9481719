//! Action control-flow outcomes

use serde::{Deserialize, Serialize};

/// Result of executing a single action, driving the action state machine
///
/// - `Continue`: proceed to the next action in the current list
/// - `Stop`: abort the remainder of the current list; the list reports
///   normal completion (break, not an error)
/// - `Pause`: suspend the entire ongoing action-list run; composite actions
///   propagate this upward, each pushing a branch marker onto the
///   execution stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Continue,
    Stop,
    Pause,
}

impl ActionOutcome {
    /// Whether this outcome lets the current list proceed
    pub fn is_continue(&self) -> bool {
        matches!(self, ActionOutcome::Continue)
    }
}
