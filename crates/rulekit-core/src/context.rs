//! Run causality tracking

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifies what caused an event and on whose behalf it was fired
///
/// Contexts form a chain: a run set off by another run carries a child of
/// that run's context, so tooling can follow `parent_id` links back to the
/// root cause. The `initiated_by` condition matches against `user_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// ULID naming this node in the causality chain
    pub id: String,

    /// Principal the event was fired on behalf of
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Id of the context that caused this one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Context {
    /// A root context: no cause, no principal
    pub fn new() -> Self {
        Self {
            id: Ulid::new().to_string(),
            user_id: None,
            parent_id: None,
        }
    }

    /// A root context fired on behalf of a principal
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::new()
        }
    }

    /// A context caused by this one; the principal carries over
    pub fn child(&self) -> Self {
        Self {
            id: Ulid::new().to_string(),
            user_id: self.user_id.clone(),
            parent_id: Some(self.id.clone()),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_ids_unique() {
        let a = Context::new();
        let b = Context::new();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_child_context_links_parent_and_keeps_user() {
        let parent = Context::for_user("alice");
        let child = parent.child();

        assert_eq!(child.parent_id.as_deref(), Some(parent.id.as_str()));
        assert_eq!(child.user_id.as_deref(), Some("alice"));
        assert_ne!(child.id, parent.id);
    }
}
