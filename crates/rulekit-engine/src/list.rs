//! Step list aggregates
//!
//! Bound steps are evaluated in groups: variables resolve in declaration
//! order (or concurrently when the automation opts in), predicates combine
//! as any/all/none with short-circuiting, and actions run to completion or
//! until one of them signals otherwise.

use std::sync::Arc;

use futures::future::join_all;
use rulekit_core::{ActionOutcome, EngineResult};
use tracing::debug;

use crate::binder::BoundStep;
use crate::context::EventContext;

/// An ordered list of bound variable steps
#[derive(Clone, Debug, Default)]
pub struct VariableList {
    steps: Vec<BoundStep<()>>,
}

impl VariableList {
    pub fn new(steps: Vec<BoundStep<()>>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Resolve every variable in declaration order, stopping at the first
    /// failure
    pub async fn resolve_all(&self, ctx: &Arc<EventContext>) -> EngineResult<()> {
        for step in &self.steps {
            step.invoke(ctx).await?;
        }
        Ok(())
    }

    /// Resolve every variable concurrently
    ///
    /// All resolutions run to completion; if any failed, the first error
    /// in declaration order is returned.
    pub async fn resolve_concurrent(&self, ctx: &Arc<EventContext>) -> EngineResult<()> {
        let results = join_all(self.steps.iter().map(|step| step.invoke(ctx))).await;
        for result in results {
            result?;
        }
        Ok(())
    }
}

/// An ordered list of bound predicates (triggers or conditions)
#[derive(Clone, Debug, Default)]
pub struct PredicateList {
    steps: Vec<BoundStep<bool>>,
}

impl PredicateList {
    pub fn new(steps: Vec<BoundStep<bool>>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// True if at least one predicate holds. Empty list: false.
    pub async fn any(&self, ctx: &Arc<EventContext>) -> EngineResult<bool> {
        for step in &self.steps {
            if step.invoke(ctx).await? {
                debug!(name = %step.name(), "predicate matched");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// True if every predicate holds. Empty list: true.
    pub async fn all(&self, ctx: &Arc<EventContext>) -> EngineResult<bool> {
        for step in &self.steps {
            if !step.invoke(ctx).await? {
                debug!(name = %step.name(), "predicate did not hold");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// True if no predicate holds. Empty list: true.
    pub async fn none(&self, ctx: &Arc<EventContext>) -> EngineResult<bool> {
        for step in &self.steps {
            if step.invoke(ctx).await? {
                debug!(name = %step.name(), "predicate matched");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// An ordered list of bound actions
#[derive(Clone, Debug, Default)]
pub struct ActionList {
    steps: Vec<BoundStep<ActionOutcome>>,
}

impl ActionList {
    pub fn new(steps: Vec<BoundStep<ActionOutcome>>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run the actions in order
    ///
    /// A `Stop` outcome ends this list (and only this list) and the run
    /// continues normally after it. `Pause` propagates immediately so the
    /// enclosing composites can record their resume markers. Errors
    /// propagate, including the stop-automation signal which is caught at
    /// the automation's top-level action list.
    pub async fn execute_all(&self, ctx: &Arc<EventContext>) -> EngineResult<ActionOutcome> {
        for step in &self.steps {
            match step.invoke(ctx).await? {
                ActionOutcome::Continue => {}
                ActionOutcome::Stop => {
                    debug!(name = %step.name(), "action stopped the sequence");
                    break;
                }
                ActionOutcome::Pause => return Ok(ActionOutcome::Pause),
            }
        }
        Ok(ActionOutcome::Continue)
    }
}
