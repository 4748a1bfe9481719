//! Control-flow actions
//!
//! Composite actions bind their nested definitions at build time through
//! the binder handed to their factory, and are the only actions that touch
//! the context's execution stack. The pause protocol: when a nested list
//! pauses, the composite pushes a marker identifying the branch it is in
//! and propagates the pause upward. On a later run with a restored stack,
//! each composite pops its marker and re-enters that branch directly,
//! bypassing condition evaluation, restarting the branch's actions from
//! their beginning.

use std::sync::Arc;

use rulekit_core::{
    ActionOutcome, EngineError, EngineResult, StepDefinition, ELSE_BRANCH,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, warn};

use crate::binder::StepBinder;
use crate::context::EventContext;
use crate::list::{ActionList, PredicateList};
use crate::registry::{BoundFn, CapabilityRegistry, StepCall, StepFuture};

/// Iteration guard for unbounded repeat modes
const MAX_ITERATIONS: u64 = 10_000;

/// Metadata key the repeat action publishes its loop state under
pub const REPEAT_META_KEY: &str = "repeat";

/// Default wait timeout when none is configured: one hour
const DEFAULT_WAIT_TIMEOUT_MS: u64 = 3_600_000;

/// Register the control-flow actions: `branch`, `repeat`, `sequence`,
/// `wait`, `stop`, and `pause`
pub fn install(capabilities: &CapabilityRegistry) {
    capabilities.register_action_factory("branch", bind_branch);
    capabilities.register_action_factory("repeat", bind_repeat);
    capabilities.register_action_factory("sequence", bind_sequence);
    capabilities.register_action_factory("wait", bind_wait);

    capabilities.register_action_typed("stop", |_ctx, p: StopParams| async move {
        let reason = p.message.unwrap_or_else(|| "stop action".to_string());
        if p.automation {
            Err(EngineError::StopAutomation(reason))
        } else {
            debug!(reason = %reason, "stopping action sequence");
            Ok(ActionOutcome::Stop)
        }
    });

    capabilities.register_action("pause", |_call| async { Ok(ActionOutcome::Pause) });
}

fn invalid(name: &str, err: impl std::fmt::Display) -> EngineError {
    EngineError::InvalidDefinition(format!("bad {} parameters: {}", name, err))
}

/// Run one chosen branch inside its own trace scope
///
/// Pushes `marker` when the branch pauses so a later run re-enters it.
/// The trace scope is closed on every exit path to keep the scope stack
/// symmetric.
async fn run_branch(
    marker: i64,
    actions: &ActionList,
    ctx: &Arc<EventContext>,
) -> EngineResult<ActionOutcome> {
    if actions.is_empty() {
        return Ok(ActionOutcome::Continue);
    }
    let trace = ctx.trace();
    if let Some(trace) = &trace {
        trace.enter_scope();
    }
    let result = actions.execute_all(ctx).await;
    if let Some(trace) = &trace {
        trace.exit_scope();
    }
    match result? {
        ActionOutcome::Pause => {
            debug!(marker, "branch paused, recording resume marker");
            ctx.push_branch(marker);
            Ok(ActionOutcome::Pause)
        }
        _ => Ok(ActionOutcome::Continue),
    }
}

#[derive(Debug, Deserialize)]
struct BranchClauseDef {
    #[serde(default, alias = "if")]
    when: Vec<StepDefinition>,
    #[serde(default)]
    then: Vec<StepDefinition>,
}

#[derive(Debug, Deserialize)]
struct BranchParams {
    #[serde(default)]
    branches: Vec<BranchClauseDef>,
    #[serde(default, alias = "else")]
    otherwise: Vec<StepDefinition>,
}

struct BranchClause {
    when: PredicateList,
    then: ActionList,
}

/// Conditional branching: the first clause whose conditions all hold runs
/// its `then` list; when none hold, the `otherwise` list runs. Markers:
/// the clause index for clauses, [`ELSE_BRANCH`] for `otherwise`.
///
/// Clause conditions evaluate inside the composite's trace scope, so their
/// entries land under the branch entry's children instead of mixing with
/// the run's own conditions.
fn bind_branch(binder: &StepBinder, params: &Value) -> EngineResult<BoundFn<ActionOutcome>> {
    let p: BranchParams =
        serde_json::from_value(params.clone()).map_err(|e| invalid("branch", e))?;
    if p.branches.is_empty() {
        return Err(EngineError::InvalidDefinition(
            "branch action needs at least one clause".to_string(),
        ));
    }

    let clauses = p
        .branches
        .iter()
        .map(|c| {
            Ok(BranchClause {
                when: binder.bind_conditions(&c.when)?,
                then: binder.bind_actions(&c.then)?,
            })
        })
        .collect::<EngineResult<Vec<_>>>()?;
    let clauses = Arc::new(clauses);
    let otherwise = Arc::new(binder.bind_actions(&p.otherwise)?);

    Ok(Arc::new(move |call: StepCall| {
        let clauses = clauses.clone();
        let otherwise = otherwise.clone();
        Box::pin(async move {
            let ctx = call.ctx.clone();

            let trace = ctx.trace();
            if let Some(trace) = &trace {
                trace.enter_scope();
            }
            let result = run_clauses(&clauses, &otherwise, &ctx, &call).await;
            if let Some(trace) = &trace {
                trace.exit_scope();
            }

            match result? {
                (marker, ActionOutcome::Pause) => {
                    debug!(marker, "branch paused, recording resume marker");
                    ctx.push_branch(marker);
                    Ok(ActionOutcome::Pause)
                }
                _ => Ok(ActionOutcome::Continue),
            }
        }) as StepFuture<ActionOutcome>
    }))
}

/// Pick and run one branch, returning its marker alongside the outcome
async fn run_clauses(
    clauses: &[BranchClause],
    otherwise: &ActionList,
    ctx: &Arc<EventContext>,
    call: &StepCall,
) -> EngineResult<(i64, ActionOutcome)> {
    if let Some(marker) = ctx.pop_branch() {
        debug!(marker, "resuming previously chosen branch");
        return match marker {
            ELSE_BRANCH => Ok((ELSE_BRANCH, otherwise.execute_all(ctx).await?)),
            i if i >= 0 && (i as usize) < clauses.len() => {
                Ok((i, clauses[i as usize].then.execute_all(ctx).await?))
            }
            other => Err(call.error(format!("invalid resume marker: {}", other))),
        };
    }

    for (i, clause) in clauses.iter().enumerate() {
        if clause.when.all(ctx).await? {
            return Ok((i as i64, clause.then.execute_all(ctx).await?));
        }
    }
    Ok((ELSE_BRANCH, otherwise.execute_all(ctx).await?))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RepeatParams {
    Count {
        count: u64,
        actions: Vec<StepDefinition>,
    },
    While {
        #[serde(rename = "while")]
        conditions: Vec<StepDefinition>,
        actions: Vec<StepDefinition>,
    },
    Until {
        until: Vec<StepDefinition>,
        actions: Vec<StepDefinition>,
    },
    ForEach {
        for_each: Value,
        actions: Vec<StepDefinition>,
    },
}

enum RepeatMode {
    Count(u64),
    While(PredicateList),
    Until(PredicateList),
    ForEach(Value),
}

/// Resolve a `for_each` source into concrete items: an array is iterated
/// as-is, a string names a metadata key holding the items, anything else
/// iterates once
fn for_each_items(source: &Value, ctx: &EventContext, call: &StepCall) -> EngineResult<Vec<Value>> {
    match source {
        Value::Array(items) => Ok(items.clone()),
        Value::String(key) => match ctx.meta(key) {
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Ok(vec![other]),
            None => Err(call.error(format!("for_each metadata key not set: {}", key))),
        },
        other => Ok(vec![other.clone()]),
    }
}

/// Repetition: fixed count, while, until, or for-each. The loop publishes
/// `{index, first, last, item}` under the `repeat` metadata key, restoring
/// the previous value when it finishes. A pause inside an iteration
/// records the zero-based iteration index as the resume marker.
fn bind_repeat(binder: &StepBinder, params: &Value) -> EngineResult<BoundFn<ActionOutcome>> {
    let p: RepeatParams =
        serde_json::from_value(params.clone()).map_err(|e| invalid("repeat", e))?;
    let (mode, action_defs) = match p {
        RepeatParams::Count { count, actions } => (RepeatMode::Count(count), actions),
        RepeatParams::While {
            conditions,
            actions,
        } => (RepeatMode::While(binder.bind_conditions(&conditions)?), actions),
        RepeatParams::Until { until, actions } => {
            (RepeatMode::Until(binder.bind_conditions(&until)?), actions)
        }
        RepeatParams::ForEach { for_each, actions } => (RepeatMode::ForEach(for_each), actions),
    };
    let actions = Arc::new(binder.bind_actions(&action_defs)?);
    let mode = Arc::new(mode);

    Ok(Arc::new(move |call: StepCall| {
        let actions = actions.clone();
        let mode = mode.clone();
        Box::pin(async move {
            let ctx = call.ctx.clone();
            let saved = ctx.meta(REPEAT_META_KEY);

            let trace = ctx.trace();
            if let Some(trace) = &trace {
                trace.enter_scope();
            }
            let result = run_repeat(&mode, &actions, &ctx, &call).await;
            if let Some(trace) = &trace {
                trace.exit_scope();
            }

            match saved {
                Some(previous) => ctx.set_meta(REPEAT_META_KEY, previous),
                None => {
                    ctx.remove_meta(REPEAT_META_KEY);
                }
            }
            result
        }) as StepFuture<ActionOutcome>
    }))
}

async fn run_repeat(
    mode: &RepeatMode,
    actions: &ActionList,
    ctx: &Arc<EventContext>,
    call: &StepCall,
) -> EngineResult<ActionOutcome> {
    let items = match mode {
        RepeatMode::ForEach(source) => Some(for_each_items(source, ctx, call)?),
        _ => None,
    };
    let total = match mode {
        RepeatMode::Count(count) => Some(*count),
        RepeatMode::ForEach(_) => items.as_ref().map(|i| i.len() as u64),
        _ => None,
    };

    // A restored marker is the iteration to re-enter; its loop conditions
    // are not re-evaluated for that iteration.
    let mut resuming = false;
    let mut index: u64 = match ctx.pop_branch() {
        Some(marker) if marker >= 0 => {
            debug!(marker, "resuming repeat iteration");
            resuming = true;
            marker as u64
        }
        Some(marker) => {
            return Err(call.error(format!("invalid resume marker: {}", marker)));
        }
        None => 0,
    };

    loop {
        if let Some(total) = total {
            if index >= total {
                break;
            }
        }
        // Only the unbounded modes get the guard; a configured count or
        // item list runs to completion however long it is.
        if total.is_none() && index >= MAX_ITERATIONS {
            warn!(limit = MAX_ITERATIONS, "repeat hit the iteration guard");
            break;
        }
        if let RepeatMode::While(conditions) = mode {
            if !resuming && !conditions.all(ctx).await? {
                break;
            }
        }
        resuming = false;

        let mut scope = json!({
            "index": index + 1,
            "first": index == 0,
        });
        if let Some(total) = total {
            scope["last"] = json!(index + 1 == total);
        }
        if let Some(items) = &items {
            scope["item"] = items[index as usize].clone();
        }
        ctx.set_meta(REPEAT_META_KEY, scope);

        if actions.execute_all(ctx).await? == ActionOutcome::Pause {
            ctx.push_branch(index as i64);
            return Ok(ActionOutcome::Pause);
        }
        index += 1;

        if let RepeatMode::Until(conditions) = mode {
            if conditions.all(ctx).await? {
                break;
            }
        }
    }
    Ok(ActionOutcome::Continue)
}

#[derive(Debug, Deserialize)]
struct SequenceParams {
    actions: Vec<StepDefinition>,
}

/// A grouping action: runs its nested list in its own trace scope. Uses
/// marker `0` since it has exactly one branch.
fn bind_sequence(binder: &StepBinder, params: &Value) -> EngineResult<BoundFn<ActionOutcome>> {
    let p: SequenceParams =
        serde_json::from_value(params.clone()).map_err(|e| invalid("sequence", e))?;
    let actions = Arc::new(binder.bind_actions(&p.actions)?);

    Ok(Arc::new(move |call: StepCall| {
        let actions = actions.clone();
        Box::pin(async move {
            let ctx = call.ctx.clone();
            if let Some(marker) = ctx.pop_branch() {
                debug!(marker, "resuming sequence");
            }
            run_branch(0, &actions, &ctx).await
        }) as StepFuture<ActionOutcome>
    }))
}

fn default_poll_ms() -> u64 {
    100
}

#[derive(Debug, Deserialize)]
struct WaitParams {
    #[serde(default)]
    conditions: Vec<StepDefinition>,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default = "default_poll_ms")]
    poll_ms: u64,
}

#[derive(Debug, Deserialize)]
struct StopParams {
    #[serde(default)]
    message: Option<String>,
    /// Stop the whole automation instead of just the current list
    #[serde(default)]
    automation: bool,
}

/// Wait until a condition list holds, polling at a fixed interval. The
/// timeout elapsing is not an error: the run continues past the wait as
/// if it had been satisfied.
fn bind_wait(binder: &StepBinder, params: &Value) -> EngineResult<BoundFn<ActionOutcome>> {
    let p: WaitParams = serde_json::from_value(params.clone()).map_err(|e| invalid("wait", e))?;
    let conditions = Arc::new(binder.bind_conditions(&p.conditions)?);
    let timeout = Duration::from_millis(p.timeout_ms.unwrap_or(DEFAULT_WAIT_TIMEOUT_MS));
    let poll = Duration::from_millis(p.poll_ms.max(1));

    Ok(Arc::new(move |call: StepCall| {
        let conditions = conditions.clone();
        Box::pin(async move {
            let ctx = call.ctx.clone();
            let deadline = Instant::now() + timeout;
            loop {
                if conditions.all(&ctx).await? {
                    return Ok(ActionOutcome::Continue);
                }
                if Instant::now() >= deadline {
                    debug!("wait timed out, continuing");
                    return Ok(ActionOutcome::Continue);
                }
                sleep(poll).await;
            }
        }) as StepFuture<ActionOutcome>
    }))
}
