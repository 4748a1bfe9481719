//! Execution-trace accumulator
//!
//! This crate records what happened during a single automation run as a
//! nested, timestamped tree. A [`TraceContext`] is created lazily per run;
//! its absence on the event context means tracing is disabled for that run
//! and every recording call becomes a cheap no-op at the caller.
//!
//! The accumulator is a stack of [`TraceChildren`] scopes. Plain steps
//! append entries to the current (top-of-stack) scope; a composite action
//! pushes a fresh scope before running a branch and pops it afterwards, so
//! the branch's entries end up as the `children` of the composite's own
//! entry and never mix with the parent scope.
//!
//! The finished [`ExecutionTrace`] is a plain serde structure with stable
//! field names, suitable for direct JSON export to UI/tooling consumers.

mod entry;
mod record;

pub use entry::{ExecutionTrace, TraceChildren, TraceEntry};
pub use record::TraceContext;

/// Current epoch time in milliseconds, the unit used by all trace fields
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
