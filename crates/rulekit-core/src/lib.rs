//! Core types for rulekit
//!
//! This crate provides the fundamental types used throughout the rulekit
//! automation engine: Event, Context, StepDefinition, CapabilityKind,
//! ActionOutcome, and the EngineError taxonomy.

mod context;
mod error;
mod event;
mod outcome;
mod step;

pub use context::Context;
pub use error::{EngineError, EngineResult};
pub use event::{Event, EventType};
pub use outcome::ActionOutcome;
pub use step::{CapabilityKind, StepDefinition};

/// Branch marker for the "otherwise" branch of a conditional action
pub const ELSE_BRANCH: i64 = -1;
