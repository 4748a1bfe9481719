//! Engine error taxonomy

use thiserror::Error;

use crate::CapabilityKind;

/// Errors raised while binding or running automations
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// No capability registered under this kind and name (bind time)
    #[error("{kind} capability not found: {name}")]
    CapabilityNotFound { kind: CapabilityKind, name: String },

    /// Raw parameters do not fit the capability's expected shape
    #[error("invalid parameters for {kind} {name}: {message}")]
    ParameterConversion {
        kind: CapabilityKind,
        name: String,
        message: String,
    },

    /// Malformed step or automation definition (refused before registration)
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    /// Intentional early exit raised from within an action; swallowed at
    /// the action-list boundary and treated as normal completion
    #[error("automation stopped: {0}")]
    StopAutomation(String),

    /// A trigger/condition/action/variable implementation failed
    #[error("{kind} {name} failed: {message}")]
    Execution {
        kind: CapabilityKind,
        name: String,
        message: String,
    },

    /// Template rendering failed
    #[error("template error: {0}")]
    Template(String),
}

impl EngineError {
    /// Shorthand for a capability execution failure
    pub fn execution(
        kind: CapabilityKind,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        EngineError::Execution {
            kind,
            name: name.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a parameter conversion failure
    pub fn conversion(
        kind: CapabilityKind,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        EngineError::ParameterConversion {
            kind,
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
