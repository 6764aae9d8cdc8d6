//! Error types for transbandit.
//!
//! All errors are strongly typed using thiserror. Configuration problems are
//! reported as `ValidationError` at construction time; failures while running
//! a world are reported as `ExecutionError`.
//!
//! "No evidence" situations (an empty log, an oracle that cannot answer) are
//! not errors and never surface here; they are modelled as `Option` values.

use thiserror::Error;

use crate::id::AgentId;

/// Validation errors that occur while building agents, environments or configs.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Unknown action-selection rule '{name}'")]
    UnknownSelectionRule {
        name: String,
    },

    #[error("Unknown agent variant '{name}'")]
    UnknownVariant {
        name: String,
    },

    #[error("Parameter '{parameter}' has invalid value {value}")]
    ParameterOutOfRange {
        parameter: String,
        value: f64,
    },

    #[error("Variable '{variable}' has an empty domain")]
    EmptyDomain {
        variable: String,
    },

    #[error("Invalid causal model: {reason}")]
    InvalidCausalModel {
        reason: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },
}

impl ValidationError {
    /// Builds a `ParameterOutOfRange` error.
    #[must_use]
    pub fn out_of_range(parameter: impl Into<String>, value: f64) -> Self {
        Self::ParameterOutOfRange {
            parameter: parameter.into(),
            value,
        }
    }
}

/// Execution errors that occur while agents act or the ledger is refreshed.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Agent not registered with the ledger: {agent}")]
    AgentNotRegistered {
        agent: AgentId,
    },

    #[error("Unknown variable: {variable}")]
    UnknownVariable {
        variable: String,
    },

    #[error("Sampling failed: {reason}")]
    Sampling {
        reason: String,
    },

    #[error("Monte-Carlo worker failed: {reason}")]
    WorkerFailed {
        reason: String,
    },
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum BanditError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl BanditError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

/// Result type alias for transbandit operations.
pub type BanditResult<T> = Result<T, BanditError>;
