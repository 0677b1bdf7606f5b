//! Error types for the reconciliation engine.
//!
//! All errors are strongly typed using thiserror. Only two conditions are
//! meant to reach a caller as "needs a decision": [`Rejection::UnresolvedMutex`]
//! from the store, and progressive conflicts reported by the dependency graph.
//! Everything else is either silently recoverable or isolated to one agent.

use std::path::PathBuf;

use thiserror::Error;

use crate::constraint::ConstraintId;

/// Validation errors that occur during input validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Confidence value {value} is out of range [0.0, 1.0]")]
    ConfidenceOutOfRange {
        value: f32,
    },

    #[error("Identifier '{field}' cannot be empty")]
    EmptyIdentifier {
        field: String,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Unknown constraint strength: {raw}")]
    UnknownStrength {
        raw: String,
    },

    #[error("Chosen constraint '{chosen}' is not one of the pair being resolved")]
    ChosenNotInPair {
        chosen: ConstraintId,
    },

    #[error("Unknown use case: {id}")]
    UnknownUseCase {
        id: String,
    },
}

/// Why the store refused a write.
///
/// A rejection never mutates the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// LWW dropped a write that was not strictly newer than the live value.
    #[error("stale: {id} is not newer than the stored constraint")]
    Stale {
        id: ConstraintId,
    },

    /// The mutex partner won on the confidence-margin rule.
    #[error("rejected: {id} has lower confidence than {winner}")]
    LowerConfidence {
        id: ConstraintId,
        winner: ConstraintId,
    },

    /// No auto-resolution rule fired. Must surface as a disambiguation question.
    #[error("unresolved_mutex: requires external disambiguation ({id} vs {partner})")]
    UnresolvedMutex {
        id: ConstraintId,
        partner: ConstraintId,
    },
}

impl Rejection {
    /// Returns true if the rejection needs an external decision.
    #[must_use]
    pub const fn needs_decision(&self) -> bool {
        matches!(self, Self::UnresolvedMutex { .. })
    }

    /// Returns true for stale LWW writes, which are dropped silently.
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }
}

/// Failure of a single extraction agent. Isolated to that agent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("Agent '{agent}' failed: {message}")]
    Failed {
        agent: String,
        message: String,
    },

    #[error("Agent '{agent}' did not finish within {duration_ms}ms")]
    TimedOut {
        agent: String,
        duration_ms: u64,
    },

    #[error("Agent '{agent}' observed cancellation")]
    Cancelled {
        agent: String,
    },

    #[error("Agent pool queue full (capacity {capacity})")]
    QueueFull {
        capacity: usize,
    },

    #[error("Agent pool disconnected")]
    Disconnected,
}

impl AgentError {
    /// Creates a generic failure for an agent.
    #[must_use]
    pub fn failed(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            agent: agent.into(),
            message: message.into(),
        }
    }

    /// Returns true if this failure came from the round deadline.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. } | Self::Cancelled { .. })
    }
}

/// Catalog loading errors. Callers normally recover via the built-in catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid catalog: {reason}")]
    Invalid {
        reason: String,
    },
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Rejected: {0}")]
    Rejected(#[from] Rejection),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl ReconcileError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this error must be surfaced as a disambiguation question.
    #[must_use]
    pub const fn needs_decision(&self) -> bool {
        match self {
            Self::Rejected(r) => r.needs_decision(),
            _ => false,
        }
    }

    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Agent(e) => matches!(
                e,
                AgentError::TimedOut { .. } | AgentError::QueueFull { .. }
            ),
            _ => false,
        }
    }
}

/// Result type alias for engine operations.
pub type ReconcileResult<T> = Result<T, ReconcileError>;
