use thiserror::Error;

use crate::models::decision::{Decision, DecisionStatus};

/// Error taxonomy for engine operations.
///
/// Validation errors (`StepMismatch`, `Unauthorized`, `AlreadyTerminal`,
/// `NothingToEscalate`) are final for the attempted operation and must not be
/// retried. `ConcurrentModification` is safe to retry after re-reading
/// current state. `Persistence` aborts the transition atomically.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("decision not found")]
    NotFound,

    #[error("invalid policy configuration: {0}")]
    InvalidPolicyConfiguration(String),

    #[error("no applicable approval steps for this request")]
    NoApplicableSteps,

    #[error("step {requested} is not the current step ({current})")]
    StepMismatch { requested: i32, current: i32 },

    #[error("actor is not authorized to act on this step")]
    Unauthorized,

    #[error("decision is already {status}")]
    AlreadyTerminal { status: DecisionStatus },

    #[error("decision was modified concurrently; re-read before retrying")]
    ConcurrentModification,

    #[error("current step is not overdue; nothing to escalate")]
    NothingToEscalate,

    #[error("persistence failure: {0}")]
    Persistence(#[from] anyhow::Error),
}

/// A rejected transition, carrying the current (unchanged) decision snapshot
/// when one could be loaded, so callers can reconcile UI state without a
/// second read.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct TransitionError {
    #[source]
    pub kind: EngineError,
    pub decision: Option<Box<Decision>>,
}

impl TransitionError {
    pub fn new(kind: EngineError) -> Self {
        Self {
            kind,
            decision: None,
        }
    }

    pub fn rejected(kind: EngineError, decision: Decision) -> Self {
        Self {
            kind,
            decision: Some(Box::new(decision)),
        }
    }
}

impl From<EngineError> for TransitionError {
    fn from(kind: EngineError) -> Self {
        Self::new(kind)
    }
}
