//! Error types for workflow driving

use kestrel_inventory::InventoryError;
use kestrel_operation::{CleanupErrors, OperationError};
use std::time::Duration;
use thiserror::Error;

/// Error type for driving operations and waiting on collaborators
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Phase logic failed; the phase is persisted as failed
    #[error("phase {phase} failed: {source:#}")]
    PhaseFailed {
        phase: String,
        #[source]
        source: anyhow::Error,
    },

    /// Run stopped on request; the phase stays in-progress
    #[error("operation cancelled")]
    Cancelled,

    /// A bounded wait ran out of time
    #[error("timed out after {timeout:?} waiting for {what}")]
    Timeout { what: String, timeout: Duration },

    /// A polled resource reached a state it cannot recover from
    #[error("{what} reached terminal state: {reason}")]
    Terminal { what: String, reason: String },

    /// One or more cleanup actions failed during abort
    #[error(transparent)]
    Cleanup(#[from] CleanupErrors),

    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    /// Error returned by an external collaborator
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl WorkflowError {
    /// True for `Cancelled`, including when wrapped in an `anyhow::Error`
    pub fn is_cancellation(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<WorkflowError>(), Some(WorkflowError::Cancelled))
    }
}

/// Result type for workflow driving
pub type Result<T> = std::result::Result<T, WorkflowError>;
