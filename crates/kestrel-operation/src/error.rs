//! Error types for operation state handling

use chrono::{DateTime, Utc};
use kestrel_objstore::ObjectStoreError;
use thiserror::Error;

/// Error type for operation state and persistence
#[derive(Debug, Error)]
pub enum OperationError {
    /// Operation or document absent in durable storage
    #[error("not found: {0}")]
    NotFound(String),

    /// Phase name is not part of the operation's phase order
    #[error("unknown phase {0:?}")]
    UnknownPhase(String),

    /// Phase name listed more than once
    #[error("duplicate phase {0:?}")]
    DuplicatePhase(String),

    /// A phase name was required but empty
    #[error("phase name is required")]
    EmptyPhase,

    /// Persisted document violates an operation invariant
    #[error("invalid operation document {id}: {reason}")]
    InvalidDocument { id: String, reason: String },

    /// A fixed context field already holds a different value
    #[error("operation already tracks {key} {existing:?}, cannot switch to {requested:?}")]
    ContextConflict {
        key: String,
        existing: String,
        requested: String,
    },

    /// Another executor holds the operation lease
    #[error("operation {id} is leased by {holder} until {expires_at}")]
    LeaseHeld {
        id: String,
        holder: String,
        expires_at: DateTime<Utc>,
    },

    /// Object store failure
    #[error("state store error: {0}")]
    Store(#[from] ObjectStoreError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OperationError {
    /// True if the error means "never written", as opposed to an outage
    pub fn is_not_found(&self) -> bool {
        match self {
            OperationError::NotFound(_) => true,
            OperationError::Store(err) => err.is_not_found(),
            _ => false,
        }
    }
}

/// Result type for operation handling
pub type Result<T> = std::result::Result<T, OperationError>;
