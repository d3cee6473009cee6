/// Crate-wide error taxonomy
///
/// Every fallible operation in the core returns one of these variants so
/// callers (and the HTTP layer) can map outcomes without string matching.

use thiserror::Error;

/// Errors produced by the workflow core
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The referenced definition, version, run, node, or edge does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness or optimistic-concurrency violation: duplicate id, lost
    /// revision race, or a lock held by another instance
    #[error("conflict: {0}")]
    Conflict(String),

    /// An edge references a node that is not in the graph
    #[error("endpoint not found: {0}")]
    EndpointNotFound(String),

    /// The requested status change is not in the transition table
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// A transition or update was attempted on an entry already in a terminal
    /// state
    #[error("already terminal: {0}")]
    AlreadyTerminal(String),

    /// An unlock by an instance that does not hold the lock
    #[error("lock not held: {0}")]
    LockNotHeld(String),

    /// Malformed caller input
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
