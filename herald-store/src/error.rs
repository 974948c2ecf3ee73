//! Error types for storage operations.

use herald_common::{ScheduleId, ScheduleStatus, StatusError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The database rejected or failed a query.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A status column held a value the engine does not know.
    #[error("Corrupt row: {0}")]
    Status(#[from] StatusError),

    /// The schedule does not exist.
    #[error("Schedule not found: {0}")]
    ScheduleNotFound(ScheduleId),

    /// The schedule was not in a state that allows the requested move.
    #[error("Schedule {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: ScheduleId,
        from: ScheduleStatus,
        to: ScheduleStatus,
    },

    /// No pending recipient carries this reference.
    #[error("No pending recipient with reference {0}")]
    RecipientNotPending(String),

    /// Internal error (injected faults, lock poisoning, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
