//! Typed errors for the delivery engine.
//!
//! Failures are split by how far they reach:
//! - [`SendError`]: one attempt at one email
//! - [`RetryError`]: one recipient, after the retry engine gave up
//! - [`ScheduleError`]: the current schedule only, the sweep moves on
//! - [`SweepError`]: the sweep itself

use std::time::Duration;

use herald_common::{UpdateId, WorkspaceId};
use herald_store::StoreError;
use thiserror::Error;

/// A single send attempt failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    /// Network trouble or a provider-side failure; worth retrying.
    #[error("Temporary failure: {0}")]
    Temporary(String),

    /// The provider refused the email outright; retrying will not help.
    #[error("Permanent failure: {0}")]
    Permanent(String),

    /// The attempt did not finish within the per-send ceiling.
    #[error("Send timed out after {0:?}")]
    Timeout(Duration),
}

impl SendError {
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetryError {
    #[error("max retries exceeded after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: SendError },

    #[error("rejected on attempt {attempt}: {source}")]
    Rejected { attempt: u32, source: SendError },

    #[error("cancelled before the email was sent")]
    Cancelled,

    #[error("send task died: {0}")]
    Panicked(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("Template is missing the {0} placeholder")]
    MissingPlaceholder(&'static str),

    #[error("Update has an empty title")]
    EmptyTitle,
}

/// Aborts processing of one schedule.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("{operation} failed: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("{operation} timed out after {after:?}")]
    DbTimeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Update {0} not found")]
    UpdateNotFound(UpdateId),

    #[error("Workspace {workspace_id} of update {update_id} not found")]
    WorkspaceNotFound {
        update_id: UpdateId,
        workspace_id: WorkspaceId,
    },

    #[error("Rendering failed: {0}")]
    Render(#[from] RenderError),
}

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Failed to page due schedules: {0}")]
    DueSchedules(#[source] ScheduleError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_message_carries_last_error() {
        let err = RetryError::Exhausted {
            attempts: 4,
            last: SendError::Temporary("503 Service Unavailable".to_string()),
        };

        assert_eq!(
            err.to_string(),
            "max retries exceeded after 4 attempts: Temporary failure: 503 Service Unavailable"
        );
    }

    #[test]
    fn test_only_permanent_errors_are_permanent() {
        assert!(SendError::Permanent("invalid address".to_string()).is_permanent());
        assert!(!SendError::Temporary("reset".to_string()).is_permanent());
        assert!(!SendError::Timeout(Duration::from_secs(10)).is_permanent());
    }
}
