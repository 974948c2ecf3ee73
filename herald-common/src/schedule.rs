//! Schedules and their lifecycle.
//!
//! A schedule moves `scheduled -> processing -> sent | failed` within one
//! processing run. `cancelled` is set by the user-facing layer and is never
//! produced by the engine.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::update::UpdateId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleId(pub i64);

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Scheduled,
    Processing,
    Sent,
    Failed,
    Cancelled,
}

impl ScheduleStatus {
    /// The value stored in the `status` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Cancelled)
    }

    /// Whether the engine may move a schedule from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Scheduled, Self::Processing) | (Self::Processing, Self::Sent | Self::Failed)
        )
    }

    /// Validate a transition, returning the new status.
    ///
    /// # Errors
    ///
    /// Returns [`StatusError::InvalidTransition`] if the engine is not allowed
    /// to make this move.
    pub const fn transition(self, next: Self) -> Result<Self, StatusError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(StatusError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleStatus {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "processing" => Ok(Self::Processing),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(StatusError::Unknown(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatusError {
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: ScheduleStatus,
        to: ScheduleStatus,
    },

    #[error("Unknown status: {0}")]
    Unknown(String),
}

/// One due broadcast of an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub update_id: UpdateId,
    pub status: ScheduleStatus,
    pub send_at: DateTime<Utc>,
}

/// Per-schedule recipient counters for one processing run.
///
/// The terminal status is derived from these once the recipient stream is
/// exhausted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub total: u64,
    pub sent: u64,
    pub failed: u64,
}

impl Tally {
    pub const fn record(&mut self, delivered: bool) {
        self.total += 1;
        if delivered {
            self.sent += 1;
        } else {
            self.failed += 1;
        }
    }

    /// `sent` iff nothing failed, otherwise `failed` with a `failed/total`
    /// summary.
    #[must_use]
    pub fn terminal_status(&self) -> (ScheduleStatus, Option<String>) {
        if self.failed == 0 {
            (ScheduleStatus::Sent, None)
        } else {
            (
                ScheduleStatus::Failed,
                Some(format!(
                    "{}/{} recipients failed",
                    self.failed, self.total
                )),
            )
        }
    }
}
