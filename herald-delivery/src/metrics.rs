//! Counters for one sweep.
//!
//! A fresh [`SweepMetrics`] is created per sweep and shared with the workers
//! through an `Arc`. Nothing here is global.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug)]
pub struct SweepMetrics {
    started: Instant,
    schedules_seen: AtomicU64,
    schedules_processed: AtomicU64,
    schedules_skipped: AtomicU64,
    schedules_errored: AtomicU64,
    recipients_sent: AtomicU64,
    recipients_failed: AtomicU64,
    recipients_unsent: AtomicU64,
    send_attempts: AtomicU64,
}

/// Point-in-time copy of [`SweepMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub schedules_seen: u64,
    pub schedules_processed: u64,
    /// Locked by another runner.
    pub schedules_skipped: u64,
    pub schedules_errored: u64,
    pub recipients_sent: u64,
    pub recipients_failed: u64,
    /// Left `pending` because the run was cut short.
    pub recipients_unsent: u64,
    pub send_attempts: u64,
    #[serde(with = "millis")]
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    #[must_use]
    pub const fn recipients_total(&self) -> u64 {
        self.recipients_sent + self.recipients_failed
    }
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }
}

impl Default for SweepMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SweepMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            schedules_seen: AtomicU64::new(0),
            schedules_processed: AtomicU64::new(0),
            schedules_skipped: AtomicU64::new(0),
            schedules_errored: AtomicU64::new(0),
            recipients_sent: AtomicU64::new(0),
            recipients_failed: AtomicU64::new(0),
            recipients_unsent: AtomicU64::new(0),
            send_attempts: AtomicU64::new(0),
        }
    }

    pub fn record_schedule_seen(&self) {
        self.schedules_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_schedule_processed(&self) {
        self.schedules_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_schedule_skipped(&self) {
        self.schedules_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_schedule_error(&self) {
        self.schedules_errored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recipient(&self, delivered: bool) {
        if delivered {
            self.recipients_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.recipients_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_unsent(&self) {
        self.recipients_unsent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attempt(&self) {
        self.send_attempts.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            schedules_seen: self.schedules_seen.load(Ordering::Relaxed),
            schedules_processed: self.schedules_processed.load(Ordering::Relaxed),
            schedules_skipped: self.schedules_skipped.load(Ordering::Relaxed),
            schedules_errored: self.schedules_errored.load(Ordering::Relaxed),
            recipients_sent: self.recipients_sent.load(Ordering::Relaxed),
            recipients_failed: self.recipients_failed.load(Ordering::Relaxed),
            recipients_unsent: self.recipients_unsent.load(Ordering::Relaxed),
            send_attempts: self.send_attempts.load(Ordering::Relaxed),
            elapsed: self.started.elapsed(),
        }
    }
}
