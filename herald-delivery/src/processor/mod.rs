//! Sweep orchestration
//!
//! A sweep pages through due schedules by id and processes them one after
//! another. Several processes may sweep at the same time; the store's row
//! lock is the only thing keeping them off each other's schedules.

mod schedule;

use std::{future::Future, sync::Arc, time::Duration};

use herald_common::{ScheduleId, ScheduleStatus, Tally, UpdateId, internal};
use herald_store::ScheduleStore;
use herald_tracing::traced;
use tokio_util::sync::CancellationToken;

use crate::{
    ContentRenderer, DeliveryConfig, EmailSender, MetricsSnapshot, RateLimiter, RetryEngine,
    ScheduleError, SweepError, SweepMetrics, WorkerPool,
};

/// What happened to one schedule this runner managed to lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleReport {
    pub schedule_id: ScheduleId,
    pub update_id: UpdateId,
    pub status: ScheduleStatus,
    pub tally: Tally,
    /// The summary written to the schedule when it failed.
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct SweepProcessor {
    config: DeliveryConfig,
    store: Arc<dyn ScheduleStore>,
    sender: Arc<dyn EmailSender>,
    renderer: Arc<dyn ContentRenderer>,
    limiter: Arc<RateLimiter>,
    from: String,
}

/// State owned by a single sweep.
#[derive(Debug)]
struct Run<'a> {
    processor: &'a SweepProcessor,
    metrics: Arc<SweepMetrics>,
    pool: WorkerPool,
}

impl SweepProcessor {
    /// The rate limiter is created here, so every sweep run by this
    /// processor draws from the same bucket.
    #[must_use]
    pub fn new(
        config: DeliveryConfig,
        store: Arc<dyn ScheduleStore>,
        sender: Arc<dyn EmailSender>,
        renderer: Arc<dyn ContentRenderer>,
        from: impl Into<String>,
    ) -> Self {
        let config = config.normalize();
        let limiter = Arc::new(RateLimiter::new(config.rate_limit_config()));

        Self {
            config,
            store,
            sender,
            renderer,
            limiter,
            from: from.into(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Process every schedule that is due, until none are left or `cancel`
    /// fires.
    ///
    /// Failures of individual schedules are logged and counted; they do not
    /// end the sweep.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::DueSchedules`] if the list of due schedules
    /// cannot be read.
    #[traced(instrument(level = tracing::Level::INFO, skip_all), timing(precision = "ms"))]
    pub async fn sweep(&self, cancel: &CancellationToken) -> Result<MetricsSnapshot, SweepError> {
        let metrics = Arc::new(SweepMetrics::new());
        let engine = RetryEngine::new(
            Arc::clone(&self.sender),
            Arc::clone(&self.limiter),
            self.config.retry_policy(),
            Arc::clone(&metrics),
            self.from.clone(),
        );
        let run = Run {
            processor: self,
            pool: WorkerPool::new(self.config.worker_count, Arc::new(engine)),
            metrics,
        };

        let page_size = self.config.batch_size;
        let mut cursor = None;

        'pages: loop {
            if cancel.is_cancelled() {
                break;
            }

            let page = self
                .db(
                    "due_schedules",
                    self.store.due_schedules(cursor, page_size),
                )
                .await
                .map_err(SweepError::DueSchedules)?;

            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(last.id);
            let exhausted = page.len() < page_size;

            internal!(level = DEBUG, schedules = page.len(), "Fetched due schedules");

            for schedule in page {
                if cancel.is_cancelled() {
                    break 'pages;
                }

                run.metrics.record_schedule_seen();

                match run.process(&schedule, cancel).await {
                    Ok(Some(report)) => {
                        run.metrics.record_schedule_processed();
                        internal!(
                            level = INFO,
                            schedule_id = %report.schedule_id,
                            update_id = %report.update_id,
                            status = %report.status,
                            total = report.tally.total,
                            sent = report.tally.sent,
                            failed = report.tally.failed,
                            "Schedule finished"
                        );
                    }
                    Ok(None) => {
                        run.metrics.record_schedule_skipped();
                        internal!(
                            level = DEBUG,
                            schedule_id = %schedule.id,
                            "Schedule locked by another runner, skipping"
                        );
                    }
                    Err(e) => {
                        run.metrics.record_schedule_error();
                        internal!(
                            level = ERROR,
                            schedule_id = %schedule.id,
                            error = %e,
                            "Failed to process schedule"
                        );
                    }
                }
            }

            if exhausted {
                break;
            }
        }

        let snapshot = run.metrics.snapshot();
        internal!(
            level = INFO,
            schedules_seen = snapshot.schedules_seen,
            schedules_processed = snapshot.schedules_processed,
            schedules_skipped = snapshot.schedules_skipped,
            schedules_errored = snapshot.schedules_errored,
            recipients_sent = snapshot.recipients_sent,
            recipients_failed = snapshot.recipients_failed,
            recipients_unsent = snapshot.recipients_unsent,
            send_attempts = snapshot.send_attempts,
            elapsed_ms = u64::try_from(snapshot.elapsed.as_millis()).unwrap_or(u64::MAX),
            cancelled = cancel.is_cancelled(),
            "Sweep complete"
        );

        Ok(snapshot)
    }

    /// Bound a store call by the per-operation database timeout.
    async fn db<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = herald_store::Result<T>> + Send,
    ) -> Result<T, ScheduleError> {
        with_timeout(self.config.db_timeout(), operation, call).await
    }
}

async fn with_timeout<T>(
    after: Duration,
    operation: &'static str,
    call: impl Future<Output = herald_store::Result<T>> + Send,
) -> Result<T, ScheduleError> {
    match tokio::time::timeout(after, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(ScheduleError::Store { operation, source }),
        Err(_) => Err(ScheduleError::DbTimeout { operation, after }),
    }
}
