//! Processing of a single schedule.

use herald_common::{DeliveryOutcome, Schedule, ScheduleStatus, Tally, internal};
use tokio_util::sync::CancellationToken;

use super::{Run, ScheduleReport};
use crate::{JobBuilder, JobResult, RetryError, ScheduleError};

/// How the recipient stream of a run came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Exhausted,
    Cancelled,
}

impl Run<'_> {
    /// Lock, deliver and finish one schedule.
    ///
    /// Returns `Ok(None)` if another runner holds the schedule.
    pub(super) async fn process(
        &self,
        schedule: &Schedule,
        cancel: &CancellationToken,
    ) -> Result<Option<ScheduleReport>, ScheduleError> {
        let processor = self.processor;

        let Some(claim) = processor
            .db("try_lock", processor.store.try_lock(schedule.id))
            .await?
        else {
            return Ok(None);
        };

        let schedule = processor
            .db("begin_processing", claim.begin_processing())
            .await?;

        internal!(
            level = INFO,
            schedule_id = %schedule.id,
            update_id = %schedule.update_id,
            "Processing schedule"
        );

        match self.deliver(&schedule, cancel).await {
            Ok(report) => Ok(Some(report)),
            Err(e) => {
                // Never leave a schedule stuck in processing
                let summary = e.to_string();
                if let Err(finish) = processor
                    .db(
                        "finish",
                        processor
                            .store
                            .finish(schedule.id, ScheduleStatus::Failed, Some(summary.as_str())),
                    )
                    .await
                {
                    internal!(
                        level = ERROR,
                        schedule_id = %schedule.id,
                        error = %finish,
                        "Failed to mark schedule as failed"
                    );
                }
                Err(e)
            }
        }
    }

    async fn deliver(
        &self,
        schedule: &Schedule,
        cancel: &CancellationToken,
    ) -> Result<ScheduleReport, ScheduleError> {
        let processor = self.processor;
        let config = &processor.config;

        let update = processor
            .db("load_update", processor.store.load_update(schedule.update_id))
            .await?
            .ok_or(ScheduleError::UpdateNotFound(schedule.update_id))?;

        let workspace = processor
            .db(
                "load_workspace",
                processor.store.load_workspace(update.workspace_id),
            )
            .await?
            .ok_or(ScheduleError::WorkspaceNotFound {
                update_id: update.id,
                workspace_id: update.workspace_id,
            })?;

        let builder = JobBuilder::prepare(processor.renderer.as_ref(), &update, &workspace)?;

        let run_cancel = cancel.child_token();
        let mut tally = Tally::default();

        let streamed = tokio::time::timeout(
            config.processing_timeout(),
            self.stream(schedule, &builder, &mut tally, &run_cancel),
        )
        .await;

        let (status, error) = match streamed {
            Ok(Ok(StreamEnd::Exhausted)) => tally.terminal_status(),
            Ok(Ok(StreamEnd::Cancelled)) => (
                ScheduleStatus::Failed,
                Some(format!(
                    "cancelled after {} recipients ({} failed)",
                    tally.total, tally.failed
                )),
            ),
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                run_cancel.cancel();
                (
                    ScheduleStatus::Failed,
                    Some(format!(
                        "timed out after {:?} with {} recipients processed ({} failed)",
                        config.processing_timeout(),
                        tally.total,
                        tally.failed
                    )),
                )
            }
        };

        processor
            .db(
                "finish",
                processor
                    .store
                    .finish(schedule.id, status, error.as_deref()),
            )
            .await?;

        Ok(ScheduleReport {
            schedule_id: schedule.id,
            update_id: schedule.update_id,
            status,
            tally,
            error,
        })
    }

    /// Page through the pending recipients until none are left.
    ///
    /// Each page is re-queried by status, so recipients recorded by earlier
    /// pages drop out on their own.
    async fn stream(
        &self,
        schedule: &Schedule,
        builder: &JobBuilder,
        tally: &mut Tally,
        cancel: &CancellationToken,
    ) -> Result<StreamEnd, ScheduleError> {
        let processor = self.processor;

        loop {
            if cancel.is_cancelled() {
                return Ok(StreamEnd::Cancelled);
            }

            let recipients = processor
                .db(
                    "next_batch",
                    processor
                        .store
                        .next_batch(schedule.update_id, processor.config.batch_size),
                )
                .await?;

            if recipients.is_empty() {
                return Ok(StreamEnd::Exhausted);
            }

            internal!(
                level = DEBUG,
                schedule_id = %schedule.id,
                recipients = recipients.len(),
                "Sending page"
            );

            let mut batch = self.pool.run_batch(builder.build(recipients), cancel);

            while let Some(JobResult { job, result }) = batch.next().await {
                let outcome = match result {
                    Ok(receipt) => DeliveryOutcome::delivered(&job.recipient, receipt),
                    Err(RetryError::Cancelled) => {
                        self.metrics.record_unsent();
                        continue;
                    }
                    Err(e) => {
                        log_failure(schedule, &job.recipient.reference, job.attempts, &e);
                        DeliveryOutcome::failed(&job.recipient)
                    }
                };

                processor
                    .db("record_outcome", processor.store.record_outcome(&outcome))
                    .await?;

                tally.record(outcome.is_delivered());
                self.metrics.record_recipient(outcome.is_delivered());
            }
        }
    }
}

fn log_failure(schedule: &Schedule, reference: &str, attempts: u32, error: &RetryError) {
    internal!(
        level = WARN,
        schedule_id = %schedule.id,
        reference,
        attempts,
        error = %error,
        "Recipient failed"
    );
}
