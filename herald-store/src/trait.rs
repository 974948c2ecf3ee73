use async_trait::async_trait;
use herald_common::{
    DeliveryOutcome, Recipient, Schedule, ScheduleId, ScheduleStatus, Update, UpdateId, Workspace,
    WorkspaceId,
};

use crate::Result;

/// Everything the sweep needs from storage.
///
/// Implementations must be safe to share between several processes running
/// the same sweep: [`ScheduleStore::try_lock`] is the only coordination
/// between them.
#[async_trait]
pub trait ScheduleStore: Send + Sync + std::fmt::Debug {
    /// Schedules that are `scheduled` and due, with an id greater than
    /// `after`, ordered by id and capped at `limit`.
    async fn due_schedules(&self, after: Option<ScheduleId>, limit: usize)
    -> Result<Vec<Schedule>>;

    /// Attempt to take exclusive ownership of a schedule without waiting.
    ///
    /// Returns `Ok(None)` when another runner holds the row or the schedule
    /// is no longer `scheduled`. Dropping the returned claim releases it
    /// without changing anything.
    async fn try_lock(&self, id: ScheduleId) -> Result<Option<Box<dyn ScheduleClaim>>>;

    /// The next page of `pending` recipients of an update, ordered by id.
    ///
    /// An empty page means the update has no pending recipients left.
    async fn next_batch(&self, update_id: UpdateId, limit: usize) -> Result<Vec<Recipient>>;

    /// Atomically record one recipient's outcome: the status change, a
    /// delivery log when the provider returned a receipt, and a delivery
    /// stat.
    async fn record_outcome(&self, outcome: &DeliveryOutcome) -> Result<()>;

    /// Move a `processing` schedule to its terminal status.
    async fn finish(
        &self,
        id: ScheduleId,
        status: ScheduleStatus,
        error: Option<&str>,
    ) -> Result<()>;

    async fn load_update(&self, id: UpdateId) -> Result<Option<Update>>;

    async fn load_workspace(&self, id: WorkspaceId) -> Result<Option<Workspace>>;
}

/// A schedule row held exclusively by this runner.
#[async_trait]
pub trait ScheduleClaim: Send {
    fn schedule(&self) -> &Schedule;

    /// Flip the schedule to `processing` and release the row lock.
    async fn begin_processing(self: Box<Self>) -> Result<Schedule>;
}
