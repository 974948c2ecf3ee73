use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::Utc;
use herald_common::{
    DeliveryOutcome, Recipient, RecipientId, RecipientStatus, Schedule, ScheduleId,
    ScheduleStatus, Update, UpdateId, Workspace, WorkspaceId,
};
use parking_lot::Mutex;

use crate::{
    Result, StoreError,
    r#trait::{ScheduleClaim, ScheduleStore},
    types::{DeliveryLog, DeliveryStat},
};

#[derive(Debug, Default)]
struct Faults {
    stat_insert: bool,
    processing: HashSet<ScheduleId>,
    next_batch: HashSet<UpdateId>,
}

#[derive(Debug, Default)]
struct State {
    schedules: BTreeMap<ScheduleId, Schedule>,
    last_errors: HashMap<ScheduleId, String>,
    recipients: BTreeMap<RecipientId, Recipient>,
    updates: HashMap<UpdateId, Update>,
    workspaces: HashMap<WorkspaceId, Workspace>,
    delivery_logs: Vec<DeliveryLog>,
    delivery_stats: Vec<DeliveryStat>,
    locked: HashSet<ScheduleId>,
    faults: Faults,
}

/// In-memory store.
///
/// Row locks are emulated with a set of held schedule ids: a claim owns its
/// id until it is dropped or moved to `processing`. Outcome writes are staged
/// and only applied once every step has succeeded, which mirrors the
/// transactional behaviour of the database backend.
///
/// Faults can be injected to exercise the engine's error paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_workspace(&self, workspace: Workspace) {
        self.state.lock().workspaces.insert(workspace.id, workspace);
    }

    pub fn insert_update(&self, update: Update) {
        self.state.lock().updates.insert(update.id, update);
    }

    pub fn insert_schedule(&self, schedule: Schedule) {
        self.state.lock().schedules.insert(schedule.id, schedule);
    }

    pub fn insert_recipient(&self, recipient: Recipient) {
        self.state.lock().recipients.insert(recipient.id, recipient);
    }

    #[must_use]
    pub fn schedule(&self, id: ScheduleId) -> Option<Schedule> {
        self.state.lock().schedules.get(&id).cloned()
    }

    #[must_use]
    pub fn last_error(&self, id: ScheduleId) -> Option<String> {
        self.state.lock().last_errors.get(&id).cloned()
    }

    #[must_use]
    pub fn recipient(&self, id: RecipientId) -> Option<Recipient> {
        self.state.lock().recipients.get(&id).cloned()
    }

    #[must_use]
    pub fn recipients_with_status(&self, update_id: UpdateId, status: RecipientStatus) -> usize {
        self.state
            .lock()
            .recipients
            .values()
            .filter(|r| r.update_id == update_id && r.status == status)
            .count()
    }

    #[must_use]
    pub fn delivery_logs(&self) -> Vec<DeliveryLog> {
        self.state.lock().delivery_logs.clone()
    }

    #[must_use]
    pub fn delivery_stats(&self) -> Vec<DeliveryStat> {
        self.state.lock().delivery_stats.clone()
    }

    /// Make every subsequent stat insert fail, rolling back the outcome.
    pub fn fail_stat_inserts(&self, fail: bool) {
        self.state.lock().faults.stat_insert = fail;
    }

    /// Make the `processing` write of this schedule fail.
    pub fn fail_processing(&self, id: ScheduleId) {
        self.state.lock().faults.processing.insert(id);
    }

    /// Make recipient fetches for this update fail.
    pub fn fail_next_batch(&self, update_id: UpdateId) {
        self.state.lock().faults.next_batch.insert(update_id);
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn due_schedules(
        &self,
        after: Option<ScheduleId>,
        limit: usize,
    ) -> Result<Vec<Schedule>> {
        let now = Utc::now();
        let state = self.state.lock();

        Ok(state
            .schedules
            .values()
            .filter(|s| after.is_none_or(|after| s.id > after))
            .filter(|s| s.status == ScheduleStatus::Scheduled && s.send_at <= now)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn try_lock(&self, id: ScheduleId) -> Result<Option<Box<dyn ScheduleClaim>>> {
        let mut state = self.state.lock();

        let Some(schedule) = state
            .schedules
            .get(&id)
            .filter(|s| s.status == ScheduleStatus::Scheduled)
            .cloned()
        else {
            return Ok(None);
        };

        if !state.locked.insert(id) {
            return Ok(None);
        }

        Ok(Some(Box::new(MemoryClaim {
            state: Arc::clone(&self.state),
            schedule,
        })))
    }

    async fn next_batch(&self, update_id: UpdateId, limit: usize) -> Result<Vec<Recipient>> {
        let state = self.state.lock();

        if state.faults.next_batch.contains(&update_id) {
            return Err(StoreError::Internal(format!(
                "injected recipient fetch failure for update {update_id}"
            )));
        }

        Ok(state
            .recipients
            .values()
            .filter(|r| r.update_id == update_id && r.status == RecipientStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn record_outcome(&self, outcome: &DeliveryOutcome) -> Result<()> {
        let mut state = self.state.lock();
        let now = Utc::now();

        // Staged in the order the database backend writes them
        let Some(mut recipient) = state
            .recipients
            .values()
            .find(|r| r.reference == outcome.reference && r.status == RecipientStatus::Pending)
            .cloned()
        else {
            return Err(StoreError::RecipientNotPending(outcome.reference.clone()));
        };
        recipient.status = outcome.status;

        let log = outcome.receipt.as_ref().map(|receipt| DeliveryLog {
            recipient_id: outcome.recipient_id,
            provider: receipt.provider.clone(),
            provider_message_id: receipt.message_id.clone(),
            created_at: now,
        });

        if state.faults.stat_insert {
            // Rollback: the staged recipient and log are dropped
            return Err(StoreError::Internal(format!(
                "injected delivery stat failure for {}",
                outcome.reference
            )));
        }

        let stat = DeliveryStat {
            recipient_id: outcome.recipient_id,
            is_delivered: outcome.is_delivered(),
            is_opened: false,
            created_at: now,
        };

        // Commit
        state.recipients.insert(recipient.id, recipient);
        state.delivery_logs.extend(log);
        state.delivery_stats.push(stat);

        Ok(())
    }

    async fn finish(
        &self,
        id: ScheduleId,
        status: ScheduleStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock();

        let schedule = state
            .schedules
            .get_mut(&id)
            .ok_or(StoreError::ScheduleNotFound(id))?;

        if schedule.status != ScheduleStatus::Processing || !status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                id,
                from: schedule.status,
                to: status,
            });
        }

        schedule.status = status;
        match error {
            Some(error) => {
                state.last_errors.insert(id, error.to_string());
            }
            None => {
                state.last_errors.remove(&id);
            }
        }

        Ok(())
    }

    async fn load_update(&self, id: UpdateId) -> Result<Option<Update>> {
        Ok(self.state.lock().updates.get(&id).cloned())
    }

    async fn load_workspace(&self, id: WorkspaceId) -> Result<Option<Workspace>> {
        Ok(self.state.lock().workspaces.get(&id).cloned())
    }
}

#[derive(Debug)]
struct MemoryClaim {
    state: Arc<Mutex<State>>,
    schedule: Schedule,
}

#[async_trait]
impl ScheduleClaim for MemoryClaim {
    fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    async fn begin_processing(self: Box<Self>) -> Result<Schedule> {
        let id = self.schedule.id;

        // The guard must be gone before `self` drops and releases the lock.
        let schedule = {
            let mut state = self.state.lock();

            if state.faults.processing.contains(&id) {
                return Err(StoreError::Internal(format!(
                    "injected processing failure for schedule {id}"
                )));
            }

            let schedule = state
                .schedules
                .get_mut(&id)
                .ok_or(StoreError::ScheduleNotFound(id))?;
            schedule.status = schedule.status.transition(ScheduleStatus::Processing)?;
            schedule.clone()
        };

        Ok(schedule)
    }
}

impl Drop for MemoryClaim {
    fn drop(&mut self) {
        self.state.lock().locked.remove(&self.schedule.id);
    }
}
