//! Fixtures for driving whole sweeps against the in-memory store.
#![allow(dead_code)] // Not every helper is used by every test binary

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use herald_common::{
    DeliveryOutcome, Recipient, RecipientId, RecipientStatus, Schedule, ScheduleId,
    ScheduleStatus, Update, UpdateId, Workspace, WorkspaceId,
};
use herald_delivery::{
    DeliveryConfig, Email, EmailSender, SendError, SweepProcessor, TemplateRenderer,
};
use herald_store::{MemoryStore, Result, ScheduleClaim, ScheduleStore};
use parking_lot::Mutex;

pub const FROM: &str = "updates@example.com";

/// A sender whose behaviour is fixed per recipient address.
#[derive(Debug, Default)]
pub struct ScriptedSender {
    temporary: HashSet<String>,
    permanent: HashSet<String>,
    panicking: HashSet<String>,
    anonymous: bool,
    delay: Duration,
    attempts: Mutex<HashMap<String, u32>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every attempt to these addresses fails temporarily.
    pub fn failing(mut self, emails: impl IntoIterator<Item = String>) -> Self {
        self.temporary.extend(emails);
        self
    }

    /// These addresses are refused outright.
    pub fn rejecting(mut self, emails: impl IntoIterator<Item = String>) -> Self {
        self.permanent.extend(emails);
        self
    }

    /// The provider client panics on these addresses.
    pub fn panicking(mut self, emails: impl IntoIterator<Item = String>) -> Self {
        self.panicking.extend(emails);
        self
    }

    /// Accept emails without returning a message id.
    pub fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn attempts(&self, email: &str) -> u32 {
        self.attempts.lock().get(email).copied().unwrap_or(0)
    }

    pub fn total_attempts(&self) -> u32 {
        self.attempts.lock().values().sum()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmailSender for ScriptedSender {
    fn provider(&self) -> &str {
        "scripted"
    }

    async fn send(&self, email: &Email) -> std::result::Result<String, SendError> {
        *self.attempts.lock().entry(email.to.clone()).or_default() += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        assert!(
            !self.panicking.contains(&email.to),
            "client panicked on {}",
            email.to
        );

        if self.permanent.contains(&email.to) {
            Err(SendError::Permanent(format!("{} does not exist", email.to)))
        } else if self.temporary.contains(&email.to) {
            Err(SendError::Temporary("503 Service Unavailable".to_string()))
        } else if self.anonymous {
            Ok(String::new())
        } else {
            Ok(format!("msg-{}", email.to))
        }
    }
}

/// Counts recipient page fetches on top of a [`MemoryStore`].
#[derive(Debug)]
pub struct CountingStore {
    pub inner: MemoryStore,
    next_batch_calls: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            next_batch_calls: AtomicUsize::new(0),
        }
    }

    pub fn next_batch_calls(&self) -> usize {
        self.next_batch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScheduleStore for CountingStore {
    async fn due_schedules(
        &self,
        after: Option<ScheduleId>,
        limit: usize,
    ) -> Result<Vec<Schedule>> {
        self.inner.due_schedules(after, limit).await
    }

    async fn try_lock(&self, id: ScheduleId) -> Result<Option<Box<dyn ScheduleClaim>>> {
        self.inner.try_lock(id).await
    }

    async fn next_batch(&self, update_id: UpdateId, limit: usize) -> Result<Vec<Recipient>> {
        self.next_batch_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.next_batch(update_id, limit).await
    }

    async fn record_outcome(&self, outcome: &DeliveryOutcome) -> Result<()> {
        self.inner.record_outcome(outcome).await
    }

    async fn finish(
        &self,
        id: ScheduleId,
        status: ScheduleStatus,
        error: Option<&str>,
    ) -> Result<()> {
        self.inner.finish(id, status, error).await
    }

    async fn load_update(&self, id: UpdateId) -> Result<Option<Update>> {
        self.inner.load_update(id).await
    }

    async fn load_workspace(&self, id: WorkspaceId) -> Result<Option<Workspace>> {
        self.inner.load_workspace(id).await
    }
}

pub fn email(id: i64) -> String {
    format!("user{id}@example.com")
}

/// Seed a due schedule whose update has `recipients` pending recipients.
///
/// Ids are derived from `n`, so several broadcasts can live in one store.
pub fn seed_broadcast(store: &MemoryStore, n: i64, recipients: i64) -> ScheduleId {
    store.insert_workspace(Workspace {
        id: WorkspaceId(1),
        name: "Acme".to_string(),
    });
    seed_broadcast_in(store, n, WorkspaceId(1), recipients)
}

pub fn seed_broadcast_in(
    store: &MemoryStore,
    n: i64,
    workspace_id: WorkspaceId,
    recipients: i64,
) -> ScheduleId {
    let update_id = UpdateId(n);
    let schedule_id = ScheduleId(n);

    store.insert_update(Update {
        id: update_id,
        workspace_id,
        title: format!("Update {n}"),
        content: "<p>Revenue is up.</p>".to_string(),
    });
    store.insert_schedule(Schedule {
        id: schedule_id,
        update_id,
        status: ScheduleStatus::Scheduled,
        send_at: Utc::now() - chrono::Duration::minutes(1),
    });

    for i in 1..=recipients {
        let id = n * 1000 + i;
        store.insert_recipient(Recipient {
            id: RecipientId(id),
            update_id,
            email: email(id),
            status: RecipientStatus::Pending,
            reference: format!("ref-{id}"),
        });
    }

    schedule_id
}

pub fn test_config() -> DeliveryConfig {
    DeliveryConfig {
        batch_size: 10,
        worker_count: 5,
        rate_limit: 1000.0,
        burst: 100,
        ..DeliveryConfig::default()
    }
}

pub fn processor(
    config: DeliveryConfig,
    store: Arc<dyn ScheduleStore>,
    sender: Arc<ScriptedSender>,
) -> SweepProcessor {
    SweepProcessor::new(
        config,
        store,
        sender,
        Arc::new(TemplateRenderer::default()),
        FROM,
    )
}
