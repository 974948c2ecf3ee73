use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_common::{
    DeliveryOutcome, Recipient, RecipientId, Schedule, ScheduleId, ScheduleStatus, Update,
    UpdateId, Workspace, WorkspaceId,
};
use sqlx::{PgPool, Postgres, Transaction, postgres::PgPoolOptions};
use tracing::{debug, trace};

use crate::{
    Result, StoreError,
    r#trait::{ScheduleClaim, ScheduleStore},
};

/// PostgreSQL store.
///
/// Expects the tables described in `schema.sql`. Schedule locks are
/// `FOR UPDATE SKIP LOCKED` row locks held by an open transaction inside the
/// returned claim.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct ScheduleRow {
    id: i64,
    update_id: i64,
    status: String,
    send_at: DateTime<Utc>,
}

impl TryFrom<ScheduleRow> for Schedule {
    type Error = StoreError;

    fn try_from(row: ScheduleRow) -> Result<Self> {
        Ok(Self {
            id: ScheduleId(row.id),
            update_id: UpdateId(row.update_id),
            status: row.status.parse()?,
            send_at: row.send_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RecipientRow {
    id: i64,
    update_id: i64,
    email: String,
    status: String,
    reference: String,
}

impl TryFrom<RecipientRow> for Recipient {
    type Error = StoreError;

    fn try_from(row: RecipientRow) -> Result<Self> {
        Ok(Self {
            id: RecipientId(row.id),
            update_id: UpdateId(row.update_id),
            email: row.email,
            status: row.status.parse()?,
            reference: row.reference,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UpdateRow {
    id: i64,
    workspace_id: i64,
    title: String,
    content: String,
}

#[derive(Debug, sqlx::FromRow)]
struct WorkspaceRow {
    id: i64,
    name: String,
}

fn limit(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl PostgresStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial connection cannot be established.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ScheduleStore for PostgresStore {
    async fn due_schedules(
        &self,
        after: Option<ScheduleId>,
        limit_to: usize,
    ) -> Result<Vec<Schedule>> {
        let rows = sqlx::query_as::<_, ScheduleRow>(
            r"
            SELECT id, update_id, status, send_at
            FROM update_schedules
            WHERE status = 'scheduled'
              AND send_at <= NOW()
              AND id > $1
            ORDER BY id ASC
            LIMIT $2
            ",
        )
        .bind(after.map_or(0, |id| id.0))
        .bind(limit(limit_to))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Schedule::try_from).collect()
    }

    async fn try_lock(&self, id: ScheduleId) -> Result<Option<Box<dyn ScheduleClaim>>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, ScheduleRow>(
            r"
            SELECT id, update_id, status, send_at
            FROM update_schedules
            WHERE id = $1 AND status = 'scheduled'
            FOR UPDATE SKIP LOCKED
            ",
        )
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            trace!(schedule_id = %id, "Schedule locked elsewhere or no longer scheduled");
            tx.rollback().await?;
            return Ok(None);
        };

        Ok(Some(Box::new(PostgresClaim {
            tx,
            schedule: row.try_into()?,
        })))
    }

    async fn next_batch(&self, update_id: UpdateId, limit_to: usize) -> Result<Vec<Recipient>> {
        let rows = sqlx::query_as::<_, RecipientRow>(
            r"
            SELECT r.id, r.update_id, c.email, r.status, r.reference
            FROM update_recipients r
            JOIN contacts c ON c.id = r.contact_id
            WHERE r.update_id = $1
              AND r.status = 'pending'
            ORDER BY r.id ASC
            LIMIT $2
            ",
        )
        .bind(update_id.0)
        .bind(limit(limit_to))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Recipient::try_from).collect()
    }

    async fn record_outcome(&self, outcome: &DeliveryOutcome) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r"
            UPDATE update_recipients
            SET status = $1, updated_at = NOW()
            WHERE reference = $2 AND status = 'pending'
            ",
        )
        .bind(outcome.status.as_str())
        .bind(&outcome.reference)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::RecipientNotPending(outcome.reference.clone()));
        }

        if let Some(receipt) = &outcome.receipt {
            sqlx::query(
                r"
                INSERT INTO delivery_logs (recipient_id, provider, provider_message_id)
                VALUES ($1, $2, $3)
                ",
            )
            .bind(outcome.recipient_id.0)
            .bind(&receipt.provider)
            .bind(&receipt.message_id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r"
            INSERT INTO delivery_stats (recipient_id, is_delivered, is_opened)
            VALUES ($1, $2, FALSE)
            ",
        )
        .bind(outcome.recipient_id.0)
        .bind(outcome.is_delivered())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            recipient_id = %outcome.recipient_id,
            status = %outcome.status,
            "Recorded delivery outcome"
        );

        Ok(())
    }

    async fn finish(
        &self,
        id: ScheduleId,
        status: ScheduleStatus,
        error: Option<&str>,
    ) -> Result<()> {
        if !ScheduleStatus::Processing.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id,
                from: ScheduleStatus::Processing,
                to: status,
            });
        }

        let updated = sqlx::query(
            r"
            UPDATE update_schedules
            SET status = $1, last_error = $2, updated_at = NOW()
            WHERE id = $3 AND status = 'processing'
            ",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            let current = sqlx::query_scalar::<_, String>(
                "SELECT status FROM update_schedules WHERE id = $1",
            )
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

            return Err(match current {
                Some(from) => StoreError::InvalidTransition {
                    id,
                    from: from.parse()?,
                    to: status,
                },
                None => StoreError::ScheduleNotFound(id),
            });
        }

        Ok(())
    }

    async fn load_update(&self, id: UpdateId) -> Result<Option<Update>> {
        let row = sqlx::query_as::<_, UpdateRow>(
            "SELECT id, workspace_id, title, content FROM updates WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Update {
            id: UpdateId(row.id),
            workspace_id: WorkspaceId(row.workspace_id),
            title: row.title,
            content: row.content,
        }))
    }

    async fn load_workspace(&self, id: WorkspaceId) -> Result<Option<Workspace>> {
        let row = sqlx::query_as::<_, WorkspaceRow>("SELECT id, name FROM workspaces WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| Workspace {
            id: WorkspaceId(row.id),
            name: row.name,
        }))
    }
}

/// An open transaction holding the schedule's row lock.
struct PostgresClaim {
    tx: Transaction<'static, Postgres>,
    schedule: Schedule,
}

#[async_trait]
impl ScheduleClaim for PostgresClaim {
    fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    async fn begin_processing(self: Box<Self>) -> Result<Schedule> {
        let Self { mut tx, schedule } = *self;
        let status = schedule.status.transition(ScheduleStatus::Processing)?;

        sqlx::query(
            "UPDATE update_schedules SET status = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(status.as_str())
        .bind(schedule.id.0)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Schedule { status, ..schedule })
    }
}
