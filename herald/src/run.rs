//! Wiring for a single sweep.

use std::sync::Arc;

use anyhow::Context;
use herald_common::internal;
use herald_delivery::{MetricsSnapshot, SweepProcessor};
use herald_store::{PostgresStore, ScheduleStore};
use herald_tracing::traced;
use tokio_util::sync::CancellationToken;

use crate::Herald;

/// Connect to the database and run one sweep, cancelling it on SIGINT or
/// SIGTERM.
///
/// # Errors
///
/// Returns an error if the database is unreachable, the provider or template
/// is misconfigured, or the sweep could not list due schedules.
#[traced(instrument(level = tracing::Level::TRACE, skip_all, err), timing(precision = "s"))]
pub async fn sweep(config: Herald) -> anyhow::Result<MetricsSnapshot> {
    let store = PostgresStore::connect(&config.database_url()?, config.max_connections)
        .await
        .context("Failed to connect to the database")?;

    let cancel = CancellationToken::new();
    let signals = tokio::spawn(shutdown(cancel.clone()));

    let result = sweep_with(&config, Arc::new(store.clone()), &cancel).await;

    signals.abort();
    store.close().await;

    result
}

/// Run one sweep against `store`.
///
/// # Errors
///
/// See [`sweep`].
pub async fn sweep_with(
    config: &Herald,
    store: Arc<dyn ScheduleStore>,
    cancel: &CancellationToken,
) -> anyhow::Result<MetricsSnapshot> {
    let sender = config.email_sender();
    let processor = SweepProcessor::new(
        config.delivery.clone(),
        store,
        Arc::clone(&sender),
        config.renderer()?,
        config.sender.clone(),
    );

    internal!(
        level = INFO,
        provider = sender.provider(),
        workers = processor.config().worker_count,
        batch_size = processor.config().batch_size,
        "Starting sweep"
    );

    let result = processor.sweep(cancel).await;
    sender.close().await;

    Ok(result?)
}

#[cfg(unix)]
async fn shutdown(cancel: CancellationToken) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = WARN, "CTRL+C entered, cancelling sweep");
        }
        _ = terminate.recv() => {
            internal!(level = WARN, "Terminate signal received, cancelling sweep");
        }
    };

    cancel.cancel();
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown(cancel: CancellationToken) -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    internal!(level = WARN, "CTRL+C entered, cancelling sweep");

    cancel.cancel();
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::Utc;
    use herald_common::{
        Recipient, RecipientId, RecipientStatus, Schedule, ScheduleId, ScheduleStatus, Update,
        UpdateId, Workspace, WorkspaceId,
    };
    use herald_store::MemoryStore;

    use super::*;

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_workspace(Workspace {
            id: WorkspaceId(1),
            name: "Acme".to_string(),
        });
        store.insert_update(Update {
            id: UpdateId(1),
            workspace_id: WorkspaceId(1),
            title: "Q3".to_string(),
            content: "<p>Numbers</p>".to_string(),
        });
        store.insert_schedule(Schedule {
            id: ScheduleId(1),
            update_id: UpdateId(1),
            status: ScheduleStatus::Scheduled,
            send_at: Utc::now() - chrono::Duration::seconds(5),
        });
        for id in 1..=3 {
            store.insert_recipient(Recipient {
                id: RecipientId(id),
                update_id: UpdateId(1),
                email: format!("user{id}@example.com"),
                status: RecipientStatus::Pending,
                reference: format!("ref-{id}"),
            });
        }
        store
    }

    #[tokio::test]
    async fn test_sweep_with_log_provider() {
        let store = seeded();
        let config: Herald = r#"(sender: "updates@example.com")"#.parse().unwrap();

        let snapshot = sweep_with(&config, Arc::new(store.clone()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(snapshot.recipients_sent, 3);
        assert_eq!(
            store.schedule(ScheduleId(1)).unwrap().status,
            ScheduleStatus::Sent
        );

        let logs = store.delivery_logs();
        assert_eq!(logs.len(), 3);
        assert!(logs.iter().all(|log| log.provider == "log"));
    }

    #[tokio::test]
    async fn test_cancelled_sweep_touches_nothing() {
        let store = seeded();
        let config: Herald = r#"(sender: "updates@example.com")"#.parse().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let snapshot = sweep_with(&config, Arc::new(store.clone()), &cancel)
            .await
            .unwrap();

        assert_eq!(snapshot.schedules_seen, 0);
        assert_eq!(
            store.schedule(ScheduleId(1)).unwrap().status,
            ScheduleStatus::Scheduled
        );
    }
}
