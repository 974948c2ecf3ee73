//! Bounded parallel sending of one recipient page.

use std::{collections::VecDeque, sync::Arc};

use herald_common::{ProviderReceipt, internal};
use parking_lot::Mutex;
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;

use crate::{Job, RetryEngine, RetryError};

/// A job together with what the retry engine made of it.
#[derive(Debug)]
pub struct JobResult {
    pub job: Job,
    pub result: Result<Option<ProviderReceipt>, RetryError>,
}

/// A fixed number of workers sharing one [`RetryEngine`].
#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: usize,
    engine: Arc<RetryEngine>,
}

/// Results of one page, in completion order.
///
/// Every job yields exactly one result. Jobs that were still queued when the
/// run was cancelled come back with [`RetryError::Cancelled`] without being
/// sent. A send that panics comes back with [`RetryError::Panicked`].
/// Dropping the batch aborts any worker still running.
#[derive(Debug)]
pub struct Batch {
    results: mpsc::Receiver<JobResult>,
    _workers: JoinSet<()>,
}

impl Batch {
    pub async fn next(&mut self) -> Option<JobResult> {
        self.results.recv().await
    }
}

impl WorkerPool {
    #[must_use]
    pub fn new(workers: usize, engine: Arc<RetryEngine>) -> Self {
        Self {
            workers: workers.max(1),
            engine,
        }
    }

    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Start sending `jobs` with at most `workers` in flight.
    ///
    /// The results channel holds the whole page, so workers never wait on
    /// the consumer.
    pub fn run_batch(&self, jobs: Vec<Job>, cancel: &CancellationToken) -> Batch {
        let (tx, results) = mpsc::channel(jobs.len().max(1));
        let mut workers = JoinSet::new();

        let spawn = self.workers.min(jobs.len());
        internal!(jobs = jobs.len(), workers = spawn, "Dispatching batch");

        let queue = Arc::new(Mutex::new(VecDeque::from(jobs)));

        for _ in 0..spawn {
            let queue = Arc::clone(&queue);
            let engine = Arc::clone(&self.engine);
            let tx = tx.clone();
            let cancel = cancel.clone();

            workers.spawn(async move {
                loop {
                    let Some(job) = queue.lock().pop_front() else {
                        break;
                    };

                    let result = if cancel.is_cancelled() {
                        JobResult {
                            job,
                            result: Err(RetryError::Cancelled),
                        }
                    } else {
                        send_isolated(&engine, job, &cancel).await
                    };

                    if tx.send(result).await.is_err() {
                        break;
                    }
                }
            });
        }

        Batch {
            results,
            _workers: workers,
        }
    }
}

/// Send one job in its own task so a panicking sender fails only that job.
///
/// The task lives in a local set, so aborting the worker aborts the send.
async fn send_isolated(
    engine: &Arc<RetryEngine>,
    job: Job,
    cancel: &CancellationToken,
) -> JobResult {
    let mut attempt = JoinSet::new();
    {
        let engine = Arc::clone(engine);
        let cancel = cancel.clone();
        let mut job = job.clone();
        attempt.spawn(async move {
            let result = engine.send(&mut job, &cancel).await;
            JobResult { job, result }
        });
    }

    match attempt.join_next().await {
        Some(Ok(result)) => result,
        Some(Err(e)) => {
            internal!(
                level = ERROR,
                reference = %job.recipient.reference,
                error = %e,
                "Send task failed"
            );
            JobResult {
                job,
                result: Err(RetryError::Panicked(e.to_string())),
            }
        }
        None => JobResult {
            job,
            result: Err(RetryError::Cancelled),
        },
    }
}
