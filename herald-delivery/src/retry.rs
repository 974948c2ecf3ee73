//! Per-recipient send loop with exponential backoff.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use herald_common::{ProviderReceipt, outbound};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{EmailSender, Job, RateLimiter, RetryError, SendError, SweepMetrics};

/// How often and how patiently one email is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Wait before the first retry; doubled for every retry after it.
    pub base_delay: Duration,
    /// Ceiling on a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the attempt with the given zero-based index.
    ///
    /// The first attempt goes out immediately; attempt `i` waits
    /// `base_delay * 2^(i-1)`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Sends a job until it succeeds, is refused, runs out of attempts or the
/// run is cancelled.
///
/// Every attempt first takes a token from the shared [`RateLimiter`].
#[derive(Debug)]
pub struct RetryEngine {
    sender: Arc<dyn EmailSender>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    metrics: Arc<SweepMetrics>,
    from: String,
}

impl RetryEngine {
    #[must_use]
    pub fn new(
        sender: Arc<dyn EmailSender>,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
        metrics: Arc<SweepMetrics>,
        from: impl Into<String>,
    ) -> Self {
        Self {
            sender,
            limiter,
            policy,
            metrics,
            from: from.into(),
        }
    }

    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deliver `job`, updating its attempt bookkeeping as it goes.
    ///
    /// Returns the provider receipt, or `None` if the provider accepted the
    /// email without a message id.
    ///
    /// # Errors
    ///
    /// - [`RetryError::Rejected`] as soon as the provider refuses the email
    /// - [`RetryError::Exhausted`] after the last attempt failed
    /// - [`RetryError::Cancelled`] if `cancel` fires during a backoff or
    ///   rate limit wait
    pub async fn send(
        &self,
        job: &mut Job,
        cancel: &CancellationToken,
    ) -> Result<Option<ProviderReceipt>, RetryError> {
        let email = job.email(&self.from);
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0;

        loop {
            let delay = self.policy.backoff(attempt);
            if !delay.is_zero() {
                tokio::select! {
                    () = cancel.cancelled() => return Err(RetryError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }

            self.limiter
                .acquire(cancel)
                .await
                .map_err(|_| RetryError::Cancelled)?;

            attempt += 1;
            job.attempts = attempt;
            job.last_attempt_at = Some(SystemTime::now());
            self.metrics.record_attempt();

            let result = tokio::time::timeout(self.policy.attempt_timeout, self.sender.send(&email))
                .await
                .unwrap_or(Err(SendError::Timeout(self.policy.attempt_timeout)));

            let err = match result {
                Ok(message_id) => {
                    outbound!(
                        level = DEBUG,
                        recipient_id = %job.recipient.id,
                        attempt,
                        "Email sent"
                    );

                    return Ok((!message_id.is_empty()).then(|| ProviderReceipt {
                        provider: self.sender.provider().to_string(),
                        message_id,
                    }));
                }
                Err(err) => err,
            };

            job.last_error = Some(err.to_string());

            if err.is_permanent() {
                outbound!(
                    level = WARN,
                    recipient_id = %job.recipient.id,
                    attempt,
                    error = %err,
                    "Email refused, not retrying"
                );
                return Err(RetryError::Rejected {
                    attempt,
                    source: err,
                });
            }

            if attempt >= max_attempts {
                outbound!(
                    level = WARN,
                    recipient_id = %job.recipient.id,
                    attempts = attempt,
                    error = %err,
                    "Giving up on email"
                );
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            outbound!(
                level = DEBUG,
                recipient_id = %job.recipient.id,
                attempt,
                next_in = ?self.policy.backoff(attempt),
                error = %err,
                "Send attempt failed, will retry"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use herald_common::{Recipient, RecipientId, RecipientStatus, RenderedContent, UpdateId};
    use parking_lot::Mutex;
    use tokio::time::Instant;

    use super::*;
    use crate::{Email, JobBuilder, RateLimitConfig};

    /// Replies from a script, then succeeds. Records when each attempt ran.
    #[derive(Debug, Default)]
    struct Scripted {
        replies: Mutex<VecDeque<Result<String, SendError>>>,
        attempts_at: Mutex<Vec<Instant>>,
        hang: bool,
    }

    impl Scripted {
        fn new(replies: impl IntoIterator<Item = Result<String, SendError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().collect()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl EmailSender for Scripted {
        fn provider(&self) -> &str {
            "scripted"
        }

        async fn send(&self, _email: &Email) -> Result<String, SendError> {
            self.attempts_at.lock().push(Instant::now());
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok("msg-ok".to_string()))
        }
    }

    fn temporary() -> Result<String, SendError> {
        Err(SendError::Temporary("503".to_string()))
    }

    fn job() -> Job {
        JobBuilder::new(RenderedContent::new("Acme: Q3", "<p>hi</p>"))
            .build(vec![Recipient {
                id: RecipientId(1),
                update_id: UpdateId(1),
                email: "jane@example.com".to_string(),
                status: RecipientStatus::Pending,
                reference: "ref-1".to_string(),
            }])
            .remove(0)
    }

    fn engine(sender: Arc<Scripted>) -> RetryEngine {
        RetryEngine::new(
            sender,
            Arc::new(RateLimiter::new(RateLimitConfig {
                messages_per_second: 1000.0,
                burst_size: 100,
            })),
            RetryPolicy::default(),
            Arc::new(SweepMetrics::new()),
            "updates@example.com",
        )
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.backoff(0), Duration::ZERO);
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.max_attempts(), 4);
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(200), Duration::from_secs(1).saturating_mul(u32::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let sender = Arc::new(Scripted::new([Ok("abc".to_string())]));
        let mut job = job();

        let receipt = engine(Arc::clone(&sender))
            .send(&mut job, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            receipt,
            Some(ProviderReceipt {
                provider: "scripted".to_string(),
                message_id: "abc".to_string(),
            })
        );
        assert_eq!(job.attempts, 1);
        assert!(job.last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_four_attempts_with_doubling_waits() {
        let sender = Arc::new(Scripted::new([temporary(), temporary(), temporary(), temporary()]));
        let mut job = job();

        let err = engine(Arc::clone(&sender))
            .send(&mut job, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            RetryError::Exhausted {
                attempts: 4,
                last: SendError::Temporary("503".to_string()),
            }
        );
        assert!(err.to_string().starts_with("max retries exceeded after 4 attempts"));
        assert_eq!(job.attempts, 4);
        assert_eq!(job.last_error.as_deref(), Some("Temporary failure: 503"));

        let at = sender.attempts_at.lock().clone();
        let gaps: Vec<_> = at.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps.len(), 3);
        for (gap, secs) in gaps.iter().zip([1, 2, 4]) {
            let expected = Duration::from_secs(secs);
            assert!(
                *gap >= expected && *gap < expected + Duration::from_millis(10),
                "{gap:?} vs {expected:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let sender = Arc::new(Scripted::new([temporary(), temporary(), Ok("late".to_string())]));
        let mut job = job();

        let receipt = engine(Arc::clone(&sender))
            .send(&mut job, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(receipt.unwrap().message_id, "late");
        assert_eq!(job.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_stops_retrying() {
        let sender = Arc::new(Scripted::new([Err(SendError::Permanent(
            "invalid address".to_string(),
        ))]));
        let mut job = job();

        let err = engine(Arc::clone(&sender))
            .send(&mut job, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RetryError::Rejected { attempt: 1, .. }));
        assert_eq!(sender.attempts_at.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_message_id_yields_no_receipt() {
        let sender = Arc::new(Scripted::new([Ok(String::new())]));
        let mut job = job();

        let receipt = engine(sender)
            .send(&mut job, &CancellationToken::new())
            .await
            .unwrap();

        assert!(receipt.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_attempt_times_out() {
        let sender = Arc::new(Scripted {
            hang: true,
            ..Scripted::default()
        });
        let mut job = job();

        let err = engine(Arc::clone(&sender))
            .send(&mut job, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            RetryError::Exhausted {
                attempts: 4,
                last: SendError::Timeout(Duration::from_secs(10)),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let sender = Arc::new(Scripted::new([temporary(), temporary(), temporary(), temporary()]));
        let engine = engine(Arc::clone(&sender));
        let cancel = CancellationToken::new();
        let mut job = job();

        let send = engine.send(&mut job, &cancel);
        let canceller = async {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            cancel.cancel();
        };

        let (result, ()) = tokio::join!(send, canceller);

        assert_eq!(result, Err(RetryError::Cancelled));
        // First attempt at 0s, second at 1s, cancelled while waiting 2s
        assert_eq!(sender.attempts_at.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_sends_nothing() {
        let sender = Arc::new(Scripted::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut job = job();

        let result = engine(Arc::clone(&sender)).send(&mut job, &cancel).await;

        assert_eq!(result, Err(RetryError::Cancelled));
        assert!(sender.attempts_at.lock().is_empty());
        assert_eq!(job.attempts, 0);
    }
}
