//! Process-wide outbound throttle using the token bucket algorithm
//!
//! Every send attempt takes one token. Tokens refill at a constant rate up to
//! the bucket capacity, so a full bucket allows a burst before the sustained
//! rate applies.
//!
//! ```text
//! Rate limit: 10 msg/sec, burst: 10
//! - Bucket starts with 10 tokens
//! - Tokens refill at 10/sec
//! - 10 emails can go out immediately
//! - Then limited to 10/sec sustained rate
//! ```
//!
//! One limiter is shared by every worker of a sweep, so the rate is a
//! per-process property.

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Tokens added per second
    pub messages_per_second: f64,
    /// Maximum tokens in the bucket
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            messages_per_second: 10.0,
            burst_size: 10,
        }
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(messages_per_second: f64, burst_size: u32) -> Self {
        let capacity = f64::from(burst_size.max(1));
        Self {
            tokens: capacity,
            capacity,
            // NaN and negative rates never refill
            refill_rate: messages_per_second.max(0.0),
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();

        self.tokens = elapsed.mul_add(self.refill_rate, self.tokens).min(self.capacity);
        self.last_refill = now;
    }

    fn try_consume(&mut self) -> bool {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn time_until_available(&mut self) -> Duration {
        self.refill();

        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }

        let tokens_needed = 1.0 - self.tokens;
        Duration::try_from_secs_f64(tokens_needed / self.refill_rate).unwrap_or(Duration::MAX)
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
}

/// The wait was abandoned because the sweep was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(
                config.messages_per_second,
                config.burst_size,
            )),
        }
    }

    /// Take a token if one is available.
    ///
    /// Returns `Err(Duration)` with the time until the next token otherwise.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock();

        if bucket.try_consume() {
            Ok(())
        } else {
            Err(bucket.time_until_available())
        }
    }

    /// Wait until a token is available and take it.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if `cancel` fires while waiting; no token is
    /// taken in that case.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }

            let wait = match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };

            trace!(
                wait_seconds = wait.as_secs_f64(),
                "Rate limit exceeded, waiting"
            );

            tokio::select! {
                () = cancel.cancelled() => return Err(Cancelled),
                () = tokio::time::sleep(wait) => {}
            }
        }
    }

    pub fn stats(&self) -> RateLimitStats {
        let mut bucket = self.bucket.lock();
        bucket.refill();

        RateLimitStats {
            available_tokens: bucket.tokens,
            capacity: bucket.capacity,
            refill_rate: bucket.refill_rate,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitStats {
    /// Currently available tokens
    pub available_tokens: f64,
    /// Maximum capacity (burst size)
    pub capacity: f64,
    /// Refill rate (tokens per second)
    pub refill_rate: f64,
}
