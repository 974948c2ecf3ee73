//! Scheduled broadcast delivery.
//!
//! A [`SweepProcessor`] pages through due schedules and, for each one it
//! manages to lock, streams the pending recipients in pages, sends every
//! page through a bounded [`WorkerPool`] and records each outcome.
//!
//! Sends go through the [`RetryEngine`], which applies exponential backoff
//! and waits on a process-wide [`RateLimiter`] before every attempt.

mod config;
mod error;
mod job;
mod metrics;
mod pool;
mod processor;
mod rate_limiter;
mod render;
mod retry;
pub mod sender;

pub use config::DeliveryConfig;
pub use error::{RenderError, RetryError, ScheduleError, SendError, SweepError};
pub use job::{Job, JobBuilder};
pub use metrics::{MetricsSnapshot, SweepMetrics};
pub use pool::{Batch, JobResult, WorkerPool};
pub use processor::{ScheduleReport, SweepProcessor};
pub use rate_limiter::{RateLimitConfig, RateLimitStats, RateLimiter};
pub use render::{ContentRenderer, DEFAULT_TEMPLATE, TemplateRenderer};
pub use retry::{RetryEngine, RetryPolicy};
pub use sender::{Email, EmailSender};
