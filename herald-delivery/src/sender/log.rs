use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use herald_common::outbound;

use super::{Email, EmailSender};
use crate::SendError;

/// Writes emails to the log instead of sending them.
///
/// Every email is accepted and gets a synthetic message id.
#[derive(Debug, Default)]
pub struct LogEmailSender {
    sent: AtomicU64,
}

impl LogEmailSender {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EmailSender for LogEmailSender {
    fn provider(&self) -> &str {
        "log"
    }

    async fn send(&self, email: &Email) -> Result<String, SendError> {
        let n = self.sent.fetch_add(1, Ordering::Relaxed) + 1;

        outbound!(
            level = INFO,
            from = %email.from,
            to = %email.to,
            subject = %email.subject,
            bytes = email.html.len(),
            "Email logged"
        );

        Ok(format!("log-{n}"))
    }
}
