//! Email provider abstraction.
//!
//! The delivery engine only knows about [`EmailSender`]; the concrete
//! provider is picked at startup from configuration.

mod log;
mod resend;

use std::sync::Arc;

use async_trait::async_trait;

pub use self::{log::LogEmailSender, resend::ResendSender};
use crate::SendError;

/// One fully rendered email addressed to a single recipient.
///
/// Subject and body are shared between every email of a schedule run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub from: String,
    pub to: String,
    pub subject: Arc<str>,
    pub html: Arc<str>,
}

#[async_trait]
pub trait EmailSender: Send + Sync + std::fmt::Debug {
    /// Name stored alongside provider message ids.
    fn provider(&self) -> &str;

    /// Hand one email to the provider.
    ///
    /// Returns the provider's message id. An empty id means the provider
    /// accepted the email without identifying it.
    ///
    /// # Errors
    ///
    /// [`SendError::Permanent`] when the provider refused the email and a
    /// retry cannot succeed, [`SendError::Temporary`] for everything else.
    async fn send(&self, email: &Email) -> Result<String, SendError>;

    /// Release any provider resources. Called once when the process shuts
    /// down.
    async fn close(&self) {}
}
