use std::{sync::Arc, time::SystemTime};

use herald_common::{Recipient, RenderedContent, Update, Workspace};

use crate::{ContentRenderer, Email, RenderError};

/// One recipient's email for the current run, plus its retry bookkeeping.
#[derive(Debug, Clone)]
pub struct Job {
    pub recipient: Recipient,
    pub subject: Arc<str>,
    pub html: Arc<str>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<SystemTime>,
}

impl Job {
    #[must_use]
    pub fn email(&self, from: &str) -> Email {
        Email {
            from: from.to_string(),
            to: self.recipient.email.clone(),
            subject: Arc::clone(&self.subject),
            html: Arc::clone(&self.html),
        }
    }
}

/// Holds the rendered content of one schedule run and stamps it onto each
/// page of recipients.
#[derive(Debug, Clone)]
pub struct JobBuilder {
    content: RenderedContent,
}

impl JobBuilder {
    #[must_use]
    pub const fn new(content: RenderedContent) -> Self {
        Self { content }
    }

    /// Render `update` once for the whole run.
    ///
    /// # Errors
    ///
    /// Any [`RenderError`] is fatal to the schedule run.
    pub fn prepare(
        renderer: &dyn ContentRenderer,
        update: &Update,
        workspace: &Workspace,
    ) -> Result<Self, RenderError> {
        renderer.render_content(update, workspace).map(Self::new)
    }

    #[must_use]
    pub const fn content(&self) -> &RenderedContent {
        &self.content
    }

    #[must_use]
    pub fn build(&self, batch: Vec<Recipient>) -> Vec<Job> {
        batch
            .into_iter()
            .map(|recipient| Job {
                recipient,
                subject: Arc::clone(&self.content.subject),
                html: Arc::clone(&self.content.html),
                attempts: 0,
                last_error: None,
                last_attempt_at: None,
            })
            .collect()
    }
}
