use async_trait::async_trait;
use herald_common::outbound;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{Email, EmailSender};
use crate::SendError;

pub const RESEND_API: &str = "https://api.resend.com/emails";

/// Sends through the Resend HTTP API.
#[derive(Debug, Clone)]
pub struct ResendSender {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct EmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmailResponse {
    #[serde(default)]
    id: String,
}

impl ResendSender {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_endpoint(api_key, RESEND_API)
    }

    #[must_use]
    pub fn with_endpoint(api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            endpoint: endpoint.into(),
        }
    }
}

/// Client errors mean the request itself is wrong, except for the two the
/// provider uses to ask for a later retry.
fn classify(status: StatusCode, body: &str) -> SendError {
    let message = format!("Resend API error {status}: {body}");

    if status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
    {
        SendError::Permanent(message)
    } else {
        SendError::Temporary(message)
    }
}

#[async_trait]
impl EmailSender for ResendSender {
    fn provider(&self) -> &str {
        "resend"
    }

    async fn send(&self, email: &Email) -> Result<String, SendError> {
        let request = EmailRequest {
            from: &email.from,
            to: [&email.to],
            subject: &email.subject,
            html: &email.html,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| SendError::Temporary(format!("Failed to reach Resend: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            outbound!(level = WARN, to = %email.to, %status, "Resend rejected email");
            return Err(classify(status, &body));
        }

        let body: EmailResponse = response
            .json()
            .await
            .map_err(|e| SendError::Temporary(format!("Failed to parse Resend response: {e}")))?;

        outbound!(level = DEBUG, to = %email.to, id = %body.id, "Email accepted by Resend");

        Ok(body.id)
    }
}
