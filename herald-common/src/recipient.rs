//! Recipients of a broadcast and the outcome recorded for each of them.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{schedule::StatusError, update::UpdateId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientId(pub i64);

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Recipient status only ever moves forward, `pending -> sent | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientStatus {
    Pending,
    Sent,
    Failed,
}

impl RecipientStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RecipientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecipientStatus {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(StatusError::Unknown(other.to_string())),
        }
    }
}

/// One destination of an update, with the contact's email already resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    pub update_id: UpdateId,
    pub email: String,
    pub status: RecipientStatus,
    /// Stable external key used to address the recipient when persisting.
    pub reference: String,
}

/// What the provider handed back for an accepted email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderReceipt {
    pub provider: String,
    pub message_id: String,
}

/// The result of delivering to one recipient, as written by the
/// persistence layer in a single transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub recipient_id: RecipientId,
    pub reference: String,
    pub status: RecipientStatus,
    pub receipt: Option<ProviderReceipt>,
}

impl DeliveryOutcome {
    /// A delivered email. The receipt is absent when the provider accepted
    /// the email without handing back a message id.
    #[must_use]
    pub fn delivered(recipient: &Recipient, receipt: Option<ProviderReceipt>) -> Self {
        Self {
            recipient_id: recipient.id,
            reference: recipient.reference.clone(),
            status: RecipientStatus::Sent,
            receipt,
        }
    }

    #[must_use]
    pub fn failed(recipient: &Recipient) -> Self {
        Self {
            recipient_id: recipient.id,
            reference: recipient.reference.clone(),
            status: RecipientStatus::Failed,
            receipt: None,
        }
    }

    /// Seed value for the delivery stat row.
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        self.status == RecipientStatus::Sent
    }
}
