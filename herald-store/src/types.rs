//! Append-only delivery records.

use chrono::{DateTime, Utc};
use herald_common::RecipientId;

/// A successful hand-off to the email provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryLog {
    pub recipient_id: RecipientId,
    pub provider: String,
    pub provider_message_id: String,
    pub created_at: DateTime<Utc>,
}

/// Tracking seed written for every recorded outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryStat {
    pub recipient_id: RecipientId,
    pub is_delivered: bool,
    pub is_opened: bool,
    pub created_at: DateTime<Utc>,
}
