//! Types shared across the herald crates.
//!
//! - [`schedule`]: schedules, their lifecycle and the transition rules
//! - [`recipient`]: recipients and the outcome recorded for each of them
//! - [`update`]: the broadcast document, its workspace and the rendered body
//! - [`logging`]: subscriber initialisation and logging macros

pub mod logging;
pub mod recipient;
pub mod schedule;
pub mod update;

pub use recipient::{DeliveryOutcome, ProviderReceipt, Recipient, RecipientId, RecipientStatus};
pub use schedule::{Schedule, ScheduleId, ScheduleStatus, StatusError, Tally};
pub use tracing;
pub use update::{RenderedContent, Update, UpdateId, Workspace, WorkspaceId};
