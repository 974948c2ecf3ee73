//! Storage for schedules, recipients and delivery records.
//!
//! The engine only talks to [`ScheduleStore`]. Two backends are provided:
//! [`PostgresStore`] for production and [`MemoryStore`] for tests and local
//! runs.

pub mod backends;
pub mod error;
pub mod r#trait;
pub mod types;

pub use backends::{MemoryStore, PostgresStore};
pub use error::{Result, StoreError};
pub use r#trait::{ScheduleClaim, ScheduleStore};
pub use types::{DeliveryLog, DeliveryStat};
