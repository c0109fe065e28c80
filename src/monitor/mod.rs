//! Monitor: per-sub-transaction state machine, data model and persistence
//! store (spec §3, §4.2).

pub mod models;
pub mod state;
pub mod store;

pub use models::{FailedFile, SubRecord, TransactionRecord};
pub use state::{LogLevel, State};
pub use store::MonitorStore;
