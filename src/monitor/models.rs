//! Monitor data model (spec §3): `TransactionRecord` mirrors `Transaction`
//! by external id plus `(user, group)` for query authorization;
//! `SubRecord` is the independently retriable unit tracked through the
//! state machine in [`super::state`]; `FailedFile` is the append-only
//! terminal-failure ledger.

use super::state::State;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub id: i64,
    pub transaction_id: Uuid,
    pub user: String,
    pub group: String,
}

#[derive(Debug, Clone)]
pub struct SubRecord {
    pub id: i64,
    pub sub_id: Uuid,
    pub transaction_record_id: i64,
    pub state: State,
    pub retry_count: u32,
    pub last_transition: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FailedFile {
    pub id: i64,
    pub sub_record_id: i64,
    pub path: String,
    pub reason: String,
}
