//! Monitor store: persists per-sub-transaction progress, retries and
//! failures (spec §3, §4.2). State transitions are validated against
//! [`State::can_transition_to`] and persisted before the caller
//! re-publishes downstream (spec §4.2 rule 3), so a crash between commit
//! and publish is recovered by broker redelivery re-running the same
//! transition from a consistent, already-committed state.

use super::models::{FailedFile, SubRecord, TransactionRecord};
use super::state::State;
use crate::error::NldsError;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

pub struct MonitorStore {
    pool: SqlitePool,
}

impl MonitorStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, NldsError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), NldsError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS monitor_transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                transaction_id TEXT NOT NULL UNIQUE,
                user TEXT NOT NULL,
                group_name TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS monitor_subrecords (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sub_id TEXT NOT NULL UNIQUE,
                transaction_record_id INTEGER NOT NULL REFERENCES monitor_transactions(id),
                state INTEGER NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_transition TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS monitor_failed_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sub_record_id INTEGER NOT NULL REFERENCES monitor_subrecords(id),
                path TEXT NOT NULL,
                reason TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Open a `TransactionRecord`, created by the router on transaction
    /// entry (spec §3 Lifecycle).
    pub async fn create_transaction_record(
        &self,
        transaction_id: Uuid,
        user: &str,
        group: &str,
    ) -> Result<TransactionRecord, NldsError> {
        let id = sqlx::query(
            "INSERT INTO monitor_transactions (transaction_id, user, group_name) VALUES (?, ?, ?)",
        )
        .bind(transaction_id.to_string())
        .bind(user)
        .bind(group)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(TransactionRecord {
            id,
            transaction_id,
            user: user.to_string(),
            group: group.to_string(),
        })
    }

    /// Query authorization per spec §3: the caller must supply a matching
    /// `(user, group)` to retrieve a `TransactionRecord`.
    pub async fn get_transaction_record(
        &self,
        transaction_id: Uuid,
        user: &str,
        group: &str,
    ) -> Result<Option<TransactionRecord>, NldsError> {
        let row = sqlx::query(
            "SELECT id, transaction_id, user, group_name FROM monitor_transactions
             WHERE transaction_id = ? AND user = ? AND group_name = ?",
        )
        .bind(transaction_id.to_string())
        .bind(user)
        .bind(group)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(TransactionRecord {
                id: row.try_get("id")?,
                transaction_id,
                user: row.try_get("user")?,
                group: row.try_get("group_name")?,
            })
        })
        .transpose()
    }

    /// Create a new `SubRecord`, either by the router on transaction
    /// entry or by the splitter when spawning a sub-transaction (spec §3
    /// Lifecycle).
    pub async fn create_sub_record(
        &self,
        transaction_record_id: i64,
        sub_id: Uuid,
        initial_state: State,
    ) -> Result<SubRecord, NldsError> {
        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO monitor_subrecords (sub_id, transaction_record_id, state, retry_count, last_transition)
             VALUES (?, ?, ?, 0, ?)",
        )
        .bind(sub_id.to_string())
        .bind(transaction_record_id)
        .bind(initial_state as i32)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(SubRecord {
            id,
            sub_id,
            transaction_record_id,
            state: initial_state,
            retry_count: 0,
            last_transition: now,
        })
    }

    pub async fn get_sub_record(&self, sub_id: Uuid) -> Result<SubRecord, NldsError> {
        let row = sqlx::query(
            "SELECT id, sub_id, transaction_record_id, state, retry_count, last_transition
             FROM monitor_subrecords WHERE sub_id = ?",
        )
        .bind(sub_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| NldsError::Internal(format!("unknown sub-record {sub_id}")))?;

        row_to_sub_record(&row, sub_id)
    }

    /// Transition `sub_id` to `next`, validated against
    /// [`State::can_transition_to`] (spec §4.2 rule: "a sub-record MAY
    /// regress only to its immediately-prior workflow state on retry").
    /// Persisted before the caller re-publishes downstream.
    pub async fn transition(&self, sub_id: Uuid, next: State) -> Result<SubRecord, NldsError> {
        let current = self.get_sub_record(sub_id).await?;
        if !current.state.can_transition_to(next) {
            return Err(NldsError::InvalidStateTransition {
                from: format!("{:?}", current.state),
                to: format!("{:?}", next),
            });
        }

        let now = Utc::now();
        sqlx::query("UPDATE monitor_subrecords SET state = ?, last_transition = ? WHERE sub_id = ?")
            .bind(next as i32)
            .bind(now.to_rfc3339())
            .bind(sub_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(SubRecord {
            state: next,
            last_transition: now,
            ..current
        })
    }

    pub async fn increment_retry(&self, sub_id: Uuid) -> Result<u32, NldsError> {
        sqlx::query("UPDATE monitor_subrecords SET retry_count = retry_count + 1 WHERE sub_id = ?")
            .bind(sub_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(self.get_sub_record(sub_id).await?.retry_count)
    }

    /// Append a terminal per-file failure (spec §7: "Failures are never
    /// silent: the failed file list and its reasons are appended to the
    /// monitor's FailedFile table").
    pub async fn append_failed_file(
        &self,
        sub_record_id: i64,
        path: &str,
        reason: &str,
    ) -> Result<FailedFile, NldsError> {
        let id = sqlx::query(
            "INSERT INTO monitor_failed_files (sub_record_id, path, reason) VALUES (?, ?, ?)",
        )
        .bind(sub_record_id)
        .bind(path)
        .bind(reason)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(FailedFile {
            id,
            sub_record_id,
            path: path.to_string(),
            reason: reason.to_string(),
        })
    }

    pub async fn list_failed_files(&self, sub_record_id: i64) -> Result<Vec<FailedFile>, NldsError> {
        let rows = sqlx::query("SELECT id, sub_record_id, path, reason FROM monitor_failed_files WHERE sub_record_id = ?")
            .bind(sub_record_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                Ok(FailedFile {
                    id: row.try_get("id")?,
                    sub_record_id: row.try_get("sub_record_id")?,
                    path: row.try_get("path")?,
                    reason: row.try_get("reason")?,
                })
            })
            .collect()
    }
}

fn row_to_sub_record(row: &sqlx::sqlite::SqliteRow, sub_id: Uuid) -> Result<SubRecord, NldsError> {
    let state_raw: i32 = row.try_get("state")?;
    let last_transition: String = row.try_get("last_transition")?;
    Ok(SubRecord {
        id: row.try_get("id")?,
        sub_id,
        transaction_record_id: row.try_get("transaction_record_id")?,
        state: state_from_i32(state_raw)?,
        retry_count: row.try_get::<i64, _>("retry_count")? as u32,
        last_transition: DateTime::parse_from_rfc3339(&last_transition)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn state_from_i32(raw: i32) -> Result<State, NldsError> {
    use State::*;
    Ok(match raw {
        -1 => Initialising,
        0 => Routing,
        1 => Splitting,
        2 => Indexing,
        3 => CatalogPutting,
        4 => TransferPutting,
        10 => CatalogGetting,
        11 => ArchiveGetting,
        12 => TransferGetting,
        13 => TransferInit,
        20 => ArchiveInit,
        21 => ArchivePutting,
        22 => ArchivePreparing,
        30 => CatalogDeleting,
        32 => CatalogArchiveUpdating,
        33 => CatalogRemoving,
        100 => Complete,
        101 => Failed,
        102 => CompleteWithErrors,
        103 => CompleteWithWarnings,
        110 => Split,
        1000 => Searching,
        other => {
            return Err(NldsError::Internal(format!(
                "unknown persisted monitor state discriminant {other}"
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> MonitorStore {
        MonitorStore::connect("sqlite::memory:", 1).await.unwrap()
    }

    #[tokio::test]
    async fn transaction_record_round_trips_with_query_authorization() {
        let store = test_store().await;
        let txn_id = Uuid::new_v4();
        store.create_transaction_record(txn_id, "alice", "gws_test").await.unwrap();

        let found = store.get_transaction_record(txn_id, "alice", "gws_test").await.unwrap();
        assert!(found.is_some());

        let wrong_user = store.get_transaction_record(txn_id, "bob", "gws_test").await.unwrap();
        assert!(wrong_user.is_none());
    }

    #[tokio::test]
    async fn sub_record_transitions_follow_allowed_relation() {
        let store = test_store().await;
        let txn = store
            .create_transaction_record(Uuid::new_v4(), "alice", "gws_test")
            .await
            .unwrap();
        let sub_id = Uuid::new_v4();
        store.create_sub_record(txn.id, sub_id, State::Initialising).await.unwrap();

        let after_routing = store.transition(sub_id, State::Routing).await.unwrap();
        assert_eq!(after_routing.state, State::Routing);

        let rejected = store.transition(sub_id, State::Complete).await;
        assert!(matches!(rejected, Err(NldsError::InvalidStateTransition { .. })));
    }

    #[tokio::test]
    async fn retry_count_increments_and_persists() {
        let store = test_store().await;
        let txn = store
            .create_transaction_record(Uuid::new_v4(), "alice", "gws_test")
            .await
            .unwrap();
        let sub_id = Uuid::new_v4();
        store.create_sub_record(txn.id, sub_id, State::Indexing).await.unwrap();

        assert_eq!(store.increment_retry(sub_id).await.unwrap(), 1);
        assert_eq!(store.increment_retry(sub_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn failed_files_are_appended_not_overwritten() {
        let store = test_store().await;
        let txn = store
            .create_transaction_record(Uuid::new_v4(), "alice", "gws_test")
            .await
            .unwrap();
        let sub_id = Uuid::new_v4();
        let sub = store.create_sub_record(txn.id, sub_id, State::Indexing).await.unwrap();

        store.append_failed_file(sub.id, "/data/a.nc", "permission_denied").await.unwrap();
        store.append_failed_file(sub.id, "/data/b.nc", "not_found").await.unwrap();

        let failed = store.list_failed_files(sub.id).await.unwrap();
        assert_eq!(failed.len(), 2);
    }
}
