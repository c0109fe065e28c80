//! Catalog store: the persistence layer behind the bus-exposed catalog
//! operations of spec §4.5 (`find_holding`, `new_holding`, `add_files`,
//! `get_files`, `add_location`, `remove_location`, `delete_files`,
//! `update_tape`, `quota`). No SQL is exposed externally — every
//! operation here is reached only through the `cat` consumer's message
//! handlers.
//!
//! Backed by `sqlx`'s SQLite driver (the `catalog.database_url` default);
//! the same query surface would run unmodified against Postgres by
//! swapping the pool type, see DESIGN.md for the Open Question this
//! resolves.

use super::matching::PathQuery;
use super::models::{Aggregation, CatalogFile, Holding, Location, Quota, StorageType};
use crate::error::NldsError;
use crate::protocol::PathType;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

pub struct CatalogStore {
    pool: SqlitePool,
}

impl CatalogStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, NldsError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Bootstrap schema for this crate's own tests/local runs. Real
    /// deployments apply the numbered migration scripts described in
    /// spec §6; that migration runner is an external concern, out of
    /// scope here (spec §1 Non-goals).
    async fn ensure_schema(&self) -> Result<(), NldsError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS holdings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                label TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                user TEXT NOT NULL,
                group_name TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                transaction_id TEXT NOT NULL UNIQUE,
                ingest_time TEXT NOT NULL,
                holding_id INTEGER NOT NULL REFERENCES holdings(id)
            );
            CREATE TABLE IF NOT EXISTS catalog_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                transaction_id INTEGER NOT NULL REFERENCES transactions(id),
                original_path TEXT NOT NULL,
                path_type TEXT NOT NULL,
                link_path TEXT,
                size INTEGER NOT NULL,
                uid INTEGER NOT NULL,
                group_name TEXT NOT NULL,
                mode INTEGER NOT NULL,
                access_time TEXT NOT NULL,
                object_name TEXT,
                UNIQUE(transaction_id, original_path)
            );
            CREATE TABLE IF NOT EXISTS locations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id INTEGER NOT NULL REFERENCES catalog_files(id),
                storage_type TEXT NOT NULL,
                url TEXT NOT NULL,
                root TEXT NOT NULL,
                access_time TEXT NOT NULL,
                checksum INTEGER,
                aggregation_id TEXT,
                UNIQUE(file_id, storage_type)
            );
            CREATE TABLE IF NOT EXISTS aggregations (
                id TEXT PRIMARY KEY,
                tarfile_path TEXT NOT NULL,
                checksum INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS quotas (
                group_name TEXT PRIMARY KEY,
                size INTEGER NOT NULL,
                used INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn new_holding(
        &self,
        user: &str,
        group: &str,
        label: &str,
        tags: &[String],
    ) -> Result<Holding, NldsError> {
        let tags_json = serde_json::to_string(tags).map_err(NldsError::from)?;
        let id = sqlx::query(
            "INSERT INTO holdings (label, tags, user, group_name) VALUES (?, ?, ?, ?)",
        )
        .bind(label)
        .bind(&tags_json)
        .bind(user)
        .bind(group)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(Holding {
            id,
            label: label.to_string(),
            tags: tags.to_vec(),
            user: user.to_string(),
            group: group.to_string(),
        })
    }

    pub async fn find_holding(
        &self,
        user: &str,
        group: &str,
        label: Option<&str>,
        tag: Option<&str>,
        holding_id: Option<i64>,
    ) -> Result<Vec<Holding>, NldsError> {
        let rows = sqlx::query("SELECT id, label, tags, user, group_name FROM holdings WHERE user = ? AND group_name = ?")
            .bind(user)
            .bind(group)
            .fetch_all(&self.pool)
            .await?;

        let mut holdings = Vec::new();
        for row in rows {
            let id: i64 = row.try_get("id")?;
            if let Some(expect_id) = holding_id {
                if id != expect_id {
                    continue;
                }
            }
            let row_label: String = row.try_get("label")?;
            if let Some(expect_label) = label {
                if row_label != expect_label {
                    continue;
                }
            }
            let tags_json: String = row.try_get("tags")?;
            let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
            if let Some(expect_tag) = tag {
                if !tags.iter().any(|t| t == expect_tag) {
                    continue;
                }
            }
            holdings.push(Holding {
                id,
                label: row_label,
                tags,
                user: row.try_get("user")?,
                group: row.try_get("group_name")?,
            });
        }
        Ok(holdings)
    }

    pub async fn new_transaction(
        &self,
        holding_id: i64,
        transaction_id: Uuid,
    ) -> Result<i64, NldsError> {
        let now = Utc::now().to_rfc3339();
        let id = sqlx::query(
            "INSERT INTO transactions (transaction_id, ingest_time, holding_id) VALUES (?, ?, ?)",
        )
        .bind(transaction_id.to_string())
        .bind(&now)
        .bind(holding_id)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    /// Catalogue `files` against `transaction_id`. Enforces the
    /// `(transaction, original_path)` uniqueness invariant from spec §3;
    /// a clash surfaces as [`NldsError::DuplicateFilePath`].
    pub async fn add_files(
        &self,
        transaction_id: i64,
        files: &[CatalogFile],
    ) -> Result<Vec<CatalogFile>, NldsError> {
        let mut inserted = Vec::with_capacity(files.len());
        for file in files {
            let result = sqlx::query(
                "INSERT INTO catalog_files
                 (transaction_id, original_path, path_type, link_path, size, uid, group_name, mode, access_time, object_name)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(transaction_id)
            .bind(&file.original_path)
            .bind(path_type_str(file.path_type))
            .bind(&file.link_path)
            .bind(file.size as i64)
            .bind(file.uid as i64)
            .bind(&file.group_name)
            .bind(file.mode as i64)
            .bind(file.access_time.to_rfc3339())
            .bind(&file.object_name)
            .execute(&self.pool)
            .await;

            let id = match result {
                Ok(r) => r.last_insert_rowid(),
                Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                    return Err(NldsError::DuplicateFilePath {
                        path: file.original_path.clone(),
                    })
                }
                Err(e) => return Err(NldsError::from(e)),
            };

            inserted.push(CatalogFile {
                id,
                transaction_id,
                ..file.clone()
            });
        }
        Ok(inserted)
    }

    /// List files under `holding_id` whose original path matches `query`
    /// (spec §4.5 text matching via [`PathQuery`]).
    pub async fn get_files(
        &self,
        holding_id: i64,
        query: &PathQuery,
    ) -> Result<Vec<CatalogFile>, NldsError> {
        let rows = sqlx::query(
            "SELECT f.id, f.transaction_id, f.original_path, f.path_type, f.link_path,
                    f.size, f.uid, f.group_name, f.mode, f.access_time, f.object_name
             FROM catalog_files f
             JOIN transactions t ON t.id = f.transaction_id
             WHERE t.holding_id = ?",
        )
        .bind(holding_id)
        .fetch_all(&self.pool)
        .await?;

        let mut files = Vec::new();
        for row in rows {
            let original_path: String = row.try_get("original_path")?;
            if !query.matches(&original_path) {
                continue;
            }
            files.push(row_to_catalog_file(&row, original_path)?);
        }
        Ok(files)
    }

    pub async fn add_location(
        &self,
        file_id: i64,
        storage_type: StorageType,
        url: &str,
        root: &str,
        checksum: Option<u32>,
        aggregation_id: Option<&str>,
    ) -> Result<Location, NldsError> {
        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO locations (file_id, storage_type, url, root, access_time, checksum, aggregation_id)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(file_id)
        .bind(storage_type_str(storage_type))
        .bind(url)
        .bind(root)
        .bind(now.to_rfc3339())
        .bind(checksum.map(|c| c as i64))
        .bind(aggregation_id)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(Location {
            id,
            file_id,
            storage_type,
            url: url.to_string(),
            root: root.to_string(),
            access_time: now,
            checksum,
            aggregation_id: aggregation_id.map(|s| s.to_string()),
        })
    }

    /// Look up one catalogued file by its original path, across all
    /// holdings. Used by the transfer/archive workers to recover a
    /// file's catalog id and group from a bus message that carries only
    /// the path (spec §4.1 `data.filelist` path-detail records).
    pub async fn find_file_by_original_path(
        &self,
        original_path: &str,
    ) -> Result<Option<CatalogFile>, NldsError> {
        let row = sqlx::query(
            "SELECT id, transaction_id, original_path, path_type, link_path,
                    size, uid, group_name, mode, access_time, object_name
             FROM catalog_files WHERE original_path = ?
             ORDER BY id DESC LIMIT 1",
        )
        .bind(original_path)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row_to_catalog_file(&row, original_path.to_string())?)),
            None => Ok(None),
        }
    }

    /// Fetch the single location of `file_id` for a given `storage_type`,
    /// used to recover a stored checksum on GET (spec §4.4/§4.6).
    pub async fn get_location(
        &self,
        file_id: i64,
        storage_type: StorageType,
    ) -> Result<Option<Location>, NldsError> {
        let row = sqlx::query(
            "SELECT id, file_id, storage_type, url, root, access_time, checksum, aggregation_id
             FROM locations WHERE file_id = ? AND storage_type = ?",
        )
        .bind(file_id)
        .bind(storage_type_str(storage_type))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let access_time: String = row.try_get("access_time")?;
                Ok(Some(Location {
                    id: row.try_get("id")?,
                    file_id: row.try_get("file_id")?,
                    storage_type,
                    url: row.try_get("url")?,
                    root: row.try_get("root")?,
                    access_time: DateTime::parse_from_rfc3339(&access_time)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    checksum: row.try_get::<Option<i64>, _>("checksum")?.map(|c| c as u32),
                    aggregation_id: row.try_get("aggregation_id")?,
                }))
            }
            None => Ok(None),
        }
    }

    pub async fn remove_location(
        &self,
        file_id: i64,
        storage_type: StorageType,
    ) -> Result<(), NldsError> {
        sqlx::query("DELETE FROM locations WHERE file_id = ? AND storage_type = ?")
            .bind(file_id)
            .bind(storage_type_str(storage_type))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_files(&self, file_ids: &[i64]) -> Result<(), NldsError> {
        let mut tx = self.pool.begin().await?;
        for id in file_ids {
            sqlx::query("DELETE FROM locations WHERE file_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM catalog_files WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Record that `aggregation_id` has been written to tape at
    /// `tarfile_path` with the given adler32 `checksum` (spec §4.5
    /// `update_tape`).
    pub async fn update_tape(
        &self,
        aggregation_id: &str,
        tarfile_path: &str,
        checksum: u32,
    ) -> Result<Aggregation, NldsError> {
        sqlx::query(
            "INSERT INTO aggregations (id, tarfile_path, checksum) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET tarfile_path = excluded.tarfile_path, checksum = excluded.checksum",
        )
        .bind(aggregation_id)
        .bind(tarfile_path)
        .bind(checksum as i64)
        .execute(&self.pool)
        .await?;

        Ok(Aggregation {
            id: aggregation_id.to_string(),
            tarfile_path: tarfile_path.to_string(),
            checksum,
            members: Vec::new(),
        })
    }

    pub async fn quota(&self, group: &str) -> Result<Quota, NldsError> {
        let row = sqlx::query("SELECT group_name, size, used FROM quotas WHERE group_name = ?")
            .bind(group)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Quota {
                group: row.try_get("group_name")?,
                size: row.try_get::<i64, _>("size")? as u64,
                used: row.try_get::<i64, _>("used")? as u64,
            }),
            None => Err(NldsError::NoTapeResource {
                service: group.to_string(),
            }),
        }
    }

    /// Seed/overwrite a group's quota record (test + provisioning helper).
    pub async fn set_quota(&self, group: &str, size: u64) -> Result<(), NldsError> {
        sqlx::query(
            "INSERT INTO quotas (group_name, size, used) VALUES (?, ?, 0)
             ON CONFLICT(group_name) DO UPDATE SET size = excluded.size",
        )
        .bind(group)
        .bind(size as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Apply `delta` bytes to a group's tape usage, on successful
    /// archive-put (positive) or archive-del (negative) per spec §3
    /// Quota lifecycle.
    pub async fn adjust_quota_used(&self, group: &str, delta: i64) -> Result<Quota, NldsError> {
        sqlx::query("UPDATE quotas SET used = MAX(0, used + ?) WHERE group_name = ?")
            .bind(delta)
            .bind(group)
            .execute(&self.pool)
            .await?;
        self.quota(group).await
    }

    /// Files catalogued with an object-storage location but no tape
    /// location yet: the "eligible for archive" candidate set the
    /// catalog worker populates the periodic `archive-next` sweep with
    /// (spec §4.7).
    pub async fn eligible_for_archive(&self) -> Result<Vec<CatalogFile>, NldsError> {
        let rows = sqlx::query(
            "SELECT f.id, f.transaction_id, f.original_path, f.path_type, f.link_path,
                    f.size, f.uid, f.group_name, f.mode, f.access_time, f.object_name
             FROM catalog_files f
             JOIN locations obj ON obj.file_id = f.id AND obj.storage_type = 'OBJECT_STORAGE'
             WHERE NOT EXISTS (
                 SELECT 1 FROM locations tape
                 WHERE tape.file_id = f.id AND tape.storage_type = 'TAPE'
             )",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut files = Vec::new();
        for row in rows {
            let original_path: String = row.try_get("original_path")?;
            files.push(row_to_catalog_file(&row, original_path)?);
        }
        Ok(files)
    }
}

fn path_type_str(t: PathType) -> &'static str {
    match t {
        PathType::File => "FILE",
        PathType::Directory => "DIRECTORY",
        PathType::Link => "LINK",
        PathType::NotRecognised => "NOT_RECOGNISED",
        PathType::Unindexed => "UNINDEXED",
    }
}

fn path_type_from_str(s: &str) -> PathType {
    match s {
        "FILE" => PathType::File,
        "DIRECTORY" => PathType::Directory,
        "LINK" => PathType::Link,
        "UNINDEXED" => PathType::Unindexed,
        _ => PathType::NotRecognised,
    }
}

fn storage_type_str(t: StorageType) -> &'static str {
    match t {
        StorageType::ObjectStorage => "OBJECT_STORAGE",
        StorageType::Tape => "TAPE",
    }
}

fn row_to_catalog_file(row: &sqlx::sqlite::SqliteRow, original_path: String) -> Result<CatalogFile, NldsError> {
    let path_type: String = row.try_get("path_type")?;
    let access_time: String = row.try_get("access_time")?;
    Ok(CatalogFile {
        id: row.try_get("id")?,
        transaction_id: row.try_get("transaction_id")?,
        original_path,
        path_type: path_type_from_str(&path_type),
        link_path: row.try_get("link_path")?,
        size: row.try_get::<i64, _>("size")? as u64,
        uid: row.try_get::<i64, _>("uid")? as u32,
        group_name: row.try_get("group_name")?,
        mode: row.try_get::<i64, _>("mode")? as u32,
        access_time: DateTime::parse_from_rfc3339(&access_time)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        object_name: row.try_get("object_name")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PathType;

    async fn test_store() -> CatalogStore {
        CatalogStore::connect("sqlite::memory:", 1).await.unwrap()
    }

    fn sample_file(path: &str, size: u64) -> CatalogFile {
        CatalogFile {
            id: 0,
            transaction_id: 0,
            original_path: path.to_string(),
            path_type: PathType::File,
            link_path: None,
            size,
            uid: 1000,
            group_name: "gws_test".to_string(),
            mode: 0o644,
            access_time: Utc::now(),
            object_name: None,
        }
    }

    #[tokio::test]
    async fn new_holding_then_find_holding_round_trips() {
        let store = test_store().await;
        store.new_holding("alice", "gws_test", "batch1", &["tagA".to_string()]).await.unwrap();
        let found = store.find_holding("alice", "gws_test", None, None, None).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].label, "batch1");

        let by_tag = store.find_holding("alice", "gws_test", None, Some("tagA"), None).await.unwrap();
        assert_eq!(by_tag.len(), 1);
        let by_missing_tag = store.find_holding("alice", "gws_test", None, Some("nope"), None).await.unwrap();
        assert_eq!(by_missing_tag.len(), 0);
    }

    #[tokio::test]
    async fn duplicate_path_in_same_transaction_is_rejected() {
        let store = test_store().await;
        let holding = store.new_holding("alice", "gws_test", "batch1", &[]).await.unwrap();
        let txn_id = store.new_transaction(holding.id, Uuid::new_v4()).await.unwrap();

        store.add_files(txn_id, &[sample_file("/data/a.nc", 100)]).await.unwrap();
        let result = store.add_files(txn_id, &[sample_file("/data/a.nc", 999)]).await;
        assert!(matches!(result, Err(NldsError::DuplicateFilePath { .. })));
    }

    #[tokio::test]
    async fn get_files_with_regex_query_matches_s4() {
        let store = test_store().await;
        let holding = store.new_holding("alice", "gws_test", "batch1", &[]).await.unwrap();
        let txn_id = store.new_transaction(holding.id, Uuid::new_v4()).await.unwrap();
        store
            .add_files(
                txn_id,
                &[
                    sample_file("/data/foo.nc", 1),
                    sample_file("/data/bar.nc", 2),
                    sample_file("/data/baz.nc", 3),
                ],
            )
            .await
            .unwrap();

        let query = PathQuery::parse(r"^/data/(foo|bar)\.nc$");
        let matched = store.get_files(holding.id, &query).await.unwrap();
        assert_eq!(matched.len(), 2);
    }

    #[tokio::test]
    async fn quota_adjustment_tracks_used_bytes() {
        let store = test_store().await;
        store.set_quota("gws_test", 1000).await.unwrap();
        let q = store.adjust_quota_used("gws_test", 400).await.unwrap();
        assert_eq!(q.used, 400);
        assert!(!q.would_exceed(500));
        assert!(q.would_exceed(700));
    }

    #[tokio::test]
    async fn add_and_remove_location_round_trips() {
        let store = test_store().await;
        let holding = store.new_holding("alice", "gws_test", "batch1", &[]).await.unwrap();
        let txn_id = store.new_transaction(holding.id, Uuid::new_v4()).await.unwrap();
        let inserted = store.add_files(txn_id, &[sample_file("/data/a.nc", 10)]).await.unwrap();
        let file_id = inserted[0].id;

        store
            .add_location(file_id, StorageType::ObjectStorage, "s3://bucket", "nlds.tx", None, None)
            .await
            .unwrap();
        store.remove_location(file_id, StorageType::ObjectStorage).await.unwrap();
    }

    #[tokio::test]
    async fn find_file_by_original_path_returns_most_recent_match() {
        let store = test_store().await;
        let holding = store.new_holding("alice", "gws_test", "batch1", &[]).await.unwrap();
        let txn_id = store.new_transaction(holding.id, Uuid::new_v4()).await.unwrap();
        store.add_files(txn_id, &[sample_file("/data/a.nc", 10)]).await.unwrap();

        let found = store.find_file_by_original_path("/data/a.nc").await.unwrap();
        assert_eq!(found.unwrap().original_path, "/data/a.nc");
        assert!(store.find_file_by_original_path("/data/missing.nc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_location_round_trips_checksum() {
        let store = test_store().await;
        let holding = store.new_holding("alice", "gws_test", "batch1", &[]).await.unwrap();
        let txn_id = store.new_transaction(holding.id, Uuid::new_v4()).await.unwrap();
        let inserted = store.add_files(txn_id, &[sample_file("/data/a.nc", 10)]).await.unwrap();
        let file_id = inserted[0].id;

        store
            .add_location(file_id, StorageType::ObjectStorage, "s3://bucket", "nlds.tx", Some(0xDEAD_BEEF), None)
            .await
            .unwrap();
        let location = store.get_location(file_id, StorageType::ObjectStorage).await.unwrap().unwrap();
        assert_eq!(location.checksum, Some(0xDEAD_BEEF));
        assert!(store.get_location(file_id, StorageType::Tape).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eligible_for_archive_excludes_already_taped_files() {
        let store = test_store().await;
        let holding = store.new_holding("alice", "gws_test", "batch1", &[]).await.unwrap();
        let txn_id = store.new_transaction(holding.id, Uuid::new_v4()).await.unwrap();
        let inserted = store
            .add_files(
                txn_id,
                &[sample_file("/data/a.nc", 10), sample_file("/data/b.nc", 20)],
            )
            .await
            .unwrap();

        for file in &inserted {
            store
                .add_location(file.id, StorageType::ObjectStorage, "s3://bucket", "nlds.tx", None, None)
                .await
                .unwrap();
        }
        store
            .add_location(inserted[0].id, StorageType::Tape, "tape://lib", "agg1", None, Some("agg1"))
            .await
            .unwrap();

        let eligible = store.eligible_for_archive().await.unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].original_path, "/data/b.nc");
    }
}
