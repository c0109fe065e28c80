//! Catalog data model: Holding → Transaction → File → Location(s),
//! Aggregation, Quota. See spec §3.

use crate::protocol::PathType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named batch owned by `(user, group)`. Holdings are user-visible and
/// the unit of listing and deletion authorization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub id: i64,
    pub label: String,
    pub tags: Vec<String>,
    pub user: String,
    pub group: String,
}

/// A single user request against one holding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub transaction_id: Uuid,
    pub ingest_time: DateTime<Utc>,
    pub holding_id: i64,
}

/// A catalogued object. `(transaction, original_path)` is unique within a
/// holding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogFile {
    pub id: i64,
    pub transaction_id: i64,
    pub original_path: String,
    pub path_type: PathType,
    pub link_path: Option<String>,
    pub size: u64,
    pub uid: u32,
    pub group_name: String,
    pub mode: u32,
    pub access_time: DateTime<Utc>,
    pub object_name: Option<String>,
}

/// Backing store for a `Location`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StorageType {
    ObjectStorage,
    Tape,
}

/// A binding of a `CatalogFile` to one backing store. A file has 1..2
/// locations: object storage always, tape optionally after archival.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: i64,
    pub file_id: i64,
    pub storage_type: StorageType,
    pub url: String,
    pub root: String,
    pub access_time: DateTime<Utc>,
    pub checksum: Option<u32>,
    /// Set when `storage_type == Tape`: which `Aggregation` this location's
    /// bytes live inside.
    pub aggregation_id: Option<String>,
}

/// A named tar-formatted unit written to tape once. Membership is immutable
/// after write; a file belongs to at most one aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregation {
    /// First 16 hex chars of SHAKE-256 over the concatenated member paths.
    pub id: String,
    pub tarfile_path: String,
    pub checksum: u32,
    pub members: Vec<String>,
}

/// Per-group cap on archival tape usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quota {
    pub group: String,
    pub size: u64,
    pub used: u64,
}

impl Quota {
    /// Whether committing `requested` additional bytes would exceed this
    /// group's tape cap (spec §4.5 quota enforcement).
    pub fn would_exceed(&self, requested: u64) -> bool {
        self.used.saturating_add(requested) > self.size
    }

    pub fn available(&self) -> u64 {
        self.size.saturating_sub(self.used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_exceeded_when_request_plus_used_over_size() {
        let q = Quota {
            group: "gws_test".to_string(),
            size: 100,
            used: 0,
        };
        assert!(q.would_exceed(150));
        assert!(!q.would_exceed(100));
    }
}
