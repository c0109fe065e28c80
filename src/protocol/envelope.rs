//! Message envelope.
//!
//! Every bus message is a JSON document with three top-level sections:
//! `details`, `data`, and `type`. `data` carries the step-specific payload,
//! canonically a filelist of path-detail records; `details` carries
//! transaction metadata and the `route` trail every consumer appends to
//! before re-publishing.

use crate::error::NldsError;
use crate::monitor::state::State;
use base64::Engine;
use chrono::{DateTime, Utc};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use uuid::Uuid;

/// Classification of an indexed path, per spec §3/§4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PathType {
    File,
    Directory,
    Link,
    NotRecognised,
    Unindexed,
}

/// A single catalogued/indexed path and its metadata, carried in
/// `data.filelist`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathDetails {
    pub original_path: String,
    pub path_type: PathType,
    pub link_path: Option<String>,
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub access_time: DateTime<Utc>,
    pub object_name: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    pub failure_reason: Option<String>,
}

impl PathDetails {
    pub fn new(original_path: impl Into<String>, path_type: PathType, size: u64) -> Self {
        Self {
            original_path: original_path.into(),
            path_type,
            link_path: None,
            size,
            mode: 0,
            uid: 0,
            gid: 0,
            access_time: Utc::now(),
            object_name: None,
            retry_count: 0,
            failure_reason: None,
        }
    }

    /// Increment the retry counter, preserving invariant (I2): retry count
    /// is monotonically non-decreasing along a path's trajectory.
    pub fn bump_retry(&mut self, reason: impl Into<String>) {
        self.retry_count += 1;
        self.failure_reason = Some(reason.into());
    }
}

/// `type` ∈ {STANDARD, LOG}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Standard,
    Log,
}

/// `details` section: transaction metadata common to every envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Details {
    pub transaction_id: Uuid,
    pub sub_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub group: String,
    pub target_path: Option<String>,
    pub api_action: String,
    pub job_label: Option<String>,
    pub state: State,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub tenancy: Option<String>,
    #[serde(default)]
    pub route: Vec<String>,
    #[serde(default)]
    pub compress: bool,
}

impl Details {
    pub fn new(user: impl Into<String>, group: impl Into<String>, api_action: impl Into<String>) -> Self {
        Self {
            transaction_id: Uuid::new_v4(),
            sub_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            user: user.into(),
            group: group.into(),
            target_path: None,
            api_action: api_action.into(),
            job_label: None,
            state: State::Initialising,
            access_key: None,
            secret_key: None,
            tenancy: None,
            route: Vec::new(),
            compress: false,
        }
    }

    /// Append this consumer's name to the route trail. Every consumer
    /// MUST call this before re-publishing (testable property #2).
    pub fn append_route(&mut self, consumer_name: &str) {
        self.route.push(consumer_name.to_string());
    }
}

/// The full message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub details: Details,
    pub data: serde_json::Value,
    #[serde(rename = "type")]
    pub message_type: MessageType,
}

impl Envelope {
    pub fn new(details: Details, data: serde_json::Value, message_type: MessageType) -> Self {
        Self {
            details,
            data,
            message_type,
        }
    }

    pub fn with_filelist(details: Details, filelist: &[PathDetails]) -> Result<Self, NldsError> {
        let data = serde_json::json!({ "filelist": filelist });
        Ok(Self::new(details, data, MessageType::Standard))
    }

    /// Extract `data.filelist` as typed `PathDetails`.
    pub fn filelist(&self) -> Result<Vec<PathDetails>, NldsError> {
        let raw = self
            .data
            .get("filelist")
            .cloned()
            .unwrap_or(serde_json::Value::Array(Vec::new()));
        serde_json::from_value(raw).map_err(NldsError::from)
    }

    /// Replace `data.filelist` with a new set of records.
    pub fn set_filelist(&mut self, filelist: &[PathDetails]) {
        self.data = serde_json::json!({ "filelist": filelist });
    }

    /// Compress `data` in place: serialize to JSON text, zlib-deflate,
    /// base64-encode, and set `details.compress = true`. No-op if already
    /// compressed.
    pub fn compress(&mut self) -> Result<(), NldsError> {
        if self.details.compress {
            return Ok(());
        }
        let plain = serde_json::to_vec(&self.data).map_err(NldsError::from)?;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&plain)
            .map_err(|e| NldsError::Internal(format!("zlib compress failed: {}", e)))?;
        let compressed = encoder
            .finish()
            .map_err(|e| NldsError::Internal(format!("zlib compress failed: {}", e)))?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(compressed);
        self.data = serde_json::Value::String(encoded);
        self.details.compress = true;
        Ok(())
    }

    /// Reverse of [`Envelope::compress`]: base64-decode, zlib-inflate, and
    /// parse back into the original JSON value. No-op if not compressed.
    pub fn decompress(&mut self) -> Result<(), NldsError> {
        if !self.details.compress {
            return Ok(());
        }
        let encoded = self
            .data
            .as_str()
            .ok_or_else(|| NldsError::DecompressionFailed("compressed data is not a string".to_string()))?;
        let compressed = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| NldsError::DecompressionFailed(e.to_string()))?;
        let mut decoder = ZlibDecoder::new(&compressed[..]);
        let mut plain = Vec::new();
        decoder
            .read_to_end(&mut plain)
            .map_err(|e| NldsError::DecompressionFailed(e.to_string()))?;
        self.data = serde_json::from_slice(&plain).map_err(NldsError::from)?;
        self.details.compress = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_details() -> Details {
        Details::new("alice", "gws_test", "PUT")
    }

    fn sample_filelist() -> Vec<PathDetails> {
        vec![
            PathDetails::new("/data/a.nc", PathType::File, 100),
            PathDetails::new("/data/b.nc", PathType::File, 200),
        ]
    }

    #[test]
    fn compress_then_decompress_round_trips() {
        let details = sample_details();
        let filelist = sample_filelist();
        let mut env = Envelope::with_filelist(details, &filelist).unwrap();
        let original_data = env.data.clone();

        env.compress().unwrap();
        assert!(env.details.compress);
        assert!(env.data.is_string());

        env.decompress().unwrap();
        assert!(!env.details.compress);
        assert_eq!(env.data, original_data);
        assert_eq!(env.filelist().unwrap(), filelist);
    }

    #[test]
    fn route_trail_grows_strictly() {
        let mut details = sample_details();
        assert_eq!(details.route.len(), 0);
        details.append_route("indexer");
        assert_eq!(details.route.len(), 1);
        details.append_route("catalog-put");
        assert_eq!(details.route, vec!["indexer", "catalog-put"]);
    }

    #[test]
    fn decompress_is_noop_when_not_compressed() {
        let details = sample_details();
        let filelist = sample_filelist();
        let mut env = Envelope::with_filelist(details, &filelist).unwrap();
        let before = env.data.clone();
        env.decompress().unwrap();
        assert_eq!(env.data, before);
    }
}
