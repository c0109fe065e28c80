//! Archive workers (spec §4.6): stream object-store objects into
//! tar-formatted tape aggregations (PUT) and back out again (GET).
//!
//! Grounded in `nlds_processors/archiver/s3_to_tarfile_stream.py` (the
//! pre-write existence/size verification loop over a bin's members) and
//! `nlds_processors/archiver/adler32file.py` (the checksumming cursor, see
//! [`adler32`]). The tape's positional interface is specified in [`tape`].

pub mod adler32;
pub mod tape;

pub use tape::{MockTapeClient, TapeClient, TapeFile};

use crate::aggregator::{self, Sizeable};
use crate::error::NldsError;
use crate::protocol::envelope::PathDetails;
use crate::transfer::object_store::ObjectStoreClient;
use crate::transfer::object_name_for;
use adler32::{Adler32Reader, Adler32Writer};
use std::io::{Read, Write};
use std::sync::Arc;

/// Result of successfully archiving one bin to tape (spec §3 Aggregation,
/// §4.6).
#[derive(Debug, Clone)]
pub struct ArchiveOutcome {
    pub aggregation_id: String,
    pub tarfile_path: String,
    pub checksum: u32,
    pub tar_size: u64,
    pub members: Vec<PathDetails>,
}

/// `check_files_exist` from `s3_to_tarfile_stream.py`: verify every
/// member's catalogued object is still present in the object store and
/// its size matches what was recorded at PUT time, before any tape bytes
/// are written. Returns the members that failed verification.
async fn verify_members(
    store: &dyn ObjectStoreClient,
    bucket: &str,
    members: &[PathDetails],
) -> Vec<(PathDetails, String)> {
    let mut failed = Vec::new();
    for member in members {
        let object = object_name_for(member);
        match store.exists(bucket, &object).await {
            Ok(true) => match store.size(bucket, &object).await {
                Ok(size) if size == member.size => {}
                Ok(_) => failed.push((member.clone(), "size_mismatch".to_string())),
                Err(e) => failed.push((member.clone(), e.failure_reason().to_string())),
            },
            Ok(false) => failed.push((member.clone(), "object_missing".to_string())),
            Err(e) => failed.push((member.clone(), e.failure_reason().to_string())),
        }
    }
    failed
}

/// Write one bin to tape as a tar-formatted aggregation (spec §4.6 PUT).
///
/// On a per-file verification failure, the failing member is dropped
/// from the bin and the aggregation id is regenerated over the
/// surviving members (spec: "remove the failing file from the bin,
/// regenerate the bin-id, and retry"); an empty bin after dropping
/// failures is a terminal failure for the sub-record.
pub async fn put_bin(
    store: Arc<dyn ObjectStoreClient>,
    tape: &dyn TapeClient,
    bucket: &str,
    tarfile_dir: &str,
    members: Vec<PathDetails>,
) -> Result<ArchiveOutcome, NldsError> {
    let mut current = members;
    let mut dropped = Vec::new();

    loop {
        if current.is_empty() {
            return Err(NldsError::RetriesExhausted {
                attempts: dropped.len() as u32,
                what: "archive-put: all bin members failed verification".to_string(),
            });
        }

        let failures = verify_members(store.as_ref(), bucket, &current).await;
        if failures.is_empty() {
            break;
        }
        let failed_paths: std::collections::HashSet<String> =
            failures.iter().map(|(m, _)| m.original_path.clone()).collect();
        dropped.extend(failures);
        current.retain(|m| !failed_paths.contains(&m.original_path));
    }

    let aggregation_id = aggregator::aggregation_id(&current);
    let tarfile_path = format!("{tarfile_dir}/{aggregation_id}.tar");

    let mut writer = Adler32Writer::new();
    {
        let mut builder = tar::Builder::new(&mut writer);
        for member in &current {
            let object = object_name_for(member);
            let bytes = store.get(bucket, &object).await?;
            let mut header = tar::Header::new_gnu();
            header.set_size(bytes.len() as u64);
            header.set_mode(member.mode);
            header.set_mtime(member.access_time.timestamp().max(0) as u64);
            header.set_cksum();
            builder
                .append_data(&mut header, &member.original_path, bytes.as_slice())
                .map_err(|e| NldsError::WriteError {
                    source: e,
                    path: Some(member.original_path.clone().into()),
                })?;
        }
        builder.finish().map_err(|e| NldsError::WriteError {
            source: e,
            path: Some(tarfile_path.clone().into()),
        })?;
    }

    let checksum = writer.checksum();
    let bytes = writer.into_inner();
    let tar_size = bytes.len() as u64;

    let handle = tape.create(&tarfile_path).await?;
    handle.write_at(0, &bytes).await?;

    Ok(ArchiveOutcome {
        aggregation_id,
        tarfile_path,
        checksum,
        tar_size,
        members: current,
    })
}

/// Read a previously written aggregation back off tape and restore each
/// member into the object store (spec §4.6 GET, the reverse of
/// [`put_bin`]). `expected_checksum` is the Adler-32 recorded against the
/// aggregation by [`crate::catalog::store::CatalogStore::update_tape`];
/// a mismatch is `checksum_mismatch` per spec §7.
pub async fn get_bin(
    store: Arc<dyn ObjectStoreClient>,
    tape: &dyn TapeClient,
    bucket: &str,
    tarfile_path: &str,
    tar_size: u64,
    expected_checksum: u32,
) -> Result<Vec<PathDetails>, NldsError> {
    let handle = tape.open(tarfile_path).await?;
    let bytes = handle.read_at(0, tar_size as usize).await?;

    let mut reader = Adler32Reader::new(&bytes);
    let mut verify_buf = Vec::new();
    reader.read_to_end(&mut verify_buf).map_err(|e| NldsError::ReadError {
        source: e,
        path: Some(tarfile_path.into()),
    })?;
    if reader.checksum() != expected_checksum {
        return Err(NldsError::ChecksumMismatch {
            expected: expected_checksum,
            actual: reader.checksum(),
        });
    }

    let mut archive = tar::Archive::new(verify_buf.as_slice());
    let mut restored = Vec::new();
    for entry in archive.entries().map_err(|e| NldsError::ReadError {
        source: e,
        path: Some(tarfile_path.into()),
    })? {
        let mut entry = entry.map_err(|e| NldsError::ReadError {
            source: e,
            path: Some(tarfile_path.into()),
        })?;
        let path = entry.path().map_err(|e| NldsError::ReadError {
            source: e,
            path: Some(tarfile_path.into()),
        })?.display().to_string();
        let mut data = Vec::new();
        entry.read_to_end(&mut data).map_err(|e| NldsError::ReadError {
            source: e,
            path: Some(path.clone().into()),
        })?;

        let object = path.rsplit('/').next().unwrap_or(&path).to_string();
        let size = data.len() as u64;
        store.put(bucket, &object, data).await?;

        let mut detail = PathDetails::new(path, crate::protocol::PathType::File, size);
        detail.object_name = Some(object);
        restored.push(detail);
    }

    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PathType;
    use crate::transfer::object_store::MockObjectStore;

    fn member(path: &str, size: usize) -> PathDetails {
        let mut d = PathDetails::new(path, PathType::File, size as u64);
        d.object_name = Some(path.trim_start_matches('/').replace('/', "_"));
        d
    }

    async fn seeded_store(members: &[PathDetails]) -> MockObjectStore {
        let store = MockObjectStore::new();
        for m in members {
            let object = object_name_for(m);
            store.put("nlds.txn1", &object, vec![7u8; m.size as usize]).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn put_then_get_round_trips_bin_members() {
        let members = vec![member("/data/a.nc", 10), member("/data/b.nc", 20)];
        let store: Arc<dyn ObjectStoreClient> = Arc::new(seeded_store(&members).await);
        let tape = MockTapeClient::new();

        let outcome = put_bin(
            Arc::clone(&store),
            &tape,
            "nlds.txn1",
            "agg",
            members.clone(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.members.len(), 2);

        let restored = get_bin(
            Arc::clone(&store),
            &tape,
            "nlds.txn1.restore",
            &outcome.tarfile_path,
            outcome.tar_size,
            outcome.checksum,
        )
        .await
        .unwrap();
        assert_eq!(restored.len(), 2);
    }

    #[tokio::test]
    async fn missing_member_is_dropped_and_id_regenerated() {
        let present = member("/data/a.nc", 10);
        let missing = member("/data/missing.nc", 5);
        let store = MockObjectStore::new();
        store
            .put("nlds.txn1", &object_name_for(&present), vec![1u8; 10])
            .await
            .unwrap();
        let store: Arc<dyn ObjectStoreClient> = Arc::new(store);
        let tape = MockTapeClient::new();

        let outcome = put_bin(
            store,
            &tape,
            "nlds.txn1",
            "agg",
            vec![present.clone(), missing],
        )
        .await
        .unwrap();

        assert_eq!(outcome.members.len(), 1);
        assert_eq!(outcome.aggregation_id, aggregator::aggregation_id(&[present]));
    }

    #[tokio::test]
    async fn all_members_failing_is_terminal() {
        let store: Arc<dyn ObjectStoreClient> = Arc::new(MockObjectStore::new());
        let tape = MockTapeClient::new();
        let result = put_bin(store, &tape, "nlds.txn1", "agg", vec![member("/data/a.nc", 10)]).await;
        assert!(matches!(result, Err(NldsError::RetriesExhausted { .. })));
    }

    #[tokio::test]
    async fn checksum_mismatch_on_get_is_rejected() {
        let members = vec![member("/data/a.nc", 10)];
        let store: Arc<dyn ObjectStoreClient> = Arc::new(seeded_store(&members).await);
        let tape = MockTapeClient::new();
        let outcome = put_bin(Arc::clone(&store), &tape, "nlds.txn1", "agg", members).await.unwrap();

        let result = get_bin(
            store,
            &tape,
            "nlds.txn1.restore",
            &outcome.tarfile_path,
            outcome.tar_size,
            outcome.checksum.wrapping_add(1),
        )
        .await;
        assert!(matches!(result, Err(NldsError::ChecksumMismatch { .. })));
    }
}
