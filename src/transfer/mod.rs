//! Transfer workers (spec §4.4): move bytes between disk and the object
//! store in fixed-size chunks, computing an Adler-32 checksum as the
//! data streams through, and verifying it on read-back.
//!
//! Grounded in `nlds_processors/archiver/adler32file.py` (a chunked
//! read/write wrapper that updates a running Adler-32 on every chunk)
//! and `nlds_processors/transferers/` (PUT streams disk -> object store,
//! GET streams object store -> disk, DEL removes the object).

pub mod object_store;

pub use object_store::{bucket_for, MockObjectStore, ObjectStoreClient};

use crate::error::NldsError;
use crate::protocol::envelope::PathDetails;
use adler::Adler32;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Outcome of transferring a single file, recorded against its
/// `PathDetails` in the caller's filelist split (spec §7).
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub size: u64,
    pub checksum: u32,
}

/// Stream `path` from disk to `bucket:object` in `chunk_size` chunks,
/// returning the size and running Adler-32 checksum (spec §4.4 PUT).
pub async fn put_file(
    store: &dyn ObjectStoreClient,
    path: &Path,
    bucket: &str,
    object: &str,
    chunk_size: usize,
) -> Result<TransferOutcome, NldsError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|source| NldsError::ReadError {
            source,
            path: Some(path.to_path_buf()),
        })?;

    let mut checksum = Adler32::new();
    let mut buf = vec![0u8; chunk_size];
    let mut body = Vec::new();
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|source| NldsError::ReadError {
                source,
                path: Some(path.to_path_buf()),
            })?;
        if n == 0 {
            break;
        }
        checksum.write_slice(&buf[..n]);
        body.extend_from_slice(&buf[..n]);
    }

    let size = body.len() as u64;
    store.put(bucket, object, body).await?;

    Ok(TransferOutcome {
        size,
        checksum: checksum.checksum(),
    })
}

/// Stream `bucket:object` from the object store to `path` in
/// `chunk_size` chunks, verifying the Adler-32 checksum computed while
/// writing matches `expected_checksum` (spec §4.4 GET, checksum_mismatch
/// failure reason).
pub async fn get_file(
    store: &dyn ObjectStoreClient,
    path: &Path,
    bucket: &str,
    object: &str,
    expected_checksum: u32,
    chunk_size: usize,
) -> Result<TransferOutcome, NldsError> {
    let data = store.get(bucket, object).await?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| NldsError::WriteError {
                source,
                path: Some(parent.to_path_buf()),
            })?;
    }

    let mut file =
        tokio::fs::File::create(path)
            .await
            .map_err(|source| NldsError::WriteError {
                source,
                path: Some(path.to_path_buf()),
            })?;

    let mut checksum = Adler32::new();
    for chunk in data.chunks(chunk_size) {
        checksum.write_slice(chunk);
        file.write_all(chunk)
            .await
            .map_err(|source| NldsError::WriteError {
                source,
                path: Some(path.to_path_buf()),
            })?;
    }
    file.flush().await.map_err(|source| NldsError::WriteError {
        source,
        path: Some(path.to_path_buf()),
    })?;

    let actual = checksum.checksum();
    if actual != expected_checksum {
        return Err(NldsError::ChecksumMismatch {
            expected: expected_checksum,
            actual,
        });
    }

    Ok(TransferOutcome {
        size: data.len() as u64,
        checksum: actual,
    })
}

/// Remove `bucket:object`, used when a PUT transaction is torn down
/// (spec §4.4 DEL) or when a catalog delete removes its last location.
pub async fn delete_object(
    store: &dyn ObjectStoreClient,
    bucket: &str,
    object: &str,
) -> Result<(), NldsError> {
    store.delete(bucket, object).await
}

/// Object key used within a transaction's bucket: prefers an
/// already-assigned `object_name` (set once on first PUT), falling back
/// to the file's base name so GET/DEL can address the same object.
pub fn object_name_for(detail: &PathDetails) -> String {
    detail.object_name.clone().unwrap_or_else(|| {
        Path::new(&detail.original_path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| detail.original_path.clone())
    })
}

/// Transfer every file in a filelist, applying the object-store bucket
/// policy once up front (spec §6, idempotent re-application), and
/// collecting per-file failures instead of aborting the whole batch
/// (spec §7: failures never take down a sibling sub-transaction).
pub async fn put_filelist(
    store: Arc<dyn ObjectStoreClient>,
    files: &[PathDetails],
    bucket: &str,
    group: &str,
    chunk_size: usize,
) -> (Vec<(PathDetails, TransferOutcome)>, Vec<(PathDetails, String)>) {
    let mut ok = Vec::new();
    let mut failed = Vec::new();

    if store.ensure_bucket_policy(bucket, group).await.is_err() {
        return (
            ok,
            files
                .iter()
                .cloned()
                .map(|f| (f, "bucket_policy_failed".to_string()))
                .collect(),
        );
    }

    for detail in files {
        let object = object_name_for(detail);
        let path = Path::new(&detail.original_path);
        match put_file(store.as_ref(), path, bucket, &object, chunk_size).await {
            Ok(outcome) => ok.push((detail.clone(), outcome)),
            Err(err) => failed.push((detail.clone(), err.failure_reason().to_string())),
        }
    }

    (ok, failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::envelope::PathType;
    use tempfile::tempdir;

    fn detail(path: std::path::PathBuf) -> PathDetails {
        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        PathDetails::new(path.display().to_string(), PathType::File, size)
    }

    #[tokio::test]
    async fn put_then_get_round_trips_with_matching_checksum() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.dat");
        tokio::fs::write(&src, b"hello world, this is test data").await.unwrap();

        let store = MockObjectStore::new();
        let outcome = put_file(&store, &src, "nlds.txn1", "a.dat", 8).await.unwrap();

        let dst = dir.path().join("out").join("a.dat");
        let get_outcome = get_file(&store, &dst, "nlds.txn1", "a.dat", outcome.checksum, 8)
            .await
            .unwrap();

        assert_eq!(get_outcome.size, outcome.size);
        let roundtrip = tokio::fs::read(&dst).await.unwrap();
        assert_eq!(roundtrip, b"hello world, this is test data");
    }

    #[tokio::test]
    async fn get_with_wrong_checksum_is_rejected() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.dat");
        tokio::fs::write(&src, b"some bytes").await.unwrap();

        let store = MockObjectStore::new();
        put_file(&store, &src, "nlds.txn1", "a.dat", 4).await.unwrap();

        let dst = dir.path().join("out.dat");
        let result = get_file(&store, &dst, "nlds.txn1", "a.dat", 0xDEAD_BEEF, 4).await;
        assert!(matches!(result, Err(NldsError::ChecksumMismatch { .. })));
    }

    #[tokio::test]
    async fn put_filelist_separates_ok_from_failed() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.dat");
        tokio::fs::write(&good, b"data").await.unwrap();
        let missing = dir.path().join("missing.dat");

        let store: Arc<dyn ObjectStoreClient> = Arc::new(MockObjectStore::new());
        let files = vec![detail(good), detail(missing)];

        let (ok, failed) = put_filelist(store, &files, "nlds.txn1", "gws_test", 4096).await;
        assert_eq!(ok.len(), 1);
        assert_eq!(failed.len(), 1);
    }
}
