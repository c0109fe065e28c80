//! Tape client contract (spec §6): a positional file-like interface
//! `read(offset,size)` / `write(bytes,offset,size)` / `seek(pos)` /
//! `tell()`, returning a `(status, payload)` pair where a non-zero status
//! raises an I/O error. This crate specifies the interface, not the XRootD
//! (or equivalent) driver's internals (spec §1 Non-goals).

use crate::error::NldsError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A positional tape write/read target, opened at one tarfile path.
#[async_trait]
pub trait TapeFile: Send + Sync {
    async fn read_at(&self, offset: u64, size: usize) -> Result<Vec<u8>, NldsError>;
    async fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<usize, NldsError>;
}

/// Opens tarfile paths on the tape library for writing (archive-put) or
/// reading (archive-get).
#[async_trait]
pub trait TapeClient: Send + Sync + 'static {
    async fn create(&self, tarfile_path: &str) -> Result<Box<dyn TapeFile>, NldsError>;
    async fn open(&self, tarfile_path: &str) -> Result<Box<dyn TapeFile>, NldsError>;
}

/// In-memory stand-in for the tape library: a deterministic double over a
/// `Vec<u8>` per tarfile path, exercising the same positional contract.
pub struct MockTapeClient {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MockTapeClient {
    pub fn new() -> Self {
        Self {
            files: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for MockTapeClient {
    fn default() -> Self {
        Self::new()
    }
}

struct MockTapeFile {
    path: String,
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

#[async_trait]
impl TapeFile for MockTapeFile {
    async fn read_at(&self, offset: u64, size: usize) -> Result<Vec<u8>, NldsError> {
        let files = self.files.lock().unwrap();
        let data = files.get(&self.path).ok_or_else(|| NldsError::NotFound {
            path: self.path.clone().into(),
        })?;
        let start = offset as usize;
        if start >= data.len() {
            return Ok(Vec::new());
        }
        let end = (start + size).min(data.len());
        Ok(data[start..end].to_vec())
    }

    async fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<usize, NldsError> {
        let mut files = self.files.lock().unwrap();
        let data = files.entry(self.path.clone()).or_default();
        let start = offset as usize;
        if data.len() < start + bytes.len() {
            data.resize(start + bytes.len(), 0);
        }
        data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(bytes.len())
    }
}

#[async_trait]
impl TapeClient for MockTapeClient {
    async fn create(&self, tarfile_path: &str) -> Result<Box<dyn TapeFile>, NldsError> {
        self.files.lock().unwrap().insert(tarfile_path.to_string(), Vec::new());
        Ok(Box::new(MockTapeFile {
            path: tarfile_path.to_string(),
            files: Arc::clone(&self.files),
        }))
    }

    async fn open(&self, tarfile_path: &str) -> Result<Box<dyn TapeFile>, NldsError> {
        if !self.files.lock().unwrap().contains_key(tarfile_path) {
            return Err(NldsError::NotFound {
                path: tarfile_path.into(),
            });
        }
        Ok(Box::new(MockTapeFile {
            path: tarfile_path.to_string(),
            files: Arc::clone(&self.files),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_back_at_offset() {
        let client = MockTapeClient::new();
        let file = client.create("agg1.tar").await.unwrap();
        file.write_at(0, b"hello").await.unwrap();
        file.write_at(5, b" world").await.unwrap();

        let read = file.read_at(0, 11).await.unwrap();
        assert_eq!(read, b"hello world");
    }

    #[tokio::test]
    async fn open_missing_tarfile_is_not_found() {
        let client = MockTapeClient::new();
        assert!(client.open("missing.tar").await.is_err());
    }
}
