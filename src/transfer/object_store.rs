//! Object-store client contract (spec §6): an S3-compatible API, object
//! path convention `<bucket>:<object>` with `bucket = nlds.<transaction-uuid>`,
//! plus an idempotent bucket-policy manager that grants the owning
//! group read access on first write.
//!
//! This crate specifies the interface, not the driver's internals (spec
//! §1 Non-goals): [`ObjectStoreClient`] is implemented for real against a
//! minio/S3 SDK in a deployment, and by [`MockObjectStore`] here for
//! deterministic tests.

use crate::error::NldsError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Build the bucket name for a transaction, per spec §6.
pub fn bucket_for(transaction_id: &uuid::Uuid) -> String {
    format!("nlds.{transaction_id}")
}

#[async_trait]
pub trait ObjectStoreClient: Send + Sync + 'static {
    async fn put(&self, bucket: &str, object: &str, data: Vec<u8>) -> Result<(), NldsError>;
    async fn get(&self, bucket: &str, object: &str) -> Result<Vec<u8>, NldsError>;
    async fn delete(&self, bucket: &str, object: &str) -> Result<(), NldsError>;
    async fn exists(&self, bucket: &str, object: &str) -> Result<bool, NldsError>;
    async fn size(&self, bucket: &str, object: &str) -> Result<u64, NldsError>;

    /// Grant `group` read access on `bucket`. Applied on first write;
    /// re-applying MUST be idempotent (spec §6, testable property 7).
    async fn ensure_bucket_policy(&self, bucket: &str, group: &str) -> Result<(), NldsError>;
}

/// Deterministic in-memory object store used by tests: no network, no
/// real bucket policies, but the same idempotence and error semantics.
#[derive(Default)]
pub struct MockObjectStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    policies: Mutex<HashMap<String, HashSet<String>>>,
    pub policy_applications: Mutex<u32>,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStoreClient for MockObjectStore {
    async fn put(&self, bucket: &str, object: &str, data: Vec<u8>) -> Result<(), NldsError> {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), object.to_string()), data);
        Ok(())
    }

    async fn get(&self, bucket: &str, object: &str) -> Result<Vec<u8>, NldsError> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), object.to_string()))
            .cloned()
            .ok_or_else(|| NldsError::ObjectMissing {
                object: object.to_string(),
            })
    }

    async fn delete(&self, bucket: &str, object: &str) -> Result<(), NldsError> {
        self.objects
            .lock()
            .unwrap()
            .remove(&(bucket.to_string(), object.to_string()));
        Ok(())
    }

    async fn exists(&self, bucket: &str, object: &str) -> Result<bool, NldsError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .contains_key(&(bucket.to_string(), object.to_string())))
    }

    async fn size(&self, bucket: &str, object: &str) -> Result<u64, NldsError> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), object.to_string()))
            .map(|v| v.len() as u64)
            .ok_or_else(|| NldsError::ObjectMissing {
                object: object.to_string(),
            })
    }

    async fn ensure_bucket_policy(&self, bucket: &str, group: &str) -> Result<(), NldsError> {
        let mut applications = self.policy_applications.lock().unwrap();
        *applications += 1;
        self.policies
            .lock()
            .unwrap()
            .entry(bucket.to_string())
            .or_default()
            .insert(group.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bucket_policy_application_is_idempotent() {
        let store = MockObjectStore::new();
        store.ensure_bucket_policy("nlds.txn1", "gws_test").await.unwrap();
        store.ensure_bucket_policy("nlds.txn1", "gws_test").await.unwrap();

        let policies = store.policies.lock().unwrap();
        // Effective policy (the set of groups granted access) is
        // unchanged by re-application, even though it was called twice.
        assert_eq!(policies.get("nlds.txn1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_on_missing_object_is_object_missing_error() {
        let store = MockObjectStore::new();
        let result = store.get("nlds.txn1", "missing").await;
        assert!(matches!(result, Err(NldsError::ObjectMissing { .. })));
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = MockObjectStore::new();
        store.put("nlds.txn1", "a.nc", vec![1, 2, 3]).await.unwrap();
        let data = store.get("nlds.txn1", "a.nc").await.unwrap();
        assert_eq!(data, vec![1, 2, 3]);
        assert_eq!(store.size("nlds.txn1", "a.nc").await.unwrap(), 3);
    }
}
