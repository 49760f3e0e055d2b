//! Process-local backends for local runs without cloud credentials.

use crate::blob_store::BlobStore;
use crate::error::{CollectorError, Result};
use crate::metadata_store::{DocumentStore, NewSubmission, SubmissionRecord};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Blob store keeping objects in a map
#[derive(Default)]
pub struct InMemoryBlobStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    public: Mutex<HashSet<String>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().get(key).cloned()
    }

    pub fn is_public(&self, key: &str) -> bool {
        self.public.lock().contains(key)
    }

    /// Resolve a URL produced by `public_url` back to the object, if public
    pub fn resolve_url(&self, url: &str) -> Option<StoredObject> {
        let key = url.strip_prefix("memory://")?;
        if !self.is_public(key) {
            return None;
        }
        self.get(key)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn put_object(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        self.objects.lock().insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn make_public(&self, key: &str) -> Result<()> {
        if !self.objects.lock().contains_key(key) {
            return Err(CollectorError::Upload(format!("no such object: {}", key)));
        }
        self.public.lock().insert(key.to_string());
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("memory://{}", key)
    }
}

/// Document store keeping submissions in insertion order
#[derive(Default)]
pub struct InMemoryDocumentStore {
    records: Mutex<Vec<SubmissionRecord>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SubmissionRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn add_submission(&self, submission: NewSubmission) -> Result<SubmissionRecord> {
        let record = submission.into_record(Uuid::new_v4());
        self.records.lock().push(record.clone());
        Ok(record)
    }

    async fn count_submissions(&self) -> Result<i64> {
        Ok(self.records.lock().len() as i64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
