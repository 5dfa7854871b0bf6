//! In-memory storage backend
//!
//! Simple storage for testing and development.

use crate::{ObjectStore, ObjectStoreError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// In-memory object store
///
/// `objects` is `None` while the bucket does not exist, which lets tests
/// exercise the lazy bucket creation path.
pub struct MemoryObjectStore {
    bucket: String,
    objects: RwLock<Option<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryObjectStore {
    /// Create a store whose bucket already exists
    pub fn new() -> Self {
        Self {
            bucket: "memory".to_string(),
            objects: RwLock::new(Some(BTreeMap::new())),
        }
    }

    /// Create a store whose bucket has not been created yet
    pub fn without_bucket(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: RwLock::new(None),
        }
    }

    /// Whether the bucket currently exists
    pub fn bucket_exists(&self) -> bool {
        self.objects
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    fn missing_bucket(&self) -> ObjectStoreError {
        ObjectStoreError::BucketNotFound(self.bucket.clone())
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let mut guard = self
            .objects
            .write()
            .map_err(|e| ObjectStoreError::Lock(format!("lock poisoned: {}", e)))?;
        let objects = guard.as_mut().ok_or_else(|| self.missing_bucket())?;
        objects.insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let guard = self
            .objects
            .read()
            .map_err(|e| ObjectStoreError::Lock(format!("lock poisoned: {}", e)))?;
        let objects = guard.as_ref().ok_or_else(|| self.missing_bucket())?;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut guard = self
            .objects
            .write()
            .map_err(|e| ObjectStoreError::Lock(format!("lock poisoned: {}", e)))?;
        let objects = guard.as_mut().ok_or_else(|| self.missing_bucket())?;
        objects.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let guard = self
            .objects
            .read()
            .map_err(|e| ObjectStoreError::Lock(format!("lock poisoned: {}", e)))?;
        let objects = guard.as_ref().ok_or_else(|| self.missing_bucket())?;
        Ok(objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn create_bucket(&self) -> Result<()> {
        let mut guard = self
            .objects
            .write()
            .map_err(|e| ObjectStoreError::Lock(format!("lock poisoned: {}", e)))?;
        if guard.is_none() {
            *guard = Some(BTreeMap::new());
        }
        Ok(())
    }
}
