//! Object store configuration

use crate::{MemoryObjectStore, ObjectStore, RedbObjectStore, Result, S3Config, S3ObjectStore};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Default bucket used by local backends
pub const DEFAULT_BUCKET: &str = "kestrel-state";

fn default_bucket() -> String {
    DEFAULT_BUCKET.to_string()
}

/// Storage configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum ObjectStoreConfig {
    /// In-memory storage (for testing)
    #[default]
    Memory,

    /// ReDB local database
    Redb {
        path: PathBuf,
        #[serde(default = "default_bucket")]
        bucket: String,
    },

    /// S3-compatible bucket
    S3(S3Config),
}

/// Create a store from configuration
pub async fn create_object_store(config: &ObjectStoreConfig) -> Result<Arc<dyn ObjectStore>> {
    match config {
        ObjectStoreConfig::Memory => Ok(Arc::new(MemoryObjectStore::new())),
        ObjectStoreConfig::Redb { path, bucket } => {
            let store = RedbObjectStore::open(path, bucket.clone())?;
            Ok(Arc::new(store))
        }
        ObjectStoreConfig::S3(s3) => Ok(Arc::new(S3ObjectStore::new(s3)?)),
    }
}
