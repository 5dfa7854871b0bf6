//! Kestrel Object Store
//!
//! Durable key/value blob storage used as the persistence substrate for
//! operations, node inventories and leases.
//!
//! # Backends
//!
//! - `MemoryObjectStore` - In-memory storage for testing
//! - `RedbObjectStore` - Local embedded database using ReDB
//! - `S3ObjectStore` - Any S3-compatible bucket (Scaleway by default)
//!
//! Every backend has a single *bucket*. A bucket that does not exist yet is
//! reported as [`ObjectStoreError::BucketNotFound`] so callers can create it
//! lazily with [`ObjectStore::create_bucket`].
//!
//! # Example
//!
//! ```ignore
//! use kestrel_objstore::{create_object_store, ObjectStoreConfig};
//!
//! let store = create_object_store(&ObjectStoreConfig::Memory).await?;
//! store.put("operations/op-1.json", b"{}".to_vec()).await?;
//! let keys = store.list("operations/").await?;
//! ```

pub mod config;
pub mod error;
pub mod memory;
pub mod redb_store;
pub mod s3;

pub use config::*;
pub use error::*;
pub use memory::MemoryObjectStore;
pub use redb_store::RedbObjectStore;
pub use s3::{S3Config, S3ObjectStore};

use async_trait::async_trait;

/// Storage backend trait for blob objects
///
/// The trait is object-safe and can be used with `Arc<dyn ObjectStore>`.
/// Implementations never create their bucket implicitly; writes against a
/// missing bucket fail with `BucketNotFound`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Name of the bucket (container) this store writes into
    fn bucket(&self) -> &str;

    /// Store an object, overwriting any previous value
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()>;

    /// Fetch an object
    ///
    /// Returns `NotFound` if the key was never written.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Delete an object. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List all keys starting with `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Create the bucket. Succeeds if it already exists.
    async fn create_bucket(&self) -> Result<()>;
}
