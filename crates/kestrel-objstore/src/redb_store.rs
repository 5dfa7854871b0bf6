//! ReDB storage backend
//!
//! Local embedded database for standalone deployments. Each bucket is one
//! ReDB table mapping object key to raw bytes:
//!
//! ```text
//! <bucket> : key (string) -> object (bytes)
//! ```

use crate::{ObjectStore, ObjectStoreError, Result};
use async_trait::async_trait;
use redb::{
    Database, ReadableDatabase, ReadableTable, TableDefinition, TableError, TableHandle,
    WriteTransaction,
};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

fn bucket_table(bucket: &str) -> TableDefinition<'_, &'static str, &'static [u8]> {
    TableDefinition::new(bucket)
}

fn bucket_exists(txn: &WriteTransaction, bucket: &str) -> Result<bool> {
    let mut tables = txn
        .list_tables()
        .map_err(|e| ObjectStoreError::Database(format!("failed to list tables: {}", e)))?;
    Ok(tables.any(|table| table.name() == bucket))
}

/// ReDB object store
pub struct RedbObjectStore {
    db: Arc<Database>,
    bucket: String,
}

impl RedbObjectStore {
    /// Open or create a ReDB database at the given path
    ///
    /// The bucket table is not created here; see [`ObjectStore::create_bucket`].
    pub fn open(path: impl AsRef<Path>, bucket: impl Into<String>) -> Result<Self> {
        let bucket = bucket.into();
        if bucket.trim().is_empty() {
            return Err(ObjectStoreError::InvalidConfig(
                "bucket name is required".to_string(),
            ));
        }

        let db = Database::create(path)
            .map_err(|e| ObjectStoreError::Database(format!("failed to open database: {}", e)))?;

        Ok(Self {
            db: Arc::new(db),
            bucket,
        })
    }
}

#[async_trait]
impl ObjectStore for RedbObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let db = Arc::clone(&self.db);
        let bucket = self.bucket.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || {
            let write_txn = db
                .begin_write()
                .map_err(|e| ObjectStoreError::Database(format!("failed to begin write: {}", e)))?;

            if !bucket_exists(&write_txn, &bucket)? {
                return Err(ObjectStoreError::BucketNotFound(bucket));
            }

            {
                let mut table = write_txn
                    .open_table(bucket_table(&bucket))
                    .map_err(|e| ObjectStoreError::Database(format!("failed to open table: {}", e)))?;
                table
                    .insert(key.as_str(), data.as_slice())
                    .map_err(|e| ObjectStoreError::Database(format!("insert failed: {}", e)))?;
            }

            write_txn
                .commit()
                .map_err(|e| ObjectStoreError::Database(format!("commit failed: {}", e)))?;
            debug!(bucket = %bucket, key = %key, "object written");
            Ok(())
        })
        .await
        .map_err(|e| ObjectStoreError::Database(format!("Task join error: {}", e)))?
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let db = Arc::clone(&self.db);
        let bucket = self.bucket.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || {
            let read_txn = db
                .begin_read()
                .map_err(|e| ObjectStoreError::Database(format!("failed to begin read: {}", e)))?;

            let table = match read_txn.open_table(bucket_table(&bucket)) {
                Ok(table) => table,
                Err(TableError::TableDoesNotExist(_)) => {
                    return Err(ObjectStoreError::BucketNotFound(bucket));
                }
                Err(e) => {
                    return Err(ObjectStoreError::Database(format!("failed to open table: {}", e)))
                }
            };

            match table.get(key.as_str()) {
                Ok(Some(value)) => Ok(value.value().to_vec()),
                Ok(None) => Err(ObjectStoreError::NotFound(key)),
                Err(e) => Err(ObjectStoreError::Database(format!("get failed: {}", e))),
            }
        })
        .await
        .map_err(|e| ObjectStoreError::Database(format!("Task join error: {}", e)))?
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let db = Arc::clone(&self.db);
        let bucket = self.bucket.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || {
            let write_txn = db
                .begin_write()
                .map_err(|e| ObjectStoreError::Database(format!("failed to begin write: {}", e)))?;

            if !bucket_exists(&write_txn, &bucket)? {
                return Err(ObjectStoreError::BucketNotFound(bucket));
            }

            {
                let mut table = write_txn
                    .open_table(bucket_table(&bucket))
                    .map_err(|e| ObjectStoreError::Database(format!("failed to open table: {}", e)))?;
                table
                    .remove(key.as_str())
                    .map_err(|e| ObjectStoreError::Database(format!("remove failed: {}", e)))?;
            }

            write_txn
                .commit()
                .map_err(|e| ObjectStoreError::Database(format!("commit failed: {}", e)))?;
            Ok(())
        })
        .await
        .map_err(|e| ObjectStoreError::Database(format!("Task join error: {}", e)))?
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let db = Arc::clone(&self.db);
        let bucket = self.bucket.clone();
        let prefix = prefix.to_string();

        tokio::task::spawn_blocking(move || {
            let read_txn = db
                .begin_read()
                .map_err(|e| ObjectStoreError::Database(format!("failed to begin read: {}", e)))?;

            let table = match read_txn.open_table(bucket_table(&bucket)) {
                Ok(table) => table,
                Err(TableError::TableDoesNotExist(_)) => {
                    return Err(ObjectStoreError::BucketNotFound(bucket));
                }
                Err(e) => {
                    return Err(ObjectStoreError::Database(format!("failed to open table: {}", e)))
                }
            };

            let mut keys = Vec::new();
            for entry in table
                .iter()
                .map_err(|e| ObjectStoreError::Database(format!("iter failed: {}", e)))?
            {
                let (key, _) = entry
                    .map_err(|e| ObjectStoreError::Database(format!("entry read failed: {}", e)))?;
                let key = key.value();
                if key.starts_with(prefix.as_str()) {
                    keys.push(key.to_string());
                }
            }

            Ok(keys)
        })
        .await
        .map_err(|e| ObjectStoreError::Database(format!("Task join error: {}", e)))?
    }

    async fn create_bucket(&self) -> Result<()> {
        let db = Arc::clone(&self.db);
        let bucket = self.bucket.clone();

        tokio::task::spawn_blocking(move || {
            let write_txn = db
                .begin_write()
                .map_err(|e| ObjectStoreError::Database(format!("failed to begin write: {}", e)))?;
            write_txn
                .open_table(bucket_table(&bucket))
                .map_err(|e| ObjectStoreError::Database(format!("failed to create table: {}", e)))?;
            write_txn
                .commit()
                .map_err(|e| ObjectStoreError::Database(format!("commit failed: {}", e)))?;
            debug!(bucket = %bucket, "bucket created");
            Ok(())
        })
        .await
        .map_err(|e| ObjectStoreError::Database(format!("Task join error: {}", e)))?
    }
}
