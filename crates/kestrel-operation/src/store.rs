//! Durable operation persistence
//!
//! Operations live at `operations/{id}.json` as pretty-printed JSON. The same
//! store also carries arbitrary JSON documents for other components through
//! [`OperationStore::put_json`] and [`OperationStore::get_json`].

use crate::error::{OperationError, Result};
use crate::operation::{Operation, OperationType};
use kestrel_objstore::{ObjectStore, ObjectStoreError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Key prefix for operation documents
pub const OPERATIONS_PREFIX: &str = "operations/";

/// Persists operations and JSON documents in an object store
#[derive(Clone)]
pub struct OperationStore {
    objects: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for OperationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationStore")
            .field("bucket", &self.objects.bucket())
            .finish_non_exhaustive()
    }
}

impl OperationStore {
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self { objects }
    }

    /// Underlying object store
    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    fn operation_key(id: &str) -> String {
        format!("{}{}.json", OPERATIONS_PREFIX, id)
    }

    /// Write raw bytes, creating the bucket and retrying once if it is missing
    pub(crate) async fn put_bytes(&self, key: &str, data: Vec<u8>) -> Result<()> {
        match self.objects.put(key, data.clone()).await {
            Err(ObjectStoreError::BucketNotFound(bucket)) => {
                info!(bucket = %bucket, "Creating missing state bucket");
                self.objects.create_bucket().await?;
                self.objects.put(key, data).await?;
                Ok(())
            }
            other => Ok(other?),
        }
    }

    /// Read raw bytes; a missing bucket reads as a missing key
    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>> {
        match self.objects.get(key).await {
            Ok(data) => Ok(data),
            Err(err) if err.is_not_found() || err.is_bucket_not_found() => {
                Err(OperationError::NotFound(key.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Delete a key; absent keys and buckets are not errors
    pub(crate) async fn delete_key(&self, key: &str) -> Result<()> {
        match self.objects.delete(key).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() || err.is_bucket_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Store any serializable document under `key`
    pub async fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let data = serde_json::to_vec_pretty(value)?;
        self.put_bytes(key, data).await
    }

    /// Load a JSON document; `NotFound` if it was never written
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let data = self.get_bytes(key).await?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Persist an operation, overwriting any previous version
    pub async fn save(&self, op: &Operation) -> Result<()> {
        self.put_json(&Self::operation_key(op.id()), op).await?;
        debug!(
            operation = %op.id(),
            phase = %op.current_phase(),
            "Saved operation"
        );
        Ok(())
    }

    /// Load an operation by ID
    pub async fn load(&self, id: &str) -> Result<Operation> {
        let op: Operation = match self.get_json(&Self::operation_key(id)).await {
            Ok(op) => op,
            Err(err) if err.is_not_found() => {
                return Err(OperationError::NotFound(id.to_string()))
            }
            Err(err) => return Err(err),
        };
        op.validate()?;
        Ok(op)
    }

    /// Delete an operation. Deleting an unknown ID is a no-op.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.delete_key(&Self::operation_key(id)).await
    }

    /// All readable operations, most recently updated first
    ///
    /// Documents that cannot be read or decoded are skipped with a warning.
    pub async fn list(&self) -> Result<Vec<Operation>> {
        let keys = match self.objects.list(OPERATIONS_PREFIX).await {
            Ok(keys) => keys,
            Err(err) if err.is_bucket_not_found() => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut operations = Vec::new();
        for key in keys.iter().filter(|k| k.ends_with(".json")) {
            let op = match self.get_json::<Operation>(key).await {
                Ok(op) => op,
                Err(err) => {
                    warn!(key = %key, error = %err, "Skipping unreadable operation");
                    continue;
                }
            };
            if let Err(err) = op.validate() {
                warn!(key = %key, error = %err, "Skipping invalid operation");
                continue;
            }
            operations.push(op);
        }

        operations.sort_by(|a, b| b.updated_at().cmp(&a.updated_at()));
        Ok(operations)
    }

    /// Incomplete operations matching an optional type and cluster
    pub async fn find_incomplete(
        &self,
        operation_type: Option<&OperationType>,
        cluster: Option<&str>,
    ) -> Result<Vec<Operation>> {
        let cluster = cluster.filter(|c| !c.is_empty());
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|op| !op.is_complete())
            .filter(|op| operation_type.map_or(true, |t| op.operation_type() == t))
            .filter(|op| cluster.map_or(true, |c| op.cluster() == c))
            .collect())
    }

    /// The most recently updated incomplete operation, if any
    pub async fn check_resume(
        &self,
        operation_type: &OperationType,
        cluster: &str,
    ) -> Result<Option<Operation>> {
        let mut candidates = self.find_incomplete(Some(operation_type), Some(cluster)).await?;
        if candidates.is_empty() {
            return Ok(None);
        }
        if candidates.len() > 1 {
            warn!(
                kind = %operation_type,
                cluster = %cluster,
                count = candidates.len(),
                "Multiple incomplete operations found, resuming the newest"
            );
        }

        let op = candidates.remove(0);
        info!(
            operation = %op.id(),
            kind = %operation_type,
            cluster = %cluster,
            phase = op.resume_phase().unwrap_or_default(),
            "Found incomplete operation"
        );
        Ok(Some(op))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_objstore::MemoryObjectStore;
    use serde_json::json;

    fn memory_store() -> OperationStore {
        OperationStore::new(Arc::new(MemoryObjectStore::new()))
    }

    fn new_op(id: &str, kind: OperationType, cluster: &str) -> Operation {
        Operation::new(id, kind, cluster, ["init", "provision", "verify"]).unwrap()
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = memory_store();
        let mut op = new_op("op-1", OperationType::CreateCluster, "prod");
        op.complete_phase("init", Some(json!({"ok": true}))).unwrap();
        op.set_context("serverId", "srv-1");

        store.save(&op).await.unwrap();
        store.save(&op).await.unwrap();

        let loaded = store.load("op-1").await.unwrap();
        assert_eq!(loaded, op);

        let raw = store.objects().get("operations/op-1.json").await.unwrap();
        assert!(String::from_utf8(raw).unwrap().contains("\n  \"id\": \"op-1\""));
    }

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let store = memory_store();
        let err = store.load("op-missing").await.unwrap_err();
        assert!(matches!(err, OperationError::NotFound(ref id) if id == "op-missing"));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_never_created_bucket() {
        let store = OperationStore::new(Arc::new(MemoryObjectStore::without_bucket("state")));

        assert!(store.list().await.unwrap().is_empty());
        assert!(matches!(store.load("op-1").await, Err(OperationError::NotFound(_))));
        store.delete("op-1").await.unwrap();

        store
            .save(&new_op("op-1", OperationType::AddNode, "dev"))
            .await
            .unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = memory_store();
        store
            .save(&new_op("op-1", OperationType::AddNode, "dev"))
            .await
            .unwrap();
        store.delete("op-1").await.unwrap();
        store.delete("op-1").await.unwrap();
        assert!(matches!(store.load("op-1").await, Err(OperationError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_skips_garbage_and_orders_newest_first() {
        let store = memory_store();
        let older = new_op("op-old", OperationType::CreateCluster, "prod");
        store.save(&older).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let newer = new_op("op-new", OperationType::CreateCluster, "prod");
        store.save(&newer).await.unwrap();

        let objects = store.objects();
        objects
            .put("operations/broken.json", b"{not json".to_vec())
            .await
            .unwrap();
        objects
            .put("operations/notes.txt", b"ignored".to_vec())
            .await
            .unwrap();
        objects
            .put(
                "operations/mismatch.json",
                serde_json::to_vec(&json!({
                    "id": "mismatch",
                    "type": "add-node",
                    "cluster": "prod",
                    "createdAt": "2024-01-01T00:00:00Z",
                    "updatedAt": "2024-01-01T00:00:00Z",
                    "phaseOrder": ["init"],
                    "phases": {}
                }))
                .unwrap(),
            )
            .await
            .unwrap();

        let ids: Vec<_> = store
            .list()
            .await
            .unwrap()
            .iter()
            .map(|op| op.id().to_string())
            .collect();
        assert_eq!(ids, vec!["op-new", "op-old"]);
    }

    #[tokio::test]
    async fn test_documents_with_null_collections_are_listed() {
        let store = memory_store();
        let doc = json!({
            "id": "op-nil",
            "type": "add-node",
            "cluster": "production",
            "createdAt": "2024-05-01T10:00:00Z",
            "updatedAt": "2024-05-01T10:00:00Z",
            "currentPhase": "init",
            "phaseOrder": ["init", "verify"],
            "phases": {
                "init": { "status": "failed", "error": "timeout" },
                "verify": { "status": "pending" }
            },
            "context": { "nodeName": "production-worker-01" },
            "cleanup": null
        });
        store.put_json("operations/op-nil.json", &doc).await.unwrap();

        let op = store.load("op-nil").await.unwrap();
        assert!(op.cleanup_actions().is_empty());
        assert_eq!(store.list().await.unwrap().len(), 1);

        let incomplete = store
            .find_incomplete(Some(&OperationType::AddNode), Some("production"))
            .await
            .unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].resume_phase(), Some("init"));
    }

    #[tokio::test]
    async fn test_find_incomplete_filters() {
        let store = memory_store();
        store
            .save(&new_op("op-a", OperationType::CreateCluster, "prod"))
            .await
            .unwrap();
        store
            .save(&new_op("op-b", OperationType::AddNode, "prod"))
            .await
            .unwrap();
        store
            .save(&new_op("op-c", OperationType::CreateCluster, "staging"))
            .await
            .unwrap();

        let mut done = new_op("op-d", OperationType::CreateCluster, "prod");
        for phase in ["init", "provision", "verify"] {
            done.complete_phase(phase, None).unwrap();
        }
        store.save(&done).await.unwrap();

        let all = store.find_incomplete(None, None).await.unwrap();
        assert_eq!(all.len(), 3);

        let wildcard = store.find_incomplete(None, Some("")).await.unwrap();
        assert_eq!(wildcard.len(), 3);

        let prod_creates = store
            .find_incomplete(Some(&OperationType::CreateCluster), Some("prod"))
            .await
            .unwrap();
        assert_eq!(prod_creates.len(), 1);
        assert_eq!(prod_creates[0].id(), "op-a");
    }

    #[tokio::test]
    async fn test_check_resume() {
        let store = memory_store();
        assert!(store
            .check_resume(&OperationType::CreateCluster, "prod")
            .await
            .unwrap()
            .is_none());

        let mut op = new_op("op-1", OperationType::CreateCluster, "prod");
        op.complete_phase("init", None).unwrap();
        store.save(&op).await.unwrap();

        let found = store
            .check_resume(&OperationType::CreateCluster, "prod")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id(), "op-1");
        assert_eq!(found.resume_phase(), Some("provision"));
    }

    #[tokio::test]
    async fn test_json_documents() {
        let store = memory_store();
        assert!(store
            .get_json::<serde_json::Value>("clusters/prod/extra.json")
            .await
            .unwrap_err()
            .is_not_found());

        store
            .put_json("clusters/prod/extra.json", &json!({"k": "v"}))
            .await
            .unwrap();
        let value: serde_json::Value = store.get_json("clusters/prod/extra.json").await.unwrap();
        assert_eq!(value, json!({"k": "v"}));
    }

    #[tokio::test]
    async fn test_crash_and_resume_from_store() {
        let store = memory_store();
        let id = {
            let mut op = new_op(&Operation::generate_id(), OperationType::CreateCluster, "prod");
            store.save(&op).await.unwrap();
            op.start_phase("init").unwrap();
            store.save(&op).await.unwrap();
            op.complete_phase("init", None).unwrap();
            store.save(&op).await.unwrap();
            op.id().to_string()
        };

        let reloaded = store.load(&id).await.unwrap();
        assert_eq!(reloaded.resume_phase(), Some("provision"));
    }
}
