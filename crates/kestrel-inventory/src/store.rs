//! Node inventory persistence at `clusters/{cluster}/nodes.json`

use crate::error::{InventoryError, Result};
use crate::state::{NodeState, NodeStatus, NodesState};
use chrono::Utc;
use kestrel_operation::OperationStore;
use tracing::{debug, info};

/// Reads and writes one cluster's node inventory
#[derive(Debug, Clone)]
pub struct NodeStore {
    store: OperationStore,
    cluster: String,
}

impl NodeStore {
    pub fn new(store: OperationStore, cluster: impl Into<String>) -> Self {
        Self {
            store,
            cluster: cluster.into(),
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    fn key(&self) -> String {
        format!("clusters/{}/nodes.json", self.cluster)
    }

    /// Current inventory, or an empty one if none was ever saved
    pub async fn load(&self) -> Result<NodesState> {
        match self.store.get_json(&self.key()).await {
            Ok(state) => Ok(state),
            Err(err) if err.is_not_found() => Ok(NodesState::new(self.cluster.clone())),
            Err(err) => Err(err.into()),
        }
    }

    /// Overwrite the whole inventory document
    pub async fn save(&self, state: &mut NodesState) -> Result<()> {
        state.updated_at = Some(Utc::now());
        self.store.put_json(&self.key(), state).await?;
        debug!(cluster = %self.cluster, nodes = state.nodes.len(), "Saved node inventory");
        Ok(())
    }

    /// Merge a partial node record into the inventory and persist it
    pub async fn upsert(&self, mut patch: NodeState) -> Result<NodeState> {
        let name = patch.name.trim().to_string();
        if name.is_empty() {
            return Err(InventoryError::MissingName);
        }
        patch.name = name.clone();

        let mut state = self.load().await?;
        state.upsert_node(patch);
        self.save(&mut state).await?;

        // upsert_node always leaves a record behind for `name`
        let node = state.get(&name).cloned().unwrap_or_else(|| NodeState::new(name));
        Ok(node)
    }

    /// Change only the status of a node, creating the record if needed
    pub async fn mark_status(&self, name: &str, status: NodeStatus) -> Result<NodeState> {
        let node = self.upsert(NodeState::new(name).with_status(status)).await?;
        info!(cluster = %self.cluster, node = %name, status = %status, "Updated node status");
        Ok(node)
    }

    pub async fn get(&self, name: &str) -> Result<Option<NodeState>> {
        Ok(self.load().await?.get(name).cloned())
    }
}
