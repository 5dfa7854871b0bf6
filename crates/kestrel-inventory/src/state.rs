//! Node inventory documents

use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, IntoDeserializer};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Role a node plays in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    #[serde(alias = "control-plane")]
    ControlPlane,
    Worker,
}

impl NodeRole {
    /// Parse a role name as written in node pool configuration
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "controlplane" | "control-plane" => Some(NodeRole::ControlPlane),
            "worker" => Some(NodeRole::Worker),
            _ => None,
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::ControlPlane => write!(f, "controlplane"),
            NodeRole::Worker => write!(f, "worker"),
        }
    }
}

/// Lifecycle status of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Provisioning,
    Ready,
    Failed,
    Deleted,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Provisioning => write!(f, "provisioning"),
            NodeStatus::Ready => write!(f, "ready"),
            NodeStatus::Failed => write!(f, "failed"),
            NodeStatus::Deleted => write!(f, "deleted"),
        }
    }
}

/// Tracked identity of one machine
///
/// Also used as a merge patch: empty strings and `None` mean "leave as is".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeState {
    pub name: String,

    #[serde(default, deserialize_with = "empty_as_none")]
    pub role: Option<NodeRole>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub public_ip: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub private_ip: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pool: String,

    #[serde(default, deserialize_with = "empty_as_none")]
    pub status: Option<NodeStatus>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl NodeState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_role(mut self, role: NodeRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_public_ip(mut self, ip: impl Into<String>) -> Self {
        self.public_ip = ip.into();
        self
    }

    pub fn with_private_ip(mut self, ip: impl Into<String>) -> Self {
        self.private_ip = ip.into();
        self
    }

    pub fn with_server_id(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = server_id.into();
        self
    }

    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = pool.into();
        self
    }

    pub fn with_status(mut self, status: NodeStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Copy every set field of `patch` onto this record
    fn merge(&mut self, patch: NodeState, now: DateTime<Utc>) {
        fn take(field: &mut String, value: String) {
            if !value.is_empty() {
                *field = value;
            }
        }

        take(&mut self.public_ip, patch.public_ip);
        take(&mut self.private_ip, patch.private_ip);
        take(&mut self.server_id, patch.server_id);
        take(&mut self.pool, patch.pool);
        if patch.role.is_some() {
            self.role = patch.role;
        }
        if patch.status.is_some() {
            self.status = patch.status;
        }
        if patch.created_at.is_some() {
            self.created_at = patch.created_at;
        }
        if self.created_at.is_none() {
            self.created_at = Some(now);
        }
        self.updated_at = Some(now);
    }
}

/// Node inventory of one cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodesState {
    pub environment: String,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub nodes: Vec<NodeState>,
}

/// Older writers store an unset role or status as `""`
fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(value) if !value.trim().is_empty() => {
            T::deserialize(value.trim().into_deserializer()).map(Some)
        }
        _ => Ok(None),
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<NodeState>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<NodeState>>::deserialize(deserializer)?.unwrap_or_default())
}

impl NodesState {
    /// Empty inventory for a cluster
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            updated_at: None,
            nodes: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&NodeState> {
        self.nodes.iter().find(|node| node.name == name)
    }

    /// Merge `patch` into the node of the same name, appending it if new
    ///
    /// `created_at` is kept from the existing record unless the patch carries
    /// one, and filled with the current time on creation.
    pub fn upsert_node(&mut self, mut patch: NodeState) {
        let now = Utc::now();
        patch.name = patch.name.trim().to_string();

        if let Some(existing) = self.nodes.iter_mut().find(|n| n.name == patch.name) {
            existing.merge(patch, now);
            return;
        }

        let mut node = NodeState::new(patch.name.clone());
        node.merge(patch, now);
        self.nodes.push(node);
    }

    /// Nodes not marked deleted
    pub fn active_nodes(&self) -> impl Iterator<Item = &NodeState> {
        self.nodes
            .iter()
            .filter(|node| node.status != Some(NodeStatus::Deleted))
    }

    /// First node of `role`, in insertion order, that can still be reached
    ///
    /// Deleted and failed nodes are skipped, as are nodes with neither a
    /// public nor a private IP.
    pub fn first_active_by_role(&self, role: NodeRole) -> Option<&NodeState> {
        self.nodes.iter().find(|node| {
            node.role == Some(role)
                && !matches!(node.status, Some(NodeStatus::Deleted | NodeStatus::Failed))
                && !(node.public_ip.trim().is_empty() && node.private_ip.trim().is_empty())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_upsert_creates_node() {
        let mut state = NodesState::new("prod");
        state.upsert_node(
            NodeState::new("cp-1")
                .with_role(NodeRole::ControlPlane)
                .with_status(NodeStatus::Provisioning),
        );

        let node = state.get("cp-1").unwrap();
        assert_eq!(node.role, Some(NodeRole::ControlPlane));
        assert_eq!(node.status, Some(NodeStatus::Provisioning));
        assert!(node.created_at.is_some());
        assert_eq!(node.created_at, node.updated_at);
    }

    #[test]
    fn test_upsert_merges_only_set_fields() {
        let mut state = NodesState::new("prod");
        state.upsert_node(
            NodeState::new("cp-1")
                .with_server_id("srv-1")
                .with_pool("control-plane")
                .with_status(NodeStatus::Provisioning),
        );
        let created_at = state.get("cp-1").unwrap().created_at;

        state.upsert_node(NodeState::new("cp-1").with_public_ip("1.2.3.4"));

        let node = state.get("cp-1").unwrap();
        assert_eq!(node.server_id, "srv-1");
        assert_eq!(node.pool, "control-plane");
        assert_eq!(node.public_ip, "1.2.3.4");
        assert_eq!(node.status, Some(NodeStatus::Provisioning));
        assert_eq!(node.created_at, created_at);
        assert_eq!(state.nodes.len(), 1);
    }

    #[test]
    fn test_patch_created_at_wins() {
        let imported = Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap();
        let mut state = NodesState::new("prod");
        state.upsert_node(NodeState::new("w-1"));
        state.upsert_node(NodeState::new("w-1").with_created_at(imported));

        assert_eq!(state.get("w-1").unwrap().created_at, Some(imported));
    }

    #[test]
    fn test_insertion_order_and_active_nodes() {
        let mut state = NodesState::new("prod");
        state.upsert_node(NodeState::new("b"));
        state.upsert_node(NodeState::new("a").with_status(NodeStatus::Deleted));
        state.upsert_node(NodeState::new("c").with_status(NodeStatus::Ready));

        let names: Vec<_> = state.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);

        let active: Vec<_> = state.active_nodes().map(|n| n.name.as_str()).collect();
        assert_eq!(active, vec!["b", "c"]);
    }

    #[test]
    fn test_upsert_trims_name() {
        let mut state = NodesState::new("prod");
        state.upsert_node(NodeState::new("cp-1").with_server_id("srv-1"));
        state.upsert_node(NodeState::new(" cp-1 ").with_public_ip("1.2.3.4"));

        assert_eq!(state.nodes.len(), 1);
        let node = state.get("cp-1").unwrap();
        assert_eq!(node.server_id, "srv-1");
        assert_eq!(node.public_ip, "1.2.3.4");
    }

    #[test]
    fn test_first_active_by_role() {
        let mut state = NodesState::new("prod");
        state.upsert_node(NodeState::new("w-1").with_role(NodeRole::Worker).with_public_ip("10.0.0.9"));
        state.upsert_node(
            NodeState::new("cp-1")
                .with_role(NodeRole::ControlPlane)
                .with_public_ip("10.0.0.1")
                .with_status(NodeStatus::Deleted),
        );
        state.upsert_node(
            NodeState::new("cp-2")
                .with_role(NodeRole::ControlPlane)
                .with_public_ip("10.0.0.2")
                .with_status(NodeStatus::Failed),
        );
        state.upsert_node(
            NodeState::new("cp-3")
                .with_role(NodeRole::ControlPlane)
                .with_status(NodeStatus::Provisioning),
        );
        assert!(state.first_active_by_role(NodeRole::ControlPlane).is_none());

        state.upsert_node(
            NodeState::new("cp-4")
                .with_role(NodeRole::ControlPlane)
                .with_private_ip("172.16.0.4")
                .with_status(NodeStatus::Ready),
        );
        let node = state.first_active_by_role(NodeRole::ControlPlane).unwrap();
        assert_eq!(node.name, "cp-4");
        assert_eq!(state.first_active_by_role(NodeRole::Worker).unwrap().name, "w-1");
    }

    #[test]
    fn test_decodes_documents_with_empty_fields() {
        let doc = r#"{
            "environment": "production",
            "updated_at": "2024-05-01T10:00:00Z",
            "nodes": [
                {
                    "name": "production-control-plane-01",
                    "role": "controlplane",
                    "public_ip": "51.15.0.1",
                    "status": "ready",
                    "created_at": "2024-05-01T09:00:00Z",
                    "updated_at": "2024-05-01T10:00:00Z"
                },
                {
                    "name": "imported",
                    "role": "",
                    "status": "",
                    "created_at": "0001-01-01T00:00:00Z",
                    "updated_at": "0001-01-01T00:00:00Z"
                }
            ]
        }"#;
        let state: NodesState = serde_json::from_str(doc).unwrap();
        assert_eq!(state.nodes.len(), 2);
        assert_eq!(state.nodes[0].role, Some(NodeRole::ControlPlane));
        assert_eq!(state.nodes[0].status, Some(NodeStatus::Ready));
        assert_eq!(state.nodes[1].role, None);
        assert_eq!(state.nodes[1].status, None);

        let empty: NodesState =
            serde_json::from_str(r#"{"environment": "dev", "nodes": null}"#).unwrap();
        assert!(empty.nodes.is_empty());
    }

    #[test]
    fn test_json_layout() {
        let mut state = NodesState::new("prod");
        state.upsert_node(
            NodeState::new("cp-1")
                .with_role(NodeRole::ControlPlane)
                .with_public_ip("1.2.3.4")
                .with_status(NodeStatus::Ready),
        );
        let value = serde_json::to_value(&state).unwrap();
        let node = &value["nodes"][0];

        assert_eq!(value["environment"], "prod");
        assert_eq!(node["role"], "controlplane");
        assert_eq!(node["public_ip"], "1.2.3.4");
        assert_eq!(node["status"], "ready");
        assert!(node.get("server_id").is_none());
        assert!(node["created_at"].is_string());
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!(NodeRole::parse("Control-Plane"), Some(NodeRole::ControlPlane));
        assert_eq!(NodeRole::parse("worker"), Some(NodeRole::Worker));
        assert_eq!(NodeRole::parse("etcd"), None);
        let role: NodeRole = serde_json::from_str("\"control-plane\"").unwrap();
        assert_eq!(role, NodeRole::ControlPlane);
    }
}
