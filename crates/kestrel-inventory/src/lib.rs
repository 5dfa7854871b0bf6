//! Kestrel Node Inventory
//!
//! Tracks every machine a cluster has ever provisioned, and compares that
//! record against live infrastructure.
//!
//! Nodes are never removed from the inventory. Deletion is a status change to
//! [`NodeStatus::Deleted`], so repeated deletes stay idempotent and history is
//! kept for audit.

pub mod drift;
pub mod error;
pub mod slots;
pub mod state;
pub mod store;

pub use drift::{detect_drift, detect_inventory_drift, DriftResult, IpMismatch};
pub use error::*;
pub use slots::{parse_pool_slot, pooled_node_name, reserve_control_plane_slot, MAX_POOL_SLOT};
pub use state::{NodeRole, NodeState, NodeStatus, NodesState};
pub use store::NodeStore;
