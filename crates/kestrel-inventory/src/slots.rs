//! Node pool slots
//!
//! Pool nodes are named `{environment}-{pool}-NN`, where `NN` is a two-digit
//! slot starting at 1. Nodes named `{pool}-NN` by earlier releases are still
//! recognised.

use crate::error::Result;
use crate::state::{NodeRole, NodesState};
use kestrel_operation::{keys, Operation};
use std::collections::BTreeSet;
use tracing::info;

/// Highest slot a pool hands out
pub const MAX_POOL_SLOT: u32 = 99;

/// Node name for `slot` in `pool`
pub fn pooled_node_name(environment: &str, pool: &str, slot: u32) -> String {
    let pool = pool.trim();
    match environment.trim() {
        "" => format!("{}-{:02}", pool, slot),
        env => format!("{}-{}-{:02}", env, pool, slot),
    }
}

/// Slot encoded in a pool node's name
pub fn parse_pool_slot(environment: &str, pool: &str, name: &str) -> Option<u32> {
    let name = name.trim();
    let pool = pool.trim();
    let env = environment.trim();

    let mut prefixes = Vec::with_capacity(2);
    if !env.is_empty() {
        prefixes.push(format!("{}-{}-", env, pool));
    }
    prefixes.push(format!("{}-", pool));

    prefixes.iter().find_map(|prefix| {
        let suffix = name.strip_prefix(prefix.as_str())?;
        if suffix.len() != 2 || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        suffix.parse().ok().filter(|slot| *slot > 0)
    })
}

impl NodesState {
    /// Lowest free slot in `pool`
    ///
    /// Deleted nodes free their slot. When `role` is set, nodes of other
    /// roles are ignored. A live node whose name carries no slot still counts,
    /// and takes the lowest slot not claimed by name. Returns
    /// `MAX_POOL_SLOT + 1` when the pool is full.
    pub fn next_pool_slot(&self, environment: &str, pool: &str, role: Option<NodeRole>) -> u32 {
        let mut occupied = BTreeSet::new();
        let mut unnamed = 0usize;

        for node in self.active_nodes().filter(|node| node.pool == pool) {
            if role.is_some() && node.role != role {
                continue;
            }
            match parse_pool_slot(environment, pool, &node.name) {
                Some(slot) => {
                    occupied.insert(slot);
                }
                None => unnamed += 1,
            }
        }

        let mut free = (1..=MAX_POOL_SLOT).filter(|slot| !occupied.contains(slot));
        free.nth(unnamed).unwrap_or(MAX_POOL_SLOT + 1)
    }

    pub fn next_control_plane_slot(&self, environment: &str, pool: &str) -> u32 {
        self.next_pool_slot(environment, pool, Some(NodeRole::ControlPlane))
    }
}

/// Pick the control plane slot for the operation's node and record it
///
/// A slot already in the context wins, then a slot encoded in the node name.
/// Otherwise the lowest free slot is taken and the node is named after it.
/// The slot is stored as a decimal string.
pub fn reserve_control_plane_slot(
    op: &mut Operation,
    nodes: &NodesState,
    environment: &str,
    pool: &str,
) -> Result<u32> {
    let recorded = op
        .get_context_string(keys::CONTROL_PLANE_SLOT.name())
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|slot| *slot > 0);
    if let Some(slot) = recorded {
        return Ok(slot);
    }

    let named = op.get_context_string(keys::NODE_NAME.name()).to_string();
    let slot = match parse_pool_slot(environment, pool, &named) {
        Some(slot) => slot,
        None => {
            let slot = nodes.next_control_plane_slot(environment, pool);
            op.ensure_context(
                keys::NODE_NAME.name(),
                &pooled_node_name(environment, pool, slot),
            )?;
            slot
        }
    };

    op.set_context_value(keys::CONTROL_PLANE_SLOT, &slot.to_string())?;
    info!(
        operation = %op.id(),
        pool = %pool,
        slot,
        node = %op.get_context_string(keys::NODE_NAME.name()),
        "Reserved control plane slot"
    );
    Ok(slot)
}
