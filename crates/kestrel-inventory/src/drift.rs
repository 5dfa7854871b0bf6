//! Drift detection between the inventory and live infrastructure

use crate::state::{NodeState, NodesState};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// A node whose live public IP differs from the recorded one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpMismatch {
    pub node_name: String,
    pub expected: String,
    pub actual: String,
}

/// Differences between recorded and actual nodes, each list sorted by name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriftResult {
    /// Recorded but not running
    pub missing_nodes: Vec<String>,
    /// Running but not recorded
    pub extra_nodes: Vec<String>,
    pub ip_mismatches: Vec<IpMismatch>,
}

impl DriftResult {
    pub fn has_drift(&self) -> bool {
        !self.missing_nodes.is_empty() || !self.extra_nodes.is_empty() || !self.ip_mismatches.is_empty()
    }
}

impl fmt::Display for DriftResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.has_drift() {
            return write!(f, "No drift detected.");
        }
        write!(f, "Drift detected:")?;
        for name in &self.missing_nodes {
            write!(f, "\n  - Missing node: {}", name)?;
        }
        for name in &self.extra_nodes {
            write!(f, "\n  - Extra node: {}", name)?;
        }
        for m in &self.ip_mismatches {
            write!(
                f,
                "\n  - IP mismatch for {}: expected {}, got {}",
                m.node_name, m.expected, m.actual
            )?;
        }
        Ok(())
    }
}

/// Compare recorded nodes against a `name -> public IP` snapshot
///
/// An empty recorded IP never counts as a mismatch.
pub fn detect_drift<'a>(
    known: impl IntoIterator<Item = &'a NodeState>,
    actual: &HashMap<String, String>,
) -> DriftResult {
    let known: BTreeMap<&str, &str> = known
        .into_iter()
        .map(|node| (node.name.as_str(), node.public_ip.as_str()))
        .collect();

    let mut result = DriftResult::default();

    for (name, expected) in &known {
        match actual.get(*name) {
            None => result.missing_nodes.push(name.to_string()),
            Some(ip) if !expected.is_empty() && ip != expected => {
                result.ip_mismatches.push(IpMismatch {
                    node_name: name.to_string(),
                    expected: expected.to_string(),
                    actual: ip.clone(),
                });
            }
            Some(_) => {}
        }
    }

    result.extra_nodes = actual
        .keys()
        .filter(|name| !known.contains_key(name.as_str()))
        .cloned()
        .collect();
    result.extra_nodes.sort();

    result
}

/// Drift of a cluster inventory, ignoring nodes already marked deleted
pub fn detect_inventory_drift(state: &NodesState, actual: &HashMap<String, String>) -> DriftResult {
    detect_drift(state.active_nodes(), actual)
}
