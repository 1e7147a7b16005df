//! Dense identifiers for trajectories, nodes, and submaps.
//!
//! Two indexings coexist by design: the flat scan index (order of ingestion
//! across all trajectories, used by the constraint builder and samplers) and
//! the per-trajectory indices below (used by the optimization problem).

use serde::{Deserialize, Serialize};

/// Identifies a trajectory node by trajectory and dense per-trajectory index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    /// Dense trajectory id assigned at first registration.
    pub trajectory_id: usize,
    /// Dense index of the node within its trajectory.
    pub node_index: usize,
}

/// Identifies a submap by trajectory and dense per-trajectory index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubmapId {
    /// Dense trajectory id assigned at first registration.
    pub trajectory_id: usize,
    /// Dense index of the submap within its trajectory, in creation order.
    pub submap_index: usize,
}
