//! Interface of the scan-to-submap constraint builder.
//!
//! The builder owns the expensive matching work: it receives candidate
//! submap/scan pairs, runs its matchers on a thread pool, and reports
//! accepted inter-submap constraints in batches through
//! [`when_done`](ConstraintBuilder::when_done) callbacks. "Maybe" means the
//! builder is free to reject a proposal on score; a rejected proposal simply
//! produces no constraint.

pub mod test_utils;

use std::sync::Arc;

use crate::core::types::{NodeId, Rigid3, SubmapId};
use crate::engine::graph::{Constraint, TrajectoryConnectivity, TrajectoryNode};
use crate::engine::handles::SubmapHandle;

/// Callback receiving one batch of accepted inter-submap constraints.
pub type WhenDoneCallback = Box<dyn FnOnce(Vec<Constraint>) + Send>;

/// Asynchronous producer of inter-submap (loop closure) constraints.
///
/// Implementations must invoke [`when_done`](ConstraintBuilder::when_done)
/// callbacks from their own worker threads once the pipeline is idle, never
/// synchronously from inside the registration call: the back-end registers
/// callbacks while holding its state mutex, and the callbacks re-acquire it.
pub trait ConstraintBuilder: Send + Sync {
    /// Propose a local match between a scan and a submap, anchored at the
    /// relative pose from the current optimized estimates.
    fn maybe_add_constraint(
        &self,
        submap_id: SubmapId,
        submap: &SubmapHandle,
        node_id: NodeId,
        scan_index: usize,
        trajectory_nodes: &[TrajectoryNode],
        relative_pose: Rigid3,
    );

    /// Propose a global match between a scan and a submap of a different,
    /// not-yet-connected trajectory. No pose prior: the matcher searches the
    /// whole submap. On acceptance the builder registers the new
    /// cross-trajectory link in `connectivity`.
    fn maybe_add_global_constraint(
        &self,
        submap_id: SubmapId,
        submap: &SubmapHandle,
        node_id: NodeId,
        scan_index: usize,
        connectivity: &Arc<TrajectoryConnectivity>,
        trajectory_nodes: &[TrajectoryNode],
    );

    /// Mark that every proposal for the scan at `scan_index` has been
    /// submitted.
    fn notify_end_of_scan(&self, scan_index: usize);

    /// Register a callback invoked with all constraints accepted since the
    /// previous callback, once the matching pipeline is idle.
    fn when_done(&self, callback: WhenDoneCallback);

    /// Number of scans whose end-of-scan notification has been processed.
    fn num_finished_scans(&self) -> usize;
}
