//! Interface of the optimization problem consumed by the back-end.

use crate::core::types::{ImuReading, Rigid3};
use crate::engine::graph::Constraint;

/// Pose of a submap as known to the optimization problem.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubmapData {
    /// Global pose of the submap frame.
    pub pose: Rigid3,
}

/// Pose of a trajectory node as known to the optimization problem.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeData {
    /// Scan timestamp in microseconds.
    pub timestamp_us: u64,
    /// Global pose of the scan.
    pub pose: Rigid3,
}

/// The non-linear least-squares problem over submap and node poses.
///
/// The back-end appends poses and IMU samples as scans arrive and invokes
/// [`solve`](OptimizationProblem::solve) with the full constraint set; the
/// problem rewrites its pose estimates in place. Outer indices of
/// [`submap_data`](OptimizationProblem::submap_data) and
/// [`node_data`](OptimizationProblem::node_data) are dense trajectory ids,
/// inner indices the dense per-trajectory submap/node indices.
pub trait OptimizationProblem: Send {
    /// Append a submap pose for the given trajectory.
    fn add_submap(&mut self, trajectory_id: usize, pose: Rigid3);

    /// Append a node pose for the given trajectory.
    fn add_trajectory_node(&mut self, trajectory_id: usize, timestamp_us: u64, pose: Rigid3);

    /// Append an IMU sample to the trajectory's series.
    fn add_imu_data(&mut self, trajectory_id: usize, reading: ImuReading);

    /// Minimize the constraint residuals, updating all pose estimates.
    ///
    /// A solve that fails to converge still leaves usable poses behind; the
    /// caller accepts whatever the solver produced.
    fn solve(&mut self, constraints: &[Constraint]);

    /// Replace the solver iteration cap.
    fn set_max_num_iterations(&mut self, max_num_iterations: u32);

    /// Current submap poses, indexed `[trajectory_id][submap_index]`.
    fn submap_data(&self) -> &[Vec<SubmapData>];

    /// Current node poses, indexed `[trajectory_id][node_index]`.
    fn node_data(&self) -> &[Vec<NodeData>];
}
