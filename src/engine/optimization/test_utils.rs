//! Test double for the optimization problem.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::types::{ImuReading, Rigid3};
use crate::engine::graph::Constraint;

use super::problem::{NodeData, OptimizationProblem, SubmapData};

#[derive(Debug, Default)]
struct Recording {
    solve_calls: usize,
    constraints_per_solve: Vec<usize>,
    iteration_caps: Vec<u32>,
    added_submaps: Vec<(usize, Rigid3)>,
    added_nodes: Vec<(usize, u64, Rigid3)>,
    added_imu: Vec<(usize, ImuReading)>,
}

/// An [`OptimizationProblem`] whose `solve` keeps every pose unchanged while
/// recording how it was driven.
///
/// Cloning shares the recording, so a test can keep a clone and inspect the
/// calls made through the instance owned by the pose graph. Only the
/// graph-owned instance accumulates pose state; clones serve as observers.
#[derive(Clone, Default)]
pub struct RecordingOptimizationProblem {
    submap_data: Vec<Vec<SubmapData>>,
    node_data: Vec<Vec<NodeData>>,
    imu_data: Vec<Vec<ImuReading>>,
    recording: Arc<Mutex<Recording>>,
}

impl RecordingOptimizationProblem {
    /// Create an empty recording problem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `solve` invocations so far.
    pub fn solve_calls(&self) -> usize {
        self.recording.lock().solve_calls
    }

    /// Constraint count passed to each `solve`, in call order.
    pub fn constraints_per_solve(&self) -> Vec<usize> {
        self.recording.lock().constraints_per_solve.clone()
    }

    /// Every iteration cap set via `set_max_num_iterations`, in call order.
    pub fn iteration_caps(&self) -> Vec<u32> {
        self.recording.lock().iteration_caps.clone()
    }

    /// Every `add_submap` call as `(trajectory_id, pose)`, in call order.
    pub fn added_submaps(&self) -> Vec<(usize, Rigid3)> {
        self.recording.lock().added_submaps.clone()
    }

    /// Every `add_trajectory_node` call as `(trajectory_id, timestamp_us, pose)`.
    pub fn added_nodes(&self) -> Vec<(usize, u64, Rigid3)> {
        self.recording.lock().added_nodes.clone()
    }

    /// Every `add_imu_data` call as `(trajectory_id, reading)`.
    pub fn added_imu(&self) -> Vec<(usize, ImuReading)> {
        self.recording.lock().added_imu.clone()
    }
}

impl OptimizationProblem for RecordingOptimizationProblem {
    fn add_submap(&mut self, trajectory_id: usize, pose: Rigid3) {
        if self.submap_data.len() <= trajectory_id {
            self.submap_data.resize_with(trajectory_id + 1, Vec::new);
        }
        self.submap_data[trajectory_id].push(SubmapData { pose });
        self.recording.lock().added_submaps.push((trajectory_id, pose));
    }

    fn add_trajectory_node(&mut self, trajectory_id: usize, timestamp_us: u64, pose: Rigid3) {
        if self.node_data.len() <= trajectory_id {
            self.node_data.resize_with(trajectory_id + 1, Vec::new);
        }
        self.node_data[trajectory_id].push(NodeData { timestamp_us, pose });
        self.recording
            .lock()
            .added_nodes
            .push((trajectory_id, timestamp_us, pose));
    }

    fn add_imu_data(&mut self, trajectory_id: usize, reading: ImuReading) {
        if self.imu_data.len() <= trajectory_id {
            self.imu_data.resize_with(trajectory_id + 1, Vec::new);
        }
        self.imu_data[trajectory_id].push(reading);
        self.recording.lock().added_imu.push((trajectory_id, reading));
    }

    fn solve(&mut self, constraints: &[Constraint]) {
        let mut recording = self.recording.lock();
        recording.solve_calls += 1;
        recording.constraints_per_solve.push(constraints.len());
    }

    fn set_max_num_iterations(&mut self, max_num_iterations: u32) {
        self.recording.lock().iteration_caps.push(max_num_iterations);
    }

    fn submap_data(&self) -> &[Vec<SubmapData>] {
        &self.submap_data
    }

    fn node_data(&self) -> &[Vec<NodeData>] {
        &self.node_data
    }
}
