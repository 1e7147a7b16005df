//! Default least-squares backend over submap and node poses.
//!
//! Minimizes the weighted residuals of all submap-to-node constraints with
//! Levenberg-Marquardt on a 6-DOF local parameterization (translation plus
//! rotation vector) per pose. The linear system is built densely and solved
//! by Cholesky factorization; the first submap pose is held fixed to remove
//! the gauge freedom.

use nalgebra::{DMatrix, DVector, Matrix6, SMatrix, UnitQuaternion, Vector6};

use crate::core::types::{ImuReading, Rigid3};
use crate::engine::graph::{Constraint, OptimizationOptions};

use super::problem::{NodeData, OptimizationProblem, SubmapData};

/// Diagonal weight pinning the gauge block.
const GAUGE_WEIGHT: f64 = 1e12;

/// Central-difference step for numeric Jacobians.
const JACOBIAN_STEP: f64 = 1e-6;

/// Dense Levenberg-Marquardt implementation of [`OptimizationProblem`].
pub struct GraphOptimizer {
    options: OptimizationOptions,
    submap_data: Vec<Vec<SubmapData>>,
    node_data: Vec<Vec<NodeData>>,
    imu_data: Vec<Vec<ImuReading>>,
}

impl GraphOptimizer {
    /// Create an optimizer with the given solver options.
    pub fn new(options: OptimizationOptions) -> Self {
        Self {
            options,
            submap_data: Vec::new(),
            node_data: Vec::new(),
            imu_data: Vec::new(),
        }
    }

    /// Stored IMU series, indexed `[trajectory_id]`.
    pub fn imu_data(&self) -> &[Vec<ImuReading>] {
        &self.imu_data
    }

    fn run_solver(&mut self, constraints: &[Constraint]) {
        if constraints.is_empty() {
            return;
        }

        // Flatten all poses into parameter blocks: submaps first, then nodes.
        let mut poses: Vec<Rigid3> = Vec::new();
        let submap_block: Vec<Vec<usize>> = self
            .submap_data
            .iter()
            .map(|trajectory| {
                trajectory
                    .iter()
                    .map(|data| {
                        poses.push(data.pose);
                        poses.len() - 1
                    })
                    .collect()
            })
            .collect();
        let node_block: Vec<Vec<usize>> = self
            .node_data
            .iter()
            .map(|trajectory| {
                trajectory
                    .iter()
                    .map(|data| {
                        poses.push(data.pose);
                        poses.len() - 1
                    })
                    .collect()
            })
            .collect();
        if poses.is_empty() {
            return;
        }

        let dim = poses.len() * 6;
        let mut lambda = self.options.damping_factor;
        let mut current_error = total_error(&poses, constraints, &submap_block, &node_block);
        let initial_error = current_error;
        let mut iterations = 0;

        for _ in 0..self.options.max_num_iterations {
            iterations += 1;

            let (h, b) = build_linear_system(&poses, constraints, &submap_block, &node_block, dim);
            if b.norm() < 1e-12 {
                break;
            }

            let mut h_damped = h;
            for i in 0..dim {
                let diagonal = h_damped[(i, i)];
                h_damped[(i, i)] = diagonal + lambda * diagonal.max(1.0);
            }

            let rhs = -b;
            let step = match h_damped.cholesky() {
                Some(factorization) => factorization.solve(&rhs),
                None => {
                    lambda *= 10.0;
                    if lambda > 1e10 {
                        break;
                    }
                    continue;
                }
            };

            let candidate: Vec<Rigid3> = poses
                .iter()
                .enumerate()
                .map(|(i, pose)| retract(pose, &step.fixed_rows::<6>(i * 6).into_owned()))
                .collect();
            let new_error = total_error(&candidate, constraints, &submap_block, &node_block);

            if new_error > current_error {
                lambda *= 10.0;
                if lambda > 1e10 {
                    break;
                }
                continue;
            }

            poses = candidate;
            lambda = (lambda * 0.1).max(1e-10);

            let relative_change = (current_error - new_error) / current_error.max(1e-12);
            current_error = new_error;
            if relative_change < self.options.convergence_threshold {
                break;
            }
        }

        log::debug!(
            "pose graph solve: {} constraints, {} iterations, error {:.3e} -> {:.3e}",
            constraints.len(),
            iterations,
            initial_error,
            current_error
        );

        // Write the refined estimates back.
        for (trajectory_id, blocks) in submap_block.iter().enumerate() {
            for (submap_index, &block) in blocks.iter().enumerate() {
                self.submap_data[trajectory_id][submap_index].pose = poses[block];
            }
        }
        for (trajectory_id, blocks) in node_block.iter().enumerate() {
            for (node_index, &block) in blocks.iter().enumerate() {
                self.node_data[trajectory_id][node_index].pose = poses[block];
            }
        }
    }
}

impl OptimizationProblem for GraphOptimizer {
    fn add_submap(&mut self, trajectory_id: usize, pose: Rigid3) {
        if self.submap_data.len() <= trajectory_id {
            self.submap_data.resize_with(trajectory_id + 1, Vec::new);
        }
        self.submap_data[trajectory_id].push(SubmapData { pose });
    }

    fn add_trajectory_node(&mut self, trajectory_id: usize, timestamp_us: u64, pose: Rigid3) {
        if self.node_data.len() <= trajectory_id {
            self.node_data.resize_with(trajectory_id + 1, Vec::new);
        }
        self.node_data[trajectory_id].push(NodeData { timestamp_us, pose });
    }

    fn add_imu_data(&mut self, trajectory_id: usize, reading: ImuReading) {
        if self.imu_data.len() <= trajectory_id {
            self.imu_data.resize_with(trajectory_id + 1, Vec::new);
        }
        self.imu_data[trajectory_id].push(reading);
    }

    fn solve(&mut self, constraints: &[Constraint]) {
        self.run_solver(constraints);
    }

    fn set_max_num_iterations(&mut self, max_num_iterations: u32) {
        self.options.max_num_iterations = max_num_iterations;
    }

    fn submap_data(&self) -> &[Vec<SubmapData>] {
        &self.submap_data
    }

    fn node_data(&self) -> &[Vec<NodeData>] {
        &self.node_data
    }
}

/// Apply a 6-DOF local update: translation added, rotation right-multiplied.
fn retract(pose: &Rigid3, delta: &Vector6<f64>) -> Rigid3 {
    let translation = pose.translation() + delta.fixed_rows::<3>(0).into_owned();
    let rotation =
        pose.rotation() * UnitQuaternion::from_scaled_axis(delta.fixed_rows::<3>(3).into_owned());
    Rigid3::new(translation, rotation)
}

/// Weighted residual of one constraint at the given pose estimates.
fn weighted_error(constraint: &Constraint, submap_pose: &Rigid3, node_pose: &Rigid3) -> Vector6<f64> {
    let predicted = submap_pose.inverse().compose(node_pose);
    let measured = &constraint.pose.relative_transform;

    let mut error = Vector6::zeros();
    error
        .fixed_rows_mut::<3>(0)
        .copy_from(&(predicted.translation() - measured.translation()));
    error.fixed_rows_mut::<3>(3).copy_from(
        &(measured.rotation().inverse() * predicted.rotation()).scaled_axis(),
    );
    constraint.pose.sqrt_information * error
}

fn constraint_poses<'a>(
    constraint: &Constraint,
    poses: &'a [Rigid3],
    submap_block: &[Vec<usize>],
    node_block: &[Vec<usize>],
) -> (&'a Rigid3, &'a Rigid3, usize, usize) {
    let submap = submap_block[constraint.submap_id.trajectory_id][constraint.submap_id.submap_index];
    let node = node_block[constraint.node_id.trajectory_id][constraint.node_id.node_index];
    (&poses[submap], &poses[node], submap, node)
}

fn total_error(
    poses: &[Rigid3],
    constraints: &[Constraint],
    submap_block: &[Vec<usize>],
    node_block: &[Vec<usize>],
) -> f64 {
    constraints
        .iter()
        .map(|constraint| {
            let (submap_pose, node_pose, _, _) =
                constraint_poses(constraint, poses, submap_block, node_block);
            let error = weighted_error(constraint, submap_pose, node_pose);
            error.dot(&error)
        })
        .sum()
}

fn build_linear_system(
    poses: &[Rigid3],
    constraints: &[Constraint],
    submap_block: &[Vec<usize>],
    node_block: &[Vec<usize>],
    dim: usize,
) -> (DMatrix<f64>, DVector<f64>) {
    let mut h = DMatrix::<f64>::zeros(dim, dim);
    let mut b = DVector::<f64>::zeros(dim);

    for constraint in constraints {
        let (submap_pose, node_pose, submap, node) =
            constraint_poses(constraint, poses, submap_block, node_block);
        let error = weighted_error(constraint, submap_pose, node_pose);

        // Numeric Jacobian of the weighted residual, columns 0..6 for the
        // submap block and 6..12 for the node block.
        let mut jacobian = SMatrix::<f64, 6, 12>::zeros();
        for k in 0..12 {
            let mut delta = Vector6::zeros();
            delta[k % 6] = JACOBIAN_STEP;

            let (plus, minus) = if k < 6 {
                (
                    weighted_error(constraint, &retract(submap_pose, &delta), node_pose),
                    weighted_error(constraint, &retract(submap_pose, &(-delta)), node_pose),
                )
            } else {
                (
                    weighted_error(constraint, submap_pose, &retract(node_pose, &delta)),
                    weighted_error(constraint, submap_pose, &retract(node_pose, &(-delta))),
                )
            };
            jacobian.set_column(k, &((plus - minus) / (2.0 * JACOBIAN_STEP)));
        }

        let j_submap: Matrix6<f64> = jacobian.fixed_columns::<6>(0).into_owned();
        let j_node: Matrix6<f64> = jacobian.fixed_columns::<6>(6).into_owned();

        add_block(&mut h, submap * 6, submap * 6, &(j_submap.transpose() * j_submap));
        add_block(&mut h, submap * 6, node * 6, &(j_submap.transpose() * j_node));
        add_block(&mut h, node * 6, submap * 6, &(j_node.transpose() * j_submap));
        add_block(&mut h, node * 6, node * 6, &(j_node.transpose() * j_node));

        let b_submap = j_submap.transpose() * error;
        let b_node = j_node.transpose() * error;
        for r in 0..6 {
            b[submap * 6 + r] += b_submap[r];
            b[node * 6 + r] += b_node[r];
        }
    }

    // Pin the first submap block to remove the gauge freedom.
    for i in 0..6 {
        h[(i, i)] += GAUGE_WEIGHT;
    }

    (h, b)
}

fn add_block(h: &mut DMatrix<f64>, row: usize, col: usize, block: &Matrix6<f64>) {
    for r in 0..6 {
        for c in 0..6 {
            h[(row + r, col + c)] += block[(r, c)];
        }
    }
}
