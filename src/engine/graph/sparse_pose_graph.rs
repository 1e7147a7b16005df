//! The sparse pose-graph back-end.
//!
//! Ingests scans and IMU samples from one or more trajectories, accumulates
//! intra-submap constraints synchronously and inter-submap (loop closure)
//! constraints through the background constraint builder, and periodically
//! re-solves the whole graph without ever blocking ingestion.
//!
//! # Locking
//!
//! One coarse mutex guards all graph state; a second guards the optimization
//! problem so a running solve does not block ingestion. Work executed under
//! the state mutex may take the problem mutex, never the other way around:
//! the optimization driver releases the problem before touching graph state.
//!
//! # Modes
//!
//! Ingestion work runs inline while `scan_queue` is `None`. Once an
//! optimization is pending the queue is allocated, work items buffer up, and
//! the constraint builder's idle callback drains them in FIFO order before
//! handing ingestion back to synchronous mode.

use std::collections::{HashMap, HashSet};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::core::math::spd_sqrt_inverse;
use crate::core::types::{ImuReading, NodeId, PoseCovariance, RangeData, Rigid3, SubmapId};
use crate::engine::handles::{SubmapHandle, TrajectoryHandle};
use crate::engine::matching::ConstraintBuilder;
use crate::engine::optimization::{OptimizationProblem, SubmapData};

use super::connectivity::TrajectoryConnectivity;
use super::constraint::{Constraint, ConstraintKind, ConstraintPose};
use super::node::{ConstantData, TrajectoryNode};
use super::options::PoseGraphOptions;
use super::sampler::FixedRatioSampler;
use super::work_queue::{WorkItem, WorkQueue};

/// Bookkeeping for one submap known to the graph.
#[derive(Debug)]
struct SubmapState {
    submap: SubmapHandle,
    /// Nodes whose scans were inserted into this submap.
    node_ids: HashSet<NodeId>,
    /// Set exactly once; a finished submap receives no further scans and
    /// becomes eligible for matching against all prior scans.
    finished: bool,
}

impl SubmapState {
    fn new(submap: SubmapHandle) -> Self {
        Self {
            submap,
            node_ids: HashSet::new(),
            finished: false,
        }
    }
}

/// Counters exposed for diagnostics.
#[derive(Debug, Clone)]
pub struct PoseGraphStats {
    /// Trajectories registered so far.
    pub num_trajectories: usize,
    /// Scans ingested so far.
    pub num_trajectory_nodes: usize,
    /// Submaps known across all trajectories.
    pub num_submaps: usize,
    /// Constraints accumulated so far.
    pub num_constraints: usize,
    /// Scans whose constraint computation has completed.
    pub num_finished_scans: usize,
    /// Buffered work items, or `None` while ingestion is synchronous.
    pub deferred_work_items: Option<usize>,
}

#[derive(Default)]
struct PoseGraphState {
    trajectory_ids: HashMap<TrajectoryHandle, usize>,
    submap_ids: HashMap<SubmapHandle, SubmapId>,
    trajectory_nodes: Vec<TrajectoryNode>,
    scan_index_to_node_id: Vec<NodeId>,
    num_nodes_in_trajectory: HashMap<usize, usize>,
    submap_states: Vec<Vec<SubmapState>>,
    constraints: Vec<Constraint>,
    samplers: HashMap<usize, FixedRatioSampler>,
    optimized_submap_transforms: Vec<Vec<SubmapData>>,
    connected_components: Vec<Vec<usize>>,
    reverse_connected_components: HashMap<usize, usize>,
    scan_queue: Option<WorkQueue>,
    num_scans_since_last_loop_closure: usize,
    run_loop_closure: bool,
}

struct Inner<B, P> {
    options: PoseGraphOptions,
    constraint_builder: B,
    connectivity: Arc<TrajectoryConnectivity>,
    state: Mutex<PoseGraphState>,
    problem: Mutex<P>,
    wakeup: Condvar,
}

/// The sparse pose-graph back-end.
///
/// Generic over the constraint builder and the optimization problem so the
/// expensive matching and solving stay pluggable; see
/// [`crate::engine::matching::ConstraintBuilder`] and
/// [`crate::engine::optimization::OptimizationProblem`].
pub struct SparsePoseGraph<B, P>
where
    B: ConstraintBuilder + 'static,
    P: OptimizationProblem + 'static,
{
    inner: Arc<Inner<B, P>>,
}

impl<B, P> SparsePoseGraph<B, P>
where
    B: ConstraintBuilder + 'static,
    P: OptimizationProblem + 'static,
{
    /// Create a back-end around the given collaborators.
    pub fn new(options: PoseGraphOptions, constraint_builder: B, problem: P) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                constraint_builder,
                connectivity: Arc::new(TrajectoryConnectivity::new()),
                state: Mutex::new(PoseGraphState::default()),
                problem: Mutex::new(problem),
                wakeup: Condvar::new(),
            }),
        }
    }

    /// Ingest one scan.
    ///
    /// `insertion_submaps` are the one or two submaps the scan was inserted
    /// into, oldest first; `matching_submap` is the one it was matched
    /// against. The heavy constraint computation is enqueued and may be
    /// deferred while an optimization is pending.
    #[allow(clippy::too_many_arguments)]
    pub fn add_scan(
        &self,
        timestamp_us: u64,
        range_data: RangeData,
        pose: Rigid3,
        covariance: PoseCovariance,
        trajectory: &TrajectoryHandle,
        matching_submap: &SubmapHandle,
        insertion_submaps: &[SubmapHandle],
    ) {
        let optimized_pose = self.local_to_global_transform(trajectory).compose(&pose);

        let inner = &self.inner;
        let mut guard = inner.state.lock();
        let state = &mut *guard;

        let next_trajectory_id = state.trajectory_ids.len();
        let trajectory_id = *state
            .trajectory_ids
            .entry(trajectory.clone())
            .or_insert(next_trajectory_id);
        let flat_scan_index = state.trajectory_nodes.len();

        state.trajectory_nodes.push(TrajectoryNode {
            constant: Arc::new(ConstantData {
                timestamp_us,
                range_data,
                trajectory_id,
                tracking_to_sensor: Rigid3::identity(),
            }),
            pose: optimized_pose,
        });
        inner.connectivity.add(trajectory_id);

        let newest_submap = insertion_submaps
            .last()
            .expect("at least one insertion submap");
        if !state.submap_ids.contains_key(newest_submap) {
            if state.submap_states.len() <= trajectory_id {
                state.submap_states.resize_with(trajectory_id + 1, Vec::new);
            }
            let submap_index = state.submap_states[trajectory_id].len();
            state.submap_ids.insert(
                newest_submap.clone(),
                SubmapId {
                    trajectory_id,
                    submap_index,
                },
            );
            state.submap_states[trajectory_id].push(SubmapState::new(newest_submap.clone()));
            log::debug!("registered submap ({trajectory_id}, {submap_index})");
        }
        // Read the flag now: by the time the work item runs, the front-end
        // may have finished further submaps.
        let finished_submap = insertion_submaps.first().filter(|s| s.finished()).cloned();

        let ratio = inner.options.global_sampling_ratio;
        state
            .samplers
            .entry(trajectory_id)
            .or_insert_with(|| FixedRatioSampler::new(ratio));

        Inner::add_work_item(
            inner,
            state,
            WorkItem::ComputeConstraintsForScan {
                scan_index: flat_scan_index,
                matching_submap: matching_submap.clone(),
                insertion_submaps: insertion_submaps.to_vec(),
                finished_submap,
                pose,
                covariance,
            },
        );
    }

    /// Ingest one IMU sample for the given trajectory.
    pub fn add_imu_data(&self, trajectory: &TrajectoryHandle, reading: ImuReading) {
        let inner = &self.inner;
        let mut guard = inner.state.lock();
        let state = &mut *guard;

        let next_trajectory_id = state.trajectory_ids.len();
        let trajectory_id = *state
            .trajectory_ids
            .entry(trajectory.clone())
            .or_insert(next_trajectory_id);

        Inner::add_work_item(
            inner,
            state,
            WorkItem::AddImuData {
                trajectory_id,
                reading,
            },
        );
    }

    /// Block until every ingested scan's constraint computation has finished
    /// and the builder's last batch of constraints has been absorbed.
    ///
    /// Rewrites an `Optimizing: X.X%...` progress line roughly once per
    /// second while waiting.
    pub fn wait_for_all_computations(&self) {
        let inner = &self.inner;
        let mut state = inner.state.lock();

        let num_finished_at_start = inner.constraint_builder.num_finished_scans();
        while inner.constraint_builder.num_finished_scans() < state.trajectory_nodes.len() {
            let result = inner.wakeup.wait_for(&mut state, Duration::from_secs(1));
            if result.timed_out() {
                let finished = inner.constraint_builder.num_finished_scans();
                let total = state.trajectory_nodes.len();
                let percent = 100.0 * (finished - num_finished_at_start) as f64
                    / (total - num_finished_at_start).max(1) as f64;
                print!("\r\x1b[KOptimizing: {percent:.1}%...");
                let _ = io::stdout().flush();
            }
        }
        println!("\r\x1b[KOptimizing: Done.     ");

        // Absorb whatever the builder accepted since the last drain.
        let flushed = Arc::new(AtomicBool::new(false));
        let graph = Arc::clone(inner);
        let flushed_flag = Arc::clone(&flushed);
        inner
            .constraint_builder
            .when_done(Box::new(move |new_constraints| {
                let mut state = graph.state.lock();
                state.constraints.extend(new_constraints);
                flushed_flag.store(true, Ordering::SeqCst);
                graph.wakeup.notify_all();
            }));
        while !flushed.load(Ordering::SeqCst) {
            inner.wakeup.wait(&mut state);
        }
    }

    /// Wait for quiescence, then run one solve with the final iteration cap.
    pub fn run_final_optimization(&self) {
        self.wait_for_all_computations();
        self.inner
            .problem
            .lock()
            .set_max_num_iterations(self.inner.options.max_num_final_iterations);
        Inner::run_optimization(&self.inner);
        self.inner
            .problem
            .lock()
            .set_max_num_iterations(self.inner.options.optimization.max_num_iterations);
    }

    /// All nodes grouped by trajectory id, a snapshot at a serialization
    /// point between mutators.
    pub fn trajectory_nodes(&self) -> Vec<Vec<TrajectoryNode>> {
        let state = self.inner.state.lock();
        let mut result = vec![Vec::new(); state.trajectory_ids.len()];
        for node in &state.trajectory_nodes {
            result[node.constant.trajectory_id].push(node.clone());
        }
        result
    }

    /// Snapshot of all constraints accumulated so far.
    pub fn constraints(&self) -> Vec<Constraint> {
        self.inner.state.lock().constraints.clone()
    }

    /// Connected components of trajectories as of the last optimization.
    pub fn connected_trajectories(&self) -> Vec<Vec<usize>> {
        self.inner.state.lock().connected_components.clone()
    }

    /// Global poses of every known submap of the trajectory: optimized where
    /// the last solve covered them, extrapolated beyond.
    pub fn submap_transforms(&self, trajectory: &TrajectoryHandle) -> Vec<Rigid3> {
        let state = self.inner.state.lock();
        match state.trajectory_ids.get(trajectory) {
            None => vec![Rigid3::identity()],
            Some(&trajectory_id) => extrapolate_submap_transforms(
                &state.submap_states,
                &state.optimized_submap_transforms,
                trajectory_id,
            ),
        }
    }

    /// Same as [`submap_transforms`](Self::submap_transforms), addressed by
    /// dense trajectory id.
    pub fn submap_transforms_for_trajectory(&self, trajectory_id: usize) -> Vec<Rigid3> {
        let state = self.inner.state.lock();
        extrapolate_submap_transforms(
            &state.submap_states,
            &state.optimized_submap_transforms,
            trajectory_id,
        )
    }

    /// Transform from the trajectory's local frame into the global frame.
    ///
    /// Identity for a trajectory that has never been registered or has no
    /// submaps yet.
    pub fn local_to_global_transform(&self, trajectory: &TrajectoryHandle) -> Rigid3 {
        let state = self.inner.state.lock();
        let Some(&trajectory_id) = state.trajectory_ids.get(trajectory) else {
            return Rigid3::identity();
        };
        let submap_states = match state.submap_states.get(trajectory_id) {
            Some(states) if !states.is_empty() => states,
            _ => return Rigid3::identity(),
        };
        let transforms = extrapolate_submap_transforms(
            &state.submap_states,
            &state.optimized_submap_transforms,
            trajectory_id,
        );
        let last_submap = &submap_states[transforms.len() - 1];
        transforms[transforms.len() - 1].compose(&last_submap.submap.local_pose().inverse())
    }

    /// Flat index the next ingested scan will receive.
    pub fn next_trajectory_node_index(&self) -> usize {
        self.inner.state.lock().trajectory_nodes.len()
    }

    /// Diagnostic counters.
    pub fn status(&self) -> PoseGraphStats {
        let state = self.inner.state.lock();
        PoseGraphStats {
            num_trajectories: state.trajectory_ids.len(),
            num_trajectory_nodes: state.trajectory_nodes.len(),
            num_submaps: state.submap_states.iter().map(|t| t.len()).sum(),
            num_constraints: state.constraints.len(),
            num_finished_scans: self.inner.constraint_builder.num_finished_scans(),
            deferred_work_items: state.scan_queue.as_ref().map(|q| q.len()),
        }
    }
}

impl<B, P> Drop for SparsePoseGraph<B, P>
where
    B: ConstraintBuilder + 'static,
    P: OptimizationProblem + 'static,
{
    fn drop(&mut self) {
        // Quiescence-based shutdown: wait out in-flight work, then the queue
        // must be gone.
        self.wait_for_all_computations();
        let state = self.inner.state.lock();
        assert!(
            state.scan_queue.is_none(),
            "pose graph dropped with deferred work still queued"
        );
    }
}

impl<B, P> Inner<B, P>
where
    B: ConstraintBuilder + 'static,
    P: OptimizationProblem + 'static,
{
    /// Run the item inline in synchronous mode, buffer it otherwise.
    fn add_work_item(inner: &Arc<Self>, state: &mut PoseGraphState, item: WorkItem) {
        match state.scan_queue.as_mut() {
            None => Self::execute_work_item(inner, state, item),
            Some(queue) => queue.push_back(item),
        }
    }

    fn execute_work_item(inner: &Arc<Self>, state: &mut PoseGraphState, item: WorkItem) {
        match item {
            WorkItem::ComputeConstraintsForScan {
                scan_index,
                matching_submap,
                insertion_submaps,
                finished_submap,
                pose,
                covariance,
            } => Self::compute_constraints_for_scan(
                inner,
                state,
                scan_index,
                matching_submap,
                insertion_submaps,
                finished_submap,
                pose,
                covariance,
            ),
            WorkItem::AddImuData {
                trajectory_id,
                reading,
            } => inner.problem.lock().add_imu_data(trajectory_id, reading),
        }
    }

    /// Make sure the optimization problem has a pose for every insertion
    /// submap, seeding a brand-new one from the measured local offset.
    fn grow_submap_transforms_as_needed(
        state: &PoseGraphState,
        problem: &mut P,
        insertion_submaps: &[SubmapHandle],
    ) {
        match insertion_submaps {
            [] => panic!("insertion submaps must not be empty"),
            [only] => {
                let first_id = state.submap_ids[only];
                assert_eq!(first_id.submap_index, 0);
                let trajectory_id = first_id.trajectory_id;
                if problem
                    .submap_data()
                    .get(trajectory_id)
                    .map_or(true, |t| t.is_empty())
                {
                    problem.add_submap(trajectory_id, Rigid3::identity());
                }
            }
            [first, second] => {
                let first_id = state.submap_ids[first];
                let second_id = state.submap_ids[second];
                let trajectory_id = first_id.trajectory_id;
                assert_eq!(second_id.trajectory_id, trajectory_id);
                let next_submap_index = problem.submap_data()[trajectory_id].len();
                assert!(second_id.submap_index <= next_submap_index);
                if second_id.submap_index == next_submap_index {
                    // Carry the measured local offset between the two submaps
                    // into the global frame without re-solving.
                    let first_pose = problem.submap_data()[trajectory_id][first_id.submap_index].pose;
                    problem.add_submap(
                        trajectory_id,
                        first_pose
                            .compose(&first.local_pose().inverse())
                            .compose(&second.local_pose()),
                    );
                }
            }
            more => panic!("expected at most two insertion submaps, got {}", more.len()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn compute_constraints_for_scan(
        inner: &Arc<Self>,
        state: &mut PoseGraphState,
        scan_index: usize,
        matching_submap: SubmapHandle,
        insertion_submaps: Vec<SubmapHandle>,
        finished_submap: Option<SubmapHandle>,
        pose: Rigid3,
        covariance: PoseCovariance,
    ) {
        let mut problem = inner.problem.lock();
        Self::grow_submap_transforms_as_needed(state, &mut problem, &insertion_submaps);

        let matching_id = state.submap_ids[&matching_submap];
        let optimized_pose = problem.submap_data()[matching_id.trajectory_id]
            [matching_id.submap_index]
            .pose
            .compose(&matching_submap.local_pose().inverse())
            .compose(&pose);

        assert_eq!(scan_index, state.scan_index_to_node_id.len());
        let node_count = state
            .num_nodes_in_trajectory
            .entry(matching_id.trajectory_id)
            .or_insert(0);
        let node_id = NodeId {
            trajectory_id: matching_id.trajectory_id,
            node_index: *node_count,
        };
        *node_count += 1;
        state.scan_index_to_node_id.push(node_id);

        let scan_data = state.trajectory_nodes[scan_index].constant.clone();
        assert_eq!(scan_data.trajectory_id, matching_id.trajectory_id);
        problem.add_trajectory_node(
            matching_id.trajectory_id,
            scan_data.timestamp_us,
            optimized_pose,
        );

        let sqrt_information = spd_sqrt_inverse(
            &covariance,
            inner
                .options
                .constraint_builder
                .lower_covariance_eigenvalue_bound,
        );
        for submap in &insertion_submaps {
            let submap_id = state.submap_ids[submap];
            let submap_state =
                &mut state.submap_states[submap_id.trajectory_id][submap_id.submap_index];
            assert!(!submap_state.finished, "scan inserted into a finished submap");
            submap_state.node_ids.insert(node_id);
            let constraint_transform = submap.local_pose().inverse().compose(&pose);
            state.constraints.push(Constraint {
                submap_id,
                node_id,
                pose: ConstraintPose {
                    relative_transform: constraint_transform,
                    sqrt_information,
                },
                kind: ConstraintKind::IntraSubmap,
            });
        }

        // Match the new scan against every finished submap anywhere.
        let finished_submap_ids: Vec<SubmapId> = state
            .submap_states
            .iter()
            .enumerate()
            .flat_map(|(trajectory_id, submaps)| {
                submaps
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.finished)
                    .map(move |(submap_index, _)| SubmapId {
                        trajectory_id,
                        submap_index,
                    })
            })
            .collect();
        for submap_id in finished_submap_ids {
            assert!(!state.submap_states[submap_id.trajectory_id][submap_id.submap_index]
                .node_ids
                .contains(&node_id));
            Self::compute_constraint(inner, state, &problem, scan_index, submap_id);
        }

        // A submap just completed: look into late loop closures for every
        // scan that predates it.
        if let Some(finished) = finished_submap {
            let finished_id = state.submap_ids[&finished];
            assert!(
                !state.submap_states[finished_id.trajectory_id][finished_id.submap_index].finished,
                "submap finished twice"
            );
            Self::compute_constraints_for_old_scans(inner, state, &problem, finished_id);
            state.submap_states[finished_id.trajectory_id][finished_id.submap_index].finished =
                true;
        }
        drop(problem);

        inner.constraint_builder.notify_end_of_scan(scan_index);
        inner.wakeup.notify_all();

        state.num_scans_since_last_loop_closure += 1;
        let threshold = inner.options.optimize_every_n_scans;
        if threshold > 0 && state.num_scans_since_last_loop_closure > threshold as usize {
            assert!(!state.run_loop_closure);
            state.run_loop_closure = true;
            // If the queue already exists, the draining thread notices the
            // flag and takes care of the next solve.
            if state.scan_queue.is_none() {
                state.scan_queue = Some(WorkQueue::new());
                Self::handle_scan_queue(inner);
            }
        }
    }

    /// Decide whether to propose a local match, a global match, or nothing
    /// for the given scan/submap pair.
    fn compute_constraint(
        inner: &Arc<Self>,
        state: &mut PoseGraphState,
        problem: &P,
        scan_index: usize,
        submap_id: SubmapId,
    ) {
        let node_id = state.scan_index_to_node_id[scan_index];
        let relative_pose = problem.submap_data()[submap_id.trajectory_id]
            [submap_id.submap_index]
            .pose
            .inverse()
            .compose(&problem.node_data()[node_id.trajectory_id][node_id.node_index].pose);
        let scan_trajectory_id = state.trajectory_nodes[scan_index].constant.trajectory_id;
        let submap =
            state.submap_states[submap_id.trajectory_id][submap_id.submap_index].submap.clone();

        // Only globally match against submaps of other trajectories, and only
        // as often as the trajectory's sampler allows.
        let cross_trajectory = scan_trajectory_id != submap_id.trajectory_id;
        let fire_global = cross_trajectory
            && state
                .samplers
                .get_mut(&scan_trajectory_id)
                .expect("a sampler exists for every scan trajectory")
                .pulse();
        if fire_global {
            inner.constraint_builder.maybe_add_global_constraint(
                submap_id,
                &submap,
                node_id,
                scan_index,
                &inner.connectivity,
                &state.trajectory_nodes,
            );
        } else {
            let connected = match (
                state.reverse_connected_components.get(&scan_trajectory_id),
                state.reverse_connected_components.get(&submap_id.trajectory_id),
            ) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            };
            if !cross_trajectory || connected {
                inner.constraint_builder.maybe_add_constraint(
                    submap_id,
                    &submap,
                    node_id,
                    scan_index,
                    &state.trajectory_nodes,
                    relative_pose,
                );
            }
        }
    }

    fn compute_constraints_for_old_scans(
        inner: &Arc<Self>,
        state: &mut PoseGraphState,
        problem: &P,
        submap_id: SubmapId,
    ) {
        let num_scans = state.scan_index_to_node_id.len();
        for scan_index in 0..num_scans {
            let node_id = state.scan_index_to_node_id[scan_index];
            let already_inserted = state.submap_states[submap_id.trajectory_id]
                [submap_id.submap_index]
                .node_ids
                .contains(&node_id);
            if !already_inserted {
                Self::compute_constraint(inner, state, problem, scan_index, submap_id);
            }
        }
    }

    /// Register the next idle callback: solve, then drain buffered work.
    fn handle_scan_queue(inner: &Arc<Self>) {
        let graph = Arc::clone(inner);
        inner
            .constraint_builder
            .when_done(Box::new(move |new_constraints| {
                {
                    let mut state = graph.state.lock();
                    state.constraints.extend(new_constraints);
                }
                Self::run_optimization(&graph);

                let mut state = graph.state.lock();
                state.num_scans_since_last_loop_closure = 0;
                state.run_loop_closure = false;
                while !state.run_loop_closure {
                    let next = state.scan_queue.as_mut().and_then(|queue| queue.pop_front());
                    match next {
                        None => {
                            log::info!("work queue drained, resuming synchronous ingestion");
                            state.scan_queue = None;
                            graph.wakeup.notify_all();
                            return;
                        }
                        Some(item) => Self::execute_work_item(&graph, &mut state, item),
                    }
                }
                // A drained item crossed the threshold again; run another
                // solve before continuing.
                drop(state);
                Self::handle_scan_queue(&graph);
            }));
    }

    /// Solve, write node poses back, extrapolate the unoptimized tail, and
    /// refresh connectivity.
    fn run_optimization(inner: &Arc<Self>) {
        let constraints = inner.state.lock().constraints.clone();
        let (submap_data, node_data) = {
            let mut problem = inner.problem.lock();
            if problem.submap_data().is_empty() {
                return;
            }
            problem.solve(&constraints);
            (problem.submap_data().to_vec(), problem.node_data().to_vec())
        };

        let mut guard = inner.state.lock();
        let state = &mut *guard;

        let num_optimized = state.scan_index_to_node_id.len();
        for scan_index in 0..num_optimized {
            let node_id = state.scan_index_to_node_id[scan_index];
            state.trajectory_nodes[scan_index].pose =
                node_data[node_id.trajectory_id][node_id.node_index].pose;
        }

        // Nodes appended while the solve ran are not in the optimized set
        // yet; jump them into the new global frame while preserving their
        // geometry relative to the submap frame.
        let mut extrapolation_transforms: HashMap<usize, Rigid3> = HashMap::new();
        for scan_index in num_optimized..state.trajectory_nodes.len() {
            let trajectory_id = state.trajectory_nodes[scan_index].constant.trajectory_id;
            let transform = *extrapolation_transforms
                .entry(trajectory_id)
                .or_insert_with(|| {
                    let new_transforms = extrapolate_submap_transforms(
                        &state.submap_states,
                        &submap_data,
                        trajectory_id,
                    );
                    let old_transforms = extrapolate_submap_transforms(
                        &state.submap_states,
                        &state.optimized_submap_transforms,
                        trajectory_id,
                    );
                    assert_eq!(new_transforms.len(), old_transforms.len());
                    new_transforms[new_transforms.len() - 1]
                        .compose(&old_transforms[old_transforms.len() - 1].inverse())
                });
            state.trajectory_nodes[scan_index].pose =
                transform.compose(&state.trajectory_nodes[scan_index].pose);
        }

        state.optimized_submap_transforms = submap_data;
        state.connected_components = inner.connectivity.connected_components();
        state.reverse_connected_components = state
            .connected_components
            .iter()
            .enumerate()
            .flat_map(|(component, ids)| ids.iter().map(move |&id| (id, component)))
            .collect();
    }
}

/// Global poses for every known submap of the trajectory: verbatim where the
/// snapshot has an entry, composed from the local-pose steps beyond it, and a
/// single identity for an unknown or submap-less trajectory.
fn extrapolate_submap_transforms(
    submap_states: &[Vec<SubmapState>],
    submap_transforms: &[Vec<SubmapData>],
    trajectory_id: usize,
) -> Vec<Rigid3> {
    let Some(states) = submap_states.get(trajectory_id) else {
        return vec![Rigid3::identity()];
    };

    let mut result: Vec<Rigid3> = Vec::new();
    for submap_state in states {
        let optimized = submap_transforms
            .get(trajectory_id)
            .and_then(|transforms| transforms.get(result.len()));
        if let Some(data) = optimized {
            // Covered by the last solve.
            result.push(data.pose);
        } else if result.is_empty() {
            result.push(Rigid3::identity());
        } else {
            // Compose the relative local-pose step onto the previous result.
            let previous = &states[result.len() - 1];
            let last = result[result.len() - 1];
            result.push(
                last.compose(&previous.submap.local_pose().inverse())
                    .compose(&submap_state.submap.local_pose()),
            );
        }
    }

    if result.is_empty() {
        result.push(Rigid3::identity());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::matching::test_utils::{
        submap_handle, test_trajectory, FakeConstraintBuilder, FakeSubmap,
    };
    use crate::engine::optimization::test_utils::RecordingOptimizationProblem;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix6, Vector3};

    fn graph_with_fakes(
        options: PoseGraphOptions,
    ) -> (
        SparsePoseGraph<FakeConstraintBuilder, RecordingOptimizationProblem>,
        FakeConstraintBuilder,
        RecordingOptimizationProblem,
    ) {
        let builder = FakeConstraintBuilder::new();
        let problem = RecordingOptimizationProblem::new();
        let graph = SparsePoseGraph::new(options, builder.clone(), problem.clone());
        (graph, builder, problem)
    }

    fn no_periodic_options() -> PoseGraphOptions {
        PoseGraphOptions {
            optimize_every_n_scans: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_local_to_global_is_identity_for_unknown_trajectory() {
        let (graph, _builder, _problem) = graph_with_fakes(no_periodic_options());
        let trajectory = test_trajectory();

        let transform = graph.local_to_global_transform(&trajectory);
        assert_relative_eq!(transform.translation(), Vector3::zeros());
        assert_relative_eq!(transform.rotation().angle(), 0.0);
    }

    #[test]
    fn test_first_scan_seeds_submap_zero_at_identity() {
        let (graph, _builder, problem) = graph_with_fakes(no_periodic_options());
        let trajectory = test_trajectory();
        let submap = FakeSubmap::new(Rigid3::identity());
        let handle = submap_handle(&submap);

        graph.add_scan(
            0,
            RangeData::empty(),
            Rigid3::from_translation(0.5, 0.0, 0.0),
            Matrix6::identity(),
            &trajectory,
            &handle,
            &[handle.clone()],
        );

        let added = problem.added_submaps();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].0, 0);
        assert_relative_eq!(added[0].1.translation(), Vector3::zeros());
    }

    #[test]
    fn test_repeated_registration_is_idempotent() {
        let (graph, _builder, problem) = graph_with_fakes(no_periodic_options());
        let trajectory = test_trajectory();
        let submap = FakeSubmap::new(Rigid3::identity());
        let handle = submap_handle(&submap);

        for i in 0..3 {
            graph.add_scan(
                i * 1000,
                RangeData::empty(),
                Rigid3::from_translation(i as f64 * 0.1, 0.0, 0.0),
                Matrix6::identity(),
                &trajectory,
                &handle,
                &[handle.clone()],
            );
        }

        let stats = graph.status();
        assert_eq!(stats.num_trajectories, 1);
        assert_eq!(stats.num_submaps, 1);
        assert_eq!(stats.num_trajectory_nodes, 3);
        // Submap 0 was only ever seeded once.
        assert_eq!(problem.added_submaps().len(), 1);
        // Node ids are dense within the trajectory.
        let nodes = problem.added_nodes();
        assert_eq!(nodes.len(), 3);
        assert!(nodes.iter().all(|(trajectory_id, _, _)| *trajectory_id == 0));
    }

    #[test]
    fn test_intra_constraints_reference_inserted_submaps() {
        let (graph, _builder, _problem) = graph_with_fakes(no_periodic_options());
        let trajectory = test_trajectory();
        let submap = FakeSubmap::new(Rigid3::identity());
        let handle = submap_handle(&submap);

        let pose = Rigid3::from_translation(1.0, 0.0, 0.0);
        graph.add_scan(
            0,
            RangeData::empty(),
            pose,
            Matrix6::identity(),
            &trajectory,
            &handle,
            &[handle.clone()],
        );

        let constraints = graph.constraints();
        assert_eq!(constraints.len(), 1);
        let constraint = &constraints[0];
        assert_eq!(constraint.kind, ConstraintKind::IntraSubmap);
        assert_eq!(
            constraint.submap_id,
            SubmapId {
                trajectory_id: 0,
                submap_index: 0
            }
        );
        // Identity submap local pose: the relative transform is the scan pose.
        assert_relative_eq!(
            constraint.pose.relative_transform.translation(),
            pose.translation(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_local_to_global_maps_local_pose_to_initial_global_pose() {
        let (graph, _builder, _problem) = graph_with_fakes(no_periodic_options());
        let trajectory = test_trajectory();
        let submap = FakeSubmap::new(Rigid3::from_translation(0.2, 0.0, 0.0));
        let handle = submap_handle(&submap);

        let local_pose = Rigid3::from_translation(1.0, 2.0, 0.0);
        graph.add_scan(
            0,
            RangeData::empty(),
            local_pose,
            Matrix6::identity(),
            &trajectory,
            &handle,
            &[handle.clone()],
        );

        let local_to_global = graph.local_to_global_transform(&trajectory);
        let expected = local_to_global.compose(&local_pose);
        let nodes = graph.trajectory_nodes();
        // The second scan's provisional pose uses exactly this transform.
        graph.add_scan(
            1000,
            RangeData::empty(),
            local_pose,
            Matrix6::identity(),
            &trajectory,
            &handle,
            &[handle.clone()],
        );
        let nodes_after = graph.trajectory_nodes();
        assert_eq!(nodes[0].len() + 1, nodes_after[0].len());
        assert_relative_eq!(
            nodes_after[0][1].pose.translation(),
            expected.translation(),
            epsilon = 1e-12
        );
    }
}
