//! Shared test doubles for driving the pose graph without real matchers.
//!
//! `FakeConstraintBuilder` mimics the threading contract of a real builder:
//! `when_done` callbacks are invoked from a dedicated worker thread, never
//! synchronously, so the deferred-mode plumbing is exercised for real.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};
use nalgebra::Matrix6;
use parking_lot::Mutex;

use crate::core::types::{NodeId, Rigid3, SubmapId};
use crate::engine::graph::{
    Constraint, ConstraintKind, ConstraintPose, TrajectoryConnectivity, TrajectoryNode,
};
use crate::engine::handles::{Submap, SubmapHandle, Trajectory, TrajectoryHandle};

use super::{ConstraintBuilder, WhenDoneCallback};

/// Submap stand-in with a settable local pose and finished flag.
pub struct FakeSubmap {
    local_pose: Rigid3,
    finished: AtomicBool,
}

impl FakeSubmap {
    /// Create an unfinished submap with the given local pose.
    pub fn new(local_pose: Rigid3) -> Arc<Self> {
        Arc::new(Self {
            local_pose,
            finished: AtomicBool::new(false),
        })
    }

    /// Flip the finished flag. Irreversible, like the real thing.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }
}

impl Submap for FakeSubmap {
    fn local_pose(&self) -> Rigid3 {
        self.local_pose
    }

    fn finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

/// Wrap a fake submap in the identity handle the back-end consumes.
pub fn submap_handle(submap: &Arc<FakeSubmap>) -> SubmapHandle {
    SubmapHandle::new(submap.clone())
}

/// Trajectory stand-in; only its identity matters.
pub struct TestTrajectory;

impl Trajectory for TestTrajectory {}

/// Create a fresh trajectory handle.
pub fn test_trajectory() -> TrajectoryHandle {
    TrajectoryHandle::new(Arc::new(TestTrajectory))
}

/// A proposal the back-end handed to the builder.
#[derive(Debug, Clone)]
pub struct Proposal {
    /// The submap end of the proposed match.
    pub submap_id: SubmapId,
    /// The node end of the proposed match.
    pub node_id: NodeId,
    /// Flat index of the scan.
    pub scan_index: usize,
    /// Pose prior for local matches; `None` for global matches.
    pub relative_pose: Option<Rigid3>,
}

enum WorkerMessage {
    Invoke(WhenDoneCallback, Vec<Constraint>),
    Shutdown,
}

#[derive(Default)]
struct FakeBuilderState {
    accept_local: bool,
    accept_global: bool,
    hold_callbacks: bool,
    proposals: Vec<Proposal>,
    pending_constraints: Vec<Constraint>,
    held: Vec<(WhenDoneCallback, Vec<Constraint>)>,
}

struct FakeBuilderInner {
    sender: Sender<WorkerMessage>,
    worker: Mutex<Option<JoinHandle<()>>>,
    finished_scans: AtomicUsize,
    state: Mutex<FakeBuilderState>,
}

impl Drop for FakeBuilderInner {
    fn drop(&mut self) {
        let _ = self.sender.send(WorkerMessage::Shutdown);
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

/// Constraint builder double.
///
/// Rejects every proposal by default. Tests can opt into accepting local
/// and/or global proposals; accepted ones are delivered through the next
/// `when_done` batch, and accepted global proposals also register the
/// cross-trajectory link, matching the real builder's contract. Clones share
/// all state, so a test keeps one clone while the pose graph owns another.
#[derive(Clone)]
pub struct FakeConstraintBuilder {
    inner: Arc<FakeBuilderInner>,
}

impl Default for FakeConstraintBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeConstraintBuilder {
    /// Create a builder with a running worker thread.
    pub fn new() -> Self {
        let (sender, receiver) = unbounded::<WorkerMessage>();
        let worker = thread::Builder::new()
            .name("fake-constraint-builder".into())
            .spawn(move || {
                while let Ok(message) = receiver.recv() {
                    match message {
                        WorkerMessage::Invoke(callback, constraints) => callback(constraints),
                        WorkerMessage::Shutdown => break,
                    }
                }
            })
            .expect("spawn fake constraint builder worker");

        Self {
            inner: Arc::new(FakeBuilderInner {
                sender,
                worker: Mutex::new(Some(worker)),
                finished_scans: AtomicUsize::new(0),
                state: Mutex::new(FakeBuilderState::default()),
            }),
        }
    }

    /// Accept (or reject) local match proposals from now on.
    pub fn accept_local_matches(&self, accept: bool) {
        self.inner.state.lock().accept_local = accept;
    }

    /// Accept (or reject) global match proposals from now on.
    pub fn accept_global_matches(&self, accept: bool) {
        self.inner.state.lock().accept_global = accept;
    }

    /// Park `when_done` callbacks instead of dispatching them, so a test can
    /// observe the graph's deferred mode.
    pub fn hold_callbacks(&self) {
        self.inner.state.lock().hold_callbacks = true;
    }

    /// Dispatch all parked callbacks in registration order and stop holding.
    pub fn release_callbacks(&self) {
        let held = {
            let mut state = self.inner.state.lock();
            state.hold_callbacks = false;
            std::mem::take(&mut state.held)
        };
        for (callback, constraints) in held {
            let _ = self
                .inner
                .sender
                .send(WorkerMessage::Invoke(callback, constraints));
        }
    }

    /// Every proposal received so far.
    pub fn proposals(&self) -> Vec<Proposal> {
        self.inner.state.lock().proposals.clone()
    }

    /// Number of local (pose-prior) proposals received.
    pub fn num_local_proposals(&self) -> usize {
        self.inner
            .state
            .lock()
            .proposals
            .iter()
            .filter(|p| p.relative_pose.is_some())
            .count()
    }

    /// Number of global (no-prior) proposals received.
    pub fn num_global_proposals(&self) -> usize {
        self.inner
            .state
            .lock()
            .proposals
            .iter()
            .filter(|p| p.relative_pose.is_none())
            .count()
    }
}

impl ConstraintBuilder for FakeConstraintBuilder {
    fn maybe_add_constraint(
        &self,
        submap_id: SubmapId,
        _submap: &SubmapHandle,
        node_id: NodeId,
        scan_index: usize,
        _trajectory_nodes: &[TrajectoryNode],
        relative_pose: Rigid3,
    ) {
        let mut state = self.inner.state.lock();
        state.proposals.push(Proposal {
            submap_id,
            node_id,
            scan_index,
            relative_pose: Some(relative_pose),
        });
        if state.accept_local {
            state.pending_constraints.push(Constraint {
                submap_id,
                node_id,
                pose: ConstraintPose {
                    relative_transform: relative_pose,
                    sqrt_information: Matrix6::identity(),
                },
                kind: ConstraintKind::InterSubmap,
            });
        }
    }

    fn maybe_add_global_constraint(
        &self,
        submap_id: SubmapId,
        _submap: &SubmapHandle,
        node_id: NodeId,
        scan_index: usize,
        connectivity: &Arc<TrajectoryConnectivity>,
        _trajectory_nodes: &[TrajectoryNode],
    ) {
        let mut state = self.inner.state.lock();
        state.proposals.push(Proposal {
            submap_id,
            node_id,
            scan_index,
            relative_pose: None,
        });
        if state.accept_global {
            connectivity.connect(node_id.trajectory_id, submap_id.trajectory_id);
            state.pending_constraints.push(Constraint {
                submap_id,
                node_id,
                pose: ConstraintPose {
                    relative_transform: Rigid3::identity(),
                    sqrt_information: Matrix6::identity(),
                },
                kind: ConstraintKind::InterSubmap,
            });
        }
    }

    fn notify_end_of_scan(&self, _scan_index: usize) {
        self.inner.finished_scans.fetch_add(1, Ordering::SeqCst);
    }

    fn when_done(&self, callback: WhenDoneCallback) {
        let mut state = self.inner.state.lock();
        let batch = std::mem::take(&mut state.pending_constraints);
        if state.hold_callbacks {
            state.held.push((callback, batch));
        } else {
            let _ = self
                .inner
                .sender
                .send(WorkerMessage::Invoke(callback, batch));
        }
    }

    fn num_finished_scans(&self) -> usize {
        self.inner.finished_scans.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_when_done_runs_on_worker_thread() {
        let builder = FakeConstraintBuilder::new();
        let (sender, receiver) = unbounded();
        builder.when_done(Box::new(move |constraints| {
            sender.send((thread::current().name().map(String::from), constraints.len())).ok();
        }));

        let (name, count) = receiver
            .recv_timeout(Duration::from_secs(5))
            .expect("callback should fire");
        assert_eq!(name.as_deref(), Some("fake-constraint-builder"));
        assert_eq!(count, 0);
    }

    #[test]
    fn test_held_callbacks_fire_in_order_after_release() {
        let builder = FakeConstraintBuilder::new();
        builder.hold_callbacks();

        let (sender, receiver) = unbounded();
        for i in 0..3 {
            let sender = sender.clone();
            builder.when_done(Box::new(move |_| {
                sender.send(i).ok();
            }));
        }
        assert!(receiver.try_recv().is_err());

        builder.release_callbacks();
        let order: Vec<i32> = (0..3)
            .map(|_| receiver.recv_timeout(Duration::from_secs(5)).expect("callback"))
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_finished_scan_counter() {
        let builder = FakeConstraintBuilder::new();
        assert_eq!(builder.num_finished_scans(), 0);
        builder.notify_end_of_scan(0);
        builder.notify_end_of_scan(1);
        assert_eq!(builder.num_finished_scans(), 2);
    }
}
