//! Deferred work items buffered around background optimizations.
//!
//! Ingestion runs work inline while no optimization is pending; once one is,
//! items queue up and the optimization driver drains them in FIFO order.
//! Items are a tagged enum carrying only ids and values, never references
//! into mutable graph state, which keeps them trivially replayable.

use std::collections::VecDeque;

use crate::core::types::{ImuReading, PoseCovariance, Rigid3};
use crate::engine::handles::SubmapHandle;

/// A unit of deferred ingestion work.
#[derive(Debug)]
pub enum WorkItem {
    /// Run constraint computation for the scan at `scan_index`.
    ComputeConstraintsForScan {
        /// Flat index assigned to the scan at ingestion.
        scan_index: usize,
        /// The submap the scan was matched against.
        matching_submap: SubmapHandle,
        /// The submaps the scan was inserted into, oldest first.
        insertion_submaps: Vec<SubmapHandle>,
        /// The first insertion submap, if it was finished at call time.
        finished_submap: Option<SubmapHandle>,
        /// Local pose estimate of the scan.
        pose: Rigid3,
        /// Covariance of the local pose estimate.
        covariance: PoseCovariance,
    },
    /// Push an IMU sample into the optimization problem.
    AddImuData {
        /// Dense id of the trajectory the sample belongs to.
        trajectory_id: usize,
        /// The sample.
        reading: ImuReading,
    },
}

/// FIFO of deferred work. Present only while an optimization is pending or
/// draining; `None` means ingestion runs synchronously.
pub type WorkQueue = VecDeque<WorkItem>;
