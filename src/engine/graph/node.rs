//! Trajectory nodes: one per ingested scan.

use std::sync::Arc;

use crate::core::types::{RangeData, Rigid3};

/// Immutable per-scan payload, shared with the constraint builder by index.
///
/// Stored behind an `Arc` in the append-only node list; matchers clone the
/// `Arc` and must never outlive it holding anything else.
#[derive(Debug)]
pub struct ConstantData {
    /// Scan timestamp in microseconds.
    pub timestamp_us: u64,
    /// Range data in the tracking frame.
    pub range_data: RangeData,
    /// Dense id of the trajectory this scan belongs to.
    pub trajectory_id: usize,
    /// Transform from the tracking frame to the sensor frame.
    pub tracking_to_sensor: Rigid3,
}

/// A vertex of the pose graph: shared constant data plus the current best
/// global pose estimate.
///
/// The pose field is rewritten only by the optimization driver.
#[derive(Debug, Clone)]
pub struct TrajectoryNode {
    /// Immutable scan payload.
    pub constant: Arc<ConstantData>,
    /// Current global pose estimate of the scan.
    pub pose: Rigid3,
}
