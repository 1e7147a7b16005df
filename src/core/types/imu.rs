//! Inertial measurement sample.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// A single IMU sample in the tracking frame.
///
/// The back-end only routes these into the optimization problem's
/// per-trajectory series; preintegration happens inside the solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImuReading {
    /// Sample timestamp in microseconds.
    pub timestamp_us: u64,
    /// Linear acceleration in m/s².
    pub linear_acceleration: Vector3<f64>,
    /// Angular velocity in rad/s.
    pub angular_velocity: Vector3<f64>,
}
