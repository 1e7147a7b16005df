//! Lidar range data in the tracking frame.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// A single lidar observation: ray origin plus hit and miss endpoints.
///
/// Points are stored in the tracking frame at `f32` precision, matching the
/// sensor. Compression of finished scans is the front-end codec's concern;
/// the back-end stores what it is handed and never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeData {
    /// Sensor origin at scan time.
    pub origin: Vector3<f32>,
    /// Ray endpoints that hit an obstacle.
    pub returns: Vec<Vector3<f32>>,
    /// Ray endpoints that reached max range without a hit.
    pub misses: Vec<Vector3<f32>>,
}

impl RangeData {
    /// Range data with no rays, useful as a placeholder in tests.
    pub fn empty() -> Self {
        Self {
            origin: Vector3::zeros(),
            returns: Vec::new(),
            misses: Vec::new(),
        }
    }
}
