//! Core data types for the pose-graph back-end.
//!
//! - [`Rigid3`]: rigid 3D transform (unit quaternion + translation)
//! - [`PoseCovariance`]: 6x6 pose covariance
//! - [`NodeId`] / [`SubmapId`]: dense per-trajectory identifiers
//! - [`RangeData`]: lidar returns in the tracking frame
//! - [`ImuReading`]: inertial sample

mod ids;
mod imu;
mod rigid;
mod scan;

pub use ids::{NodeId, SubmapId};
pub use imu::ImuReading;
pub use rigid::{PoseCovariance, Rigid3};
pub use scan::RangeData;
