//! Pose-graph bookkeeping and the back-end itself.
//!
//! The graph grows two parallel structures as scans arrive: a flat list of
//! [`TrajectoryNode`]s in ingestion order and per-trajectory submap states.
//! Constraints relate submaps to nodes; [`SparsePoseGraph`] orchestrates
//! ingestion, background loop closure, and optimization.

mod connectivity;
mod constraint;
mod node;
mod options;
mod sampler;
mod sparse_pose_graph;
mod work_queue;

pub use connectivity::TrajectoryConnectivity;
pub use constraint::{Constraint, ConstraintKind, ConstraintPose};
pub use node::{ConstantData, TrajectoryNode};
pub use options::{
    ConstraintBuilderOptions, OptimizationOptions, OptionsError, PoseGraphOptions,
};
pub use sampler::FixedRatioSampler;
pub use sparse_pose_graph::{PoseGraphStats, SparsePoseGraph};
pub use work_queue::{WorkItem, WorkQueue};
