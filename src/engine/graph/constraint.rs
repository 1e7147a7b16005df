//! Relative-pose constraints between submaps and trajectory nodes.

use nalgebra::Matrix6;
use serde::{Deserialize, Serialize};

use crate::core::types::{NodeId, Rigid3, SubmapId};

/// Measured relative pose plus its weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConstraintPose {
    /// Pose of the node in the submap frame.
    pub relative_transform: Rigid3,
    /// Square root of the information (inverse covariance) matrix.
    pub sqrt_information: Matrix6<f64>,
}

/// How a constraint was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// Authored locally when the scan was inserted into the submap.
    IntraSubmap,
    /// Loop closure reported by the constraint builder for a scan that was
    /// not inserted into the submap.
    InterSubmap,
}

/// A rigid-pose edge of the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    /// The submap end of the edge.
    pub submap_id: SubmapId,
    /// The node end of the edge.
    pub node_id: NodeId,
    /// Measurement and weight.
    pub pose: ConstraintPose,
    /// Origin of the constraint.
    pub kind: ConstraintKind,
}
