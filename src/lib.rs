//! DhruvaGraph - sparse pose-graph back-end for 3D lidar SLAM.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    engine/                          │  ← Orchestration
//! │      (graph, matching + optimization seams)         │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     core/                           │  ← Foundation
//! │                 (types, math)                       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! The front-end (local scan matching, submap building) feeds scans and IMU
//! samples into a [`SparsePoseGraph`], which maintains a globally consistent
//! estimate of every scan and submap pose:
//!
//! - Intra-submap constraints are authored synchronously as scans arrive.
//! - Inter-submap (loop closure) constraints come from a pluggable
//!   [`ConstraintBuilder`] running on its own threads.
//! - A background solve is triggered every `optimize_every_n_scans` scans;
//!   while it runs, ingestion work buffers up and is drained afterwards, so
//!   adding scans never waits on the solver.
//! - Queries re-project not-yet-optimized submaps and nodes onto the latest
//!   optimized frame.
//!
//! Trajectories and submaps stay owned by the front-end and are referred to
//! through identity [`handles`](engine::handles).

// ============================================================================
// Layer 1: Core foundation (no internal deps)
// ============================================================================
pub mod core;

// ============================================================================
// Layer 2: Engine (depends on core)
// ============================================================================
pub mod engine;

// ============================================================================
// Convenience re-exports (flat namespace for common use)
// ============================================================================

// Core types
pub use crate::core::math;
pub use crate::core::types::{ImuReading, NodeId, PoseCovariance, RangeData, Rigid3, SubmapId};

// Engine - handles
pub use engine::handles::{Submap, SubmapHandle, Trajectory, TrajectoryHandle};

// Engine - graph
pub use engine::graph::{
    Constraint, ConstraintBuilderOptions, ConstraintKind, ConstraintPose, FixedRatioSampler,
    OptimizationOptions, OptionsError, PoseGraphOptions, PoseGraphStats, SparsePoseGraph,
    TrajectoryConnectivity, TrajectoryNode,
};

// Engine - collaborator seams
pub use engine::matching::ConstraintBuilder;
pub use engine::optimization::{GraphOptimizer, NodeData, OptimizationProblem, SubmapData};
