//! Configuration for the pose-graph back-end.

use serde::Deserialize;
use thiserror::Error;

/// Invalid configuration value.
#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("global_sampling_ratio must be within [0, 1], got {0}")]
    InvalidSamplingRatio(f64),

    #[error("lower_covariance_eigenvalue_bound must be positive, got {0}")]
    InvalidEigenvalueBound(f64),

    #[error("max_num_final_iterations must be positive")]
    InvalidFinalIterations,
}

/// Options consumed by constraint-builder implementations.
#[derive(Debug, Clone, Deserialize)]
pub struct ConstraintBuilderOptions {
    /// Floor applied to covariance eigenvalues before inversion.
    #[serde(default = "default_eigenvalue_bound")]
    pub lower_covariance_eigenvalue_bound: f64,

    /// Minimum matcher score for accepting a local match.
    #[serde(default = "default_min_score")]
    pub min_score: f64,

    /// Minimum matcher score for accepting a global match.
    #[serde(default = "default_global_min_score")]
    pub global_localization_min_score: f64,
}

impl Default for ConstraintBuilderOptions {
    fn default() -> Self {
        Self {
            lower_covariance_eigenvalue_bound: default_eigenvalue_bound(),
            min_score: default_min_score(),
            global_localization_min_score: default_global_min_score(),
        }
    }
}

/// Nested solver options passed through to the optimization problem.
#[derive(Debug, Clone, Deserialize)]
pub struct OptimizationOptions {
    /// Iteration cap for periodic solves.
    #[serde(default = "default_max_iterations")]
    pub max_num_iterations: u32,

    /// Relative error change below which a solve terminates.
    #[serde(default = "default_convergence_threshold")]
    pub convergence_threshold: f64,

    /// Initial Levenberg-Marquardt damping factor.
    #[serde(default = "default_damping")]
    pub damping_factor: f64,
}

impl Default for OptimizationOptions {
    fn default() -> Self {
        Self {
            max_num_iterations: default_max_iterations(),
            convergence_threshold: default_convergence_threshold(),
            damping_factor: default_damping(),
        }
    }
}

/// Top-level pose-graph options.
#[derive(Debug, Clone, Deserialize)]
pub struct PoseGraphOptions {
    /// Run an optimization after this many scans; 0 disables periodic solves.
    #[serde(default = "default_optimize_every_n_scans")]
    pub optimize_every_n_scans: u32,

    /// Iteration cap used for the final optimization.
    #[serde(default = "default_final_iterations")]
    pub max_num_final_iterations: u32,

    /// Probability of proposing a global match per cross-trajectory pair.
    #[serde(default = "default_sampling_ratio")]
    pub global_sampling_ratio: f64,

    /// Options forwarded to the constraint builder.
    #[serde(default)]
    pub constraint_builder: ConstraintBuilderOptions,

    /// Options forwarded to the optimization problem.
    #[serde(default)]
    pub optimization: OptimizationOptions,
}

impl Default for PoseGraphOptions {
    fn default() -> Self {
        Self {
            optimize_every_n_scans: default_optimize_every_n_scans(),
            max_num_final_iterations: default_final_iterations(),
            global_sampling_ratio: default_sampling_ratio(),
            constraint_builder: ConstraintBuilderOptions::default(),
            optimization: OptimizationOptions::default(),
        }
    }
}

impl PoseGraphOptions {
    /// Reject option values the back-end cannot operate with.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if !(0.0..=1.0).contains(&self.global_sampling_ratio) {
            return Err(OptionsError::InvalidSamplingRatio(
                self.global_sampling_ratio,
            ));
        }
        if self.constraint_builder.lower_covariance_eigenvalue_bound <= 0.0 {
            return Err(OptionsError::InvalidEigenvalueBound(
                self.constraint_builder.lower_covariance_eigenvalue_bound,
            ));
        }
        if self.max_num_final_iterations == 0 {
            return Err(OptionsError::InvalidFinalIterations);
        }
        Ok(())
    }
}

fn default_optimize_every_n_scans() -> u32 {
    90
}

fn default_final_iterations() -> u32 {
    200
}

fn default_sampling_ratio() -> f64 {
    0.003
}

fn default_eigenvalue_bound() -> f64 {
    1e-11
}

fn default_min_score() -> f64 {
    0.55
}

fn default_global_min_score() -> f64 {
    0.6
}

fn default_max_iterations() -> u32 {
    50
}

fn default_convergence_threshold() -> f64 {
    1e-6
}

fn default_damping() -> f64 {
    1e-4
}
