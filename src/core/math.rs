//! Numerical primitives for constraint weighting.

use nalgebra::{Matrix6, SymmetricEigen};

use crate::core::types::PoseCovariance;

/// Inverse square root of a symmetric positive semi-definite matrix.
///
/// Computed by symmetric eigendecomposition with every eigenvalue clamped up
/// to `lower_eigenvalue_bound` before inversion, so rank-deficient or
/// ill-conditioned covariances still yield a finite square-root information
/// matrix. A Cholesky factorization would reject exactly the inputs this
/// needs to accept.
pub fn spd_sqrt_inverse(
    covariance: &PoseCovariance,
    lower_eigenvalue_bound: f64,
) -> Matrix6<f64> {
    let eigen = SymmetricEigen::new(*covariance);
    let mut result = Matrix6::zeros();
    for i in 0..6 {
        let lambda = eigen.eigenvalues[i].max(lower_eigenvalue_bound);
        let v = eigen.eigenvectors.column(i).clone_owned();
        result += v * v.transpose() / lambda.sqrt();
    }
    result
}
