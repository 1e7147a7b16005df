//! Rigid 3D transform type used for every pose in the back-end.

use nalgebra::{Matrix6, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// 6x6 covariance of a 3D pose, ordered translation (x, y, z) then rotation.
pub type PoseCovariance = Matrix6<f64>;

/// Rigid 3D transform: rotation (unit quaternion) followed by translation.
///
/// All pose bookkeeping in the graph is done in `f64`; raw sensor points stay
/// `f32` (see [`crate::core::types::RangeData`]).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rigid3 {
    translation: Vector3<f64>,
    rotation: UnitQuaternion<f64>,
}

impl Rigid3 {
    /// Identity transform.
    #[inline]
    pub fn identity() -> Self {
        Self {
            translation: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
        }
    }

    /// Create a transform from translation and rotation.
    #[inline]
    pub fn new(translation: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// Pure translation.
    #[inline]
    pub fn from_translation(x: f64, y: f64, z: f64) -> Self {
        Self {
            translation: Vector3::new(x, y, z),
            rotation: UnitQuaternion::identity(),
        }
    }

    /// Pure rotation.
    #[inline]
    pub fn from_rotation(rotation: UnitQuaternion<f64>) -> Self {
        Self {
            translation: Vector3::zeros(),
            rotation,
        }
    }

    /// Translation component.
    #[inline]
    pub fn translation(&self) -> Vector3<f64> {
        self.translation
    }

    /// Rotation component.
    #[inline]
    pub fn rotation(&self) -> UnitQuaternion<f64> {
        self.rotation
    }

    /// Compose two transforms: `self ∘ other` (apply `other`, then `self`).
    #[inline]
    pub fn compose(&self, other: &Rigid3) -> Rigid3 {
        Rigid3 {
            translation: self.translation + self.rotation * other.translation,
            rotation: self.rotation * other.rotation,
        }
    }

    /// Inverse of this transform.
    #[inline]
    pub fn inverse(&self) -> Rigid3 {
        let rotation = self.rotation.inverse();
        Rigid3 {
            translation: -(rotation * self.translation),
            rotation,
        }
    }

    /// Transform a point from the local frame into the parent frame.
    #[inline]
    pub fn transform_point(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * point + self.translation
    }
}

impl Default for Rigid3 {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn yaw(angle: f64) -> UnitQuaternion<f64> {
        UnitQuaternion::from_scaled_axis(Vector3::new(0.0, 0.0, angle))
    }

    #[test]
    fn test_compose_identity() {
        let t = Rigid3::new(Vector3::new(1.0, 2.0, 3.0), yaw(0.5));
        let result = t.compose(&Rigid3::identity());

        assert_relative_eq!(result.translation(), t.translation());
        assert_relative_eq!(result.rotation().angle_to(&t.rotation()), 0.0);
    }

    #[test]
    fn test_inverse_roundtrip() {
        let t = Rigid3::new(Vector3::new(1.0, -2.0, 0.5), yaw(0.8));
        let roundtrip = t.compose(&t.inverse());

        assert_relative_eq!(roundtrip.translation().norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(roundtrip.rotation().angle(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_compose_order() {
        let forward = Rigid3::from_translation(1.0, 0.0, 0.0);
        let rotate = Rigid3::from_rotation(yaw(FRAC_PI_2));

        // Translate then rotate: the translation is unaffected.
        let a = forward.compose(&rotate);
        assert_relative_eq!(a.translation(), Vector3::new(1.0, 0.0, 0.0), epsilon = 1e-12);

        // Rotate then translate: the translation is rotated into +y.
        let b = rotate.compose(&forward);
        assert_relative_eq!(b.translation(), Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_transform_point() {
        let t = Rigid3::new(Vector3::new(1.0, 0.0, 0.0), yaw(FRAC_PI_2));
        let p = t.transform_point(&Vector3::new(1.0, 0.0, 0.0));

        assert_relative_eq!(p, Vector3::new(1.0, 1.0, 0.0), epsilon = 1e-12);
    }
}
