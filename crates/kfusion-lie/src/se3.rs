use std::ops::Mul;

use glam::{Mat3, Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::so3::SO3;

const SMALL_ANGLE_EPSILON: f32 = 1.0e-6;

/// A rigid body transformation in 3D.
///
/// The tangent vector convention is `xi = [omega, upsilon]`: the first three
/// entries are the rotation (axis-angle), the last three the translation part.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SE3 {
    rotation: SO3,
    translation: Vec3,
}

impl Default for SE3 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl SE3 {
    /// The identity transformation.
    pub const IDENTITY: Self = Self {
        rotation: SO3::IDENTITY,
        translation: Vec3::ZERO,
    };

    /// Create a transformation from a rotation and a translation.
    pub fn new(rotation: SO3, translation: Vec3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// A pure rotation.
    pub fn from_rotation(rotation: SO3) -> Self {
        Self::new(rotation, Vec3::ZERO)
    }

    /// A pure translation.
    pub fn from_translation(translation: Vec3) -> Self {
        Self::new(SO3::IDENTITY, translation)
    }

    /// Create a transformation from a homogeneous 4x4 matrix.
    pub fn from_matrix(mat: &Mat4) -> Self {
        let rotation = SO3::from_matrix(&Mat3::from_mat4(*mat));
        Self::new(rotation, mat.w_axis.truncate())
    }

    /// The rotation part.
    #[inline]
    pub fn rotation(&self) -> SO3 {
        self.rotation
    }

    /// The translation part.
    #[inline]
    pub fn translation(&self) -> Vec3 {
        self.translation
    }

    /// The homogeneous 4x4 matrix.
    pub fn matrix(&self) -> Mat4 {
        let r = self.rotation.matrix();
        Mat4::from_cols(
            r.x_axis.extend(0.0),
            r.y_axis.extend(0.0),
            r.z_axis.extend(0.0),
            Vec4::new(self.translation.x, self.translation.y, self.translation.z, 1.0),
        )
    }

    /// The inverse transformation.
    pub fn inverse(&self) -> Self {
        let inv_rot = self.rotation.inverse();
        Self::new(inv_rot, -(inv_rot * self.translation))
    }

    /// Apply the transformation to a point.
    #[inline]
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        self.rotation * p + self.translation
    }

    /// Apply only the rotation to a direction.
    #[inline]
    pub fn transform_vector(&self, v: Vec3) -> Vec3 {
        self.rotation * v
    }

    /// Lie algebra -> Lie group.
    pub fn exp(xi: [f32; 6]) -> Self {
        let omega = Vec3::new(xi[0], xi[1], xi[2]);
        let upsilon = Vec3::new(xi[3], xi[4], xi[5]);
        let rotation = SO3::exp(omega);
        Self::new(rotation, SO3::left_jacobian(omega) * upsilon)
    }

    /// Lie group -> Lie algebra.
    pub fn log(&self) -> [f32; 6] {
        let omega = self.rotation.log();
        let theta = omega.length();
        let upsilon = if theta < SMALL_ANGLE_EPSILON {
            self.translation - 0.5 * omega.cross(self.translation)
        } else {
            // closed form inverse of the left jacobian
            let k = SO3::hat(omega);
            let half = 0.5 * theta;
            let c = (1.0 - half * half.cos() / half.sin()) / (theta * theta);
            (Mat3::IDENTITY - k * 0.5 + (k * k) * c) * self.translation
        };
        [omega.x, omega.y, omega.z, upsilon.x, upsilon.y, upsilon.z]
    }

    /// Left multiplicative update `exp(xi) * self`, followed by a rotation
    /// re-orthonormalization.
    pub fn retract(&self, xi: [f32; 6]) -> Self {
        (Self::exp(xi) * *self).renormalize()
    }

    /// Project the rotation part back onto SO(3).
    pub fn renormalize(self) -> Self {
        Self::new(self.rotation.renormalize(), self.translation)
    }

    /// Rotation angle in radians of `self^-1 * other`.
    pub fn angle_to(&self, other: &SE3) -> f32 {
        (self.rotation.inverse() * other.rotation).angle()
    }

    /// Euclidean distance between the two translations.
    pub fn distance_to(&self, other: &SE3) -> f32 {
        (self.translation - other.translation).length()
    }

    /// True if every entry is finite.
    pub fn is_finite(&self) -> bool {
        self.rotation.matrix().is_finite() && self.translation.is_finite()
    }
}

impl Mul for SE3 {
    type Output = SE3;

    fn mul(self, rhs: SE3) -> Self::Output {
        Self::new(
            self.rotation * rhs.rotation,
            self.translation + self.rotation * rhs.translation,
        )
    }
}

impl Mul<Vec3> for SE3 {
    type Output = Vec3;

    fn mul(self, rhs: Vec3) -> Self::Output {
        self.transform_point(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_identity() {
        let p = Vec3::new(1.0, -2.0, 3.0);
        assert_eq!(SE3::IDENTITY * p, p);
        assert_eq!(SE3::IDENTITY.log(), [0.0; 6]);
    }

    #[test]
    fn test_exp_log() {
        let xi = [0.1, -0.2, 0.3, 0.5, -0.4, 1.0];
        let log = SE3::exp(xi).log();
        for (a, b) in xi.iter().zip(log.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_pure_translation() {
        let pose = SE3::exp([0.0, 0.0, 0.0, 1.0, 2.0, 3.0]);
        assert_eq!(pose.rotation(), SO3::IDENTITY);
        assert!((pose.translation() - Vec3::new(1.0, 2.0, 3.0)).length() < 1e-6);
    }

    #[test]
    fn test_inverse_compose() {
        let pose = SE3::new(
            SO3::from_axis_angle(Vec3::new(1.0, 1.0, 0.0), 0.7),
            Vec3::new(0.3, -1.0, 2.0),
        );
        let p = Vec3::new(0.5, 0.25, -1.0);
        let back = pose.inverse() * (pose * p);
        assert!((back - p).length() < 1e-5);

        let identity = pose * pose.inverse();
        assert!(identity.angle_to(&SE3::IDENTITY) < 1e-3);
        assert!(identity.distance_to(&SE3::IDENTITY) < 1e-5);
    }

    #[test]
    fn test_matrix_roundtrip() {
        let pose = SE3::new(SO3::from_random(), Vec3::new(1.0, 2.0, 3.0));
        let back = SE3::from_matrix(&pose.matrix());
        assert!(pose.angle_to(&back) < 1e-3);
        assert!(pose.distance_to(&back) < 1e-6);
        let p = Vec3::new(-1.0, 0.5, 2.0);
        assert!((pose.matrix().transform_point3(p) - pose * p).length() < 1e-5);
    }

    #[test]
    fn test_retract_is_left_update() {
        let pose = SE3::new(SO3::from_axis_angle(Vec3::Z, 0.2), Vec3::new(0.0, 1.0, 0.0));
        let xi = [0.0, 0.0, 0.1, 0.0, 0.0, 0.0];
        let updated = pose.retract(xi);
        // rotating about z on the left also rotates the translation
        assert_relative_eq!(updated.rotation().angle(), 0.3, epsilon = 1e-5);
        let expected_t = SO3::from_axis_angle(Vec3::Z, 0.1) * Vec3::new(0.0, 1.0, 0.0);
        assert!((updated.translation() - expected_t).length() < 1e-6);
    }
}
