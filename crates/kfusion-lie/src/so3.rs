//! # SO(3): the Special Orthogonal Group in 3D
//!
//! SO(3) is the group of 3D rotations: 3×3 orthogonal matrices with determinant +1.
//!
//! [`SO3`] stores the rotation matrix directly. Incremental updates coming from
//! a linearized solver slowly push the matrix off the manifold, so every update
//! path re-orthonormalizes the result (see [`SO3::renormalize`]).
//!
//! ## The exp/log maps
//!
//! The Lie algebra **so(3)** is the space of 3×3 skew-symmetric matrices, isomorphic
//! to R³ via the hat operator. A vector `v ∈ R³` represents an axis-angle rotation:
//! the direction is the rotation axis, the magnitude is the angle in radians.
//!
//! - `exp(v)`: axis-angle vector → rotation matrix (Rodrigues' formula).
//! - `log()`: rotation matrix → axis-angle vector. Inverse of exp.

use std::ops::Mul;

use glam::{Mat3, Quat, Vec3};
use rand::Rng;
use serde::{Deserialize, Serialize};

const SMALL_ANGLE_EPSILON: f32 = 1.0e-6;

/// A 3D rotation, stored as an orthonormal 3x3 matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SO3 {
    r: Mat3,
}

impl Default for SO3 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl SO3 {
    /// The identity rotation.
    pub const IDENTITY: Self = Self { r: Mat3::IDENTITY };

    /// Create a rotation from a 3x3 matrix.
    ///
    /// The matrix is projected back onto SO(3), so slightly non-orthonormal
    /// inputs are accepted.
    pub fn from_matrix(mat: &Mat3) -> Self {
        Self { r: *mat }.renormalize()
    }

    /// Create a rotation from a unit quaternion.
    pub fn from_quaternion(quat: &Quat) -> Self {
        Self {
            r: Mat3::from_quat(quat.normalize()),
        }
    }

    /// Create a rotation of `angle` radians about `axis`.
    pub fn from_axis_angle(axis: Vec3, angle: f32) -> Self {
        Self::exp(axis.normalize_or_zero() * angle)
    }

    /// Draw a uniformly distributed random rotation (Shoemake method).
    pub fn from_random() -> Self {
        let mut rng = rand::rng();

        let r1: f32 = rng.random();
        let r2: f32 = rng.random();
        let r3: f32 = rng.random();

        let one_minus_r1_sqrt = (1.0 - r1).sqrt();
        let r1_sqrt = r1.sqrt();

        let w = one_minus_r1_sqrt * (2.0 * std::f32::consts::PI * r2).cos();
        let x = one_minus_r1_sqrt * (2.0 * std::f32::consts::PI * r2).sin();
        let y = r1_sqrt * (2.0 * std::f32::consts::PI * r3).cos();
        let z = r1_sqrt * (2.0 * std::f32::consts::PI * r3).sin();

        Self::from_quaternion(&Quat::from_xyzw(x, y, z, w))
    }

    /// The rotation as a 3x3 matrix.
    #[inline]
    pub fn matrix(&self) -> Mat3 {
        self.r
    }

    /// The rotation as a unit quaternion.
    pub fn to_quaternion(&self) -> Quat {
        Quat::from_mat3(&self.r).normalize()
    }

    /// The inverse rotation, i.e. the transpose of the matrix.
    #[inline]
    pub fn inverse(&self) -> Self {
        Self {
            r: self.r.transpose(),
        }
    }

    /// Rotate a vector.
    #[inline]
    pub fn transform(&self, v: Vec3) -> Vec3 {
        self.r * v
    }

    /// Project the matrix back onto SO(3) with a Gram-Schmidt pass.
    ///
    /// The first column keeps its direction, the second is made orthogonal to
    /// it and the third is rebuilt as their cross product, which also fixes
    /// the determinant to +1.
    pub fn renormalize(self) -> Self {
        let x = self.r.x_axis.normalize_or_zero();
        let y = (self.r.y_axis - x * x.dot(self.r.y_axis)).normalize_or_zero();
        if x == Vec3::ZERO || y == Vec3::ZERO {
            return Self::IDENTITY;
        }
        let z = x.cross(y);
        Self {
            r: Mat3::from_cols(x, y, z),
        }
    }

    /// Lie algebra -> Lie group (Rodrigues' formula).
    pub fn exp(v: Vec3) -> Self {
        let theta = v.length();
        let k = Self::hat(v);
        if theta < SMALL_ANGLE_EPSILON {
            // first order expansion, re-orthonormalized
            return Self {
                r: Mat3::IDENTITY + k,
            }
            .renormalize();
        }
        let a = theta.sin() / theta;
        let b = (1.0 - theta.cos()) / (theta * theta);
        Self {
            r: Mat3::IDENTITY + k * a + (k * k) * b,
        }
    }

    /// Lie group -> Lie algebra.
    pub fn log(&self) -> Vec3 {
        let cos_theta = ((self.r.x_axis.x + self.r.y_axis.y + self.r.z_axis.z - 1.0) * 0.5)
            .clamp(-1.0, 1.0);
        let theta = cos_theta.acos();
        let skew = Self::vee(self.r - self.r.transpose());

        if theta < SMALL_ANGLE_EPSILON {
            return skew * 0.5;
        }

        if std::f32::consts::PI - theta < 1.0e-3 {
            // near pi the skew part vanishes, recover the axis from R + I
            let b = (self.r + Mat3::IDENTITY) * 0.5;
            let diag = [b.x_axis.x, b.y_axis.y, b.z_axis.z];
            let (i, d) = diag
                .iter()
                .enumerate()
                .fold((0, f32::MIN), |acc, (i, &d)| if d > acc.1 { (i, d) } else { acc });
            let mut axis = b.col(i) / d.max(f32::EPSILON).sqrt();
            // keep the sign consistent with the (small) skew part
            if axis.dot(skew) < 0.0 {
                axis = -axis;
            }
            return axis.normalize_or_zero() * theta;
        }

        skew * (theta / (2.0 * theta.sin()))
    }

    /// The rotation angle in radians, in `[0, pi]`.
    pub fn angle(&self) -> f32 {
        self.log().length()
    }

    /// Vector space -> Lie algebra.
    pub fn hat(v: Vec3) -> Mat3 {
        Mat3::from_cols(
            Vec3::new(0.0, v.z, -v.y),
            Vec3::new(-v.z, 0.0, v.x),
            Vec3::new(v.y, -v.x, 0.0),
        )
    }

    /// Lie algebra -> vector space.
    pub fn vee(omega: Mat3) -> Vec3 {
        Vec3::new(omega.y_axis.z, omega.z_axis.x, omega.x_axis.y)
    }

    /// Left Jacobian of the exponential map.
    pub fn left_jacobian(v: Vec3) -> Mat3 {
        let skew = Self::hat(v);
        let theta = v.length();
        if theta < SMALL_ANGLE_EPSILON {
            return Mat3::IDENTITY + skew * 0.5;
        }
        let theta2 = theta * theta;
        Mat3::IDENTITY
            + skew * ((1.0 - theta.cos()) / theta2)
            + (skew * skew) * ((theta - theta.sin()) / (theta2 * theta))
    }
}

impl Mul for SO3 {
    type Output = SO3;

    fn mul(self, rhs: Self) -> Self::Output {
        Self { r: self.r * rhs.r }
    }
}

impl Mul<Vec3> for SO3 {
    type Output = Vec3;

    fn mul(self, rhs: Vec3) -> Self::Output {
        self.transform(rhs)
    }
}
