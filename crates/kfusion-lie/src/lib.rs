#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # kfusion Lie Groups
//!
//! Rotations and rigid body transformations used to represent the sensor pose
//! while tracking against the fused model.
//!
//! ## Supported Groups
//!
//! - **SO(3)**: 3D rotation group, stored as an orthonormal 3x3 matrix
//! - **SE(3)**: 3D rigid body transformations (rotation + translation)
//!
//! ## Example
//!
//! ```rust
//! use glam::Vec3;
//! use kfusion_lie::se3::SE3;
//!
//! // a small twist: rotation about z followed by a translation along x
//! let pose = SE3::exp([0.0, 0.0, 0.1, 0.05, 0.0, 0.0]);
//!
//! // apply the transformation to a point
//! let point = pose * Vec3::new(1.0, 0.0, 0.0);
//! assert!(point.is_finite());
//! ```

/// Special Euclidean group SE(3) for 3D rigid transformations.
pub mod se3;

/// Special Orthogonal group SO(3) for 3D rotations.
pub mod so3;

pub use se3::SE3;
pub use so3::SO3;
