#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Pinhole camera model with optional polynomial distortion.
pub mod camera;

/// Raw depth conversion and back-projection.
pub mod depth;

/// Error types for the preprocessing stage.
pub mod error;

/// Per-pixel normal estimation.
pub mod normals;

/// Multi-resolution point/normal pyramids.
pub mod pyramid;

/// Analytic scenes rendered into depth maps.
pub mod synthetic;

pub use camera::{PinholeCamera, PolynomialDistortion};
pub use error::PreprocError;
pub use pyramid::{Pyramid, PyramidLevel};
