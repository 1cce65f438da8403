use kfusion_3d::PreprocError;
use kfusion_image::ImageSize;

/// Errors raised by the volume.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum VolumeError {
    /// The world bounds are empty or not finite.
    #[error("invalid grid bounds: min {min:?} must be below max {max:?}")]
    InvalidBounds {
        /// Lower corner.
        min: [f32; 3],
        /// Upper corner.
        max: [f32; 3],
    },

    /// The grid resolution is too small or too large.
    #[error("invalid grid resolution {0:?}, every axis needs at least 2 cells")]
    InvalidResolution([usize; 3]),

    /// The fusion parameters are out of range.
    #[error("invalid volume parameters: {0}")]
    InvalidParams(String),

    /// The depth map does not match the camera resolution.
    #[error("depth size {actual} does not match the camera size {expected}")]
    SizeMismatch {
        /// Size expected by the camera.
        expected: ImageSize,
        /// Size of the given depth map.
        actual: ImageSize,
    },

    /// The camera is unusable.
    #[error(transparent)]
    Camera(#[from] PreprocError),

    /// A snapshot holds a different number of cells than its grid.
    #[error("snapshot holds {actual} cells, its grid has {expected}")]
    SnapshotSize {
        /// Cells of the grid.
        expected: usize,
        /// Cells in the snapshot.
        actual: usize,
    },
}
