use kfusion_image::ImageError;

/// Errors raised while preparing depth data for tracking and fusion.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PreprocError {
    /// An image could not be created or has the wrong layout.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// The valid depth range is empty or not finite.
    #[error("invalid depth range [{0}, {1}]")]
    InvalidDepthRange(f32, f32),

    /// The raw to metric scale factor is not positive.
    #[error("depth scale must be positive, got {0}")]
    InvalidDepthScale(f32),

    /// The camera intrinsics are unusable.
    #[error("invalid camera: {0}")]
    InvalidCamera(String),

    /// The input image does not match the camera resolution.
    #[error("image size {actual} does not match the camera size {expected}")]
    SizeMismatch {
        /// Size expected by the camera.
        expected: kfusion_image::ImageSize,
        /// Size of the given image.
        actual: kfusion_image::ImageSize,
    },

    /// The pyramid cannot have the requested number of levels.
    #[error("cannot build {levels} pyramid levels from a {width}x{height} image")]
    InvalidPyramidLevels {
        /// Number of requested levels.
        levels: usize,
        /// Width of the finest level.
        width: usize,
        /// Height of the finest level.
        height: usize,
    },
}
