use kfusion_image::ImageSize;

/// Errors raised when the tracker is called with inconsistent inputs.
///
/// A pose that cannot be tracked is not an error; it is reported through
/// [`crate::TrackStatus::Failure`].
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum IcpError {
    /// The tracker parameters are out of range.
    #[error("invalid ICP parameters: {0}")]
    InvalidParams(String),

    /// The pyramids and the iteration schedule disagree on the number of levels.
    #[error("level count mismatch: live {live}, model {model}, iteration schedule {schedule}")]
    LevelCountMismatch {
        /// Levels of the live pyramid.
        live: usize,
        /// Levels of the model pyramid.
        model: usize,
        /// Length of the iteration schedule.
        schedule: usize,
    },

    /// A live and a model level have different resolutions.
    #[error("level {level}: live size {live} does not match model size {model}")]
    SizeMismatch {
        /// The pyramid level.
        level: usize,
        /// Size of the live level.
        live: ImageSize,
        /// Size of the model level.
        model: ImageSize,
    },
}
