#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

mod error;
pub use error::VolumeError;

/// Axis aligned grid geometry.
pub mod grid;
pub use grid::GridConfig;

mod volume;
pub use volume::{Cell, TsdfParams, TsdfVolume, VolumeSnapshot};

/// Ray-casting of the volume into point and normal predictions.
pub mod raycast;
pub use raycast::Prediction;

/// Surface point extraction for offline export.
pub mod extract;
pub use extract::PointCloud;
