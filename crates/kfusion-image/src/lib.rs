#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// image error types.
pub mod error;

/// image representation.
pub mod image;

/// module containing parallelization utilities.
pub mod parallel;

pub use crate::error::ImageError;
pub use crate::image::{Image, ImageSize};
