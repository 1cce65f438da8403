#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

#[doc(inline)]
pub use kfusion_3d as k3d;

#[doc(inline)]
pub use kfusion_icp as icp;

#[doc(inline)]
pub use kfusion_image as image;

#[doc(inline)]
pub use kfusion_lie as lie;

#[doc(inline)]
pub use kfusion_linalg as linalg;

#[doc(inline)]
pub use kfusion_tsdf as tsdf;

/// Configuration of the tracking and fusion pipeline.
pub mod config;
pub use config::{ConfigError, FusionConfig};

/// The per-frame tracking and fusion loop.
pub mod pipeline;
pub use pipeline::{
    DepthFrame, FrameResult, FrameStatus, FusionError, FusionPipeline, TrackingState,
};
