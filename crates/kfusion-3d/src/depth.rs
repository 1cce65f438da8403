use glam::Vec3;
use kfusion_image::{parallel, Image};
use serde::{Deserialize, Serialize};

use crate::{camera::PinholeCamera, error::PreprocError};

/// Parameters to convert raw sensor depth into metric depth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthParams {
    /// Raw unit to meters scale factor (e.g. 1e-3 for millimeters).
    pub scale: f32,
    /// Minimum valid depth in meters.
    pub min_depth: f32,
    /// Maximum valid depth in meters.
    pub max_depth: f32,
}

impl Default for DepthParams {
    fn default() -> Self {
        Self {
            scale: 1e-3,
            min_depth: 0.1,
            max_depth: 4.0,
        }
    }
}

impl DepthParams {
    /// Set the raw to metric scale.
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    /// Set the valid depth range.
    pub fn with_range(mut self, min_depth: f32, max_depth: f32) -> Self {
        self.min_depth = min_depth;
        self.max_depth = max_depth;
        self
    }

    /// Check that the parameters are usable.
    pub fn validate(&self) -> Result<(), PreprocError> {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(PreprocError::InvalidDepthScale(self.scale));
        }
        let finite = self.min_depth.is_finite() && self.max_depth.is_finite();
        if !finite || self.min_depth < 0.0 || self.max_depth <= self.min_depth {
            return Err(PreprocError::InvalidDepthRange(
                self.min_depth,
                self.max_depth,
            ));
        }
        Ok(())
    }

    /// Convert a single raw sample, returning NaN when it is out of range.
    #[inline]
    pub fn convert(&self, raw: u16) -> f32 {
        if raw == 0 {
            return f32::NAN;
        }
        let d = raw as f32 * self.scale;
        if d < self.min_depth || d > self.max_depth {
            f32::NAN
        } else {
            d
        }
    }
}

/// True if the depth sample carries a measurement.
#[inline]
pub fn is_valid_depth(d: f32) -> bool {
    d.is_finite() && d > 0.0
}

/// Convert a raw depth map into metric depth.
///
/// Zero samples and samples outside `[min_depth, max_depth]` are marked
/// invalid with NaN.
///
/// # Arguments
///
/// * `raw` - The raw depth map in sensor units.
/// * `params` - The conversion parameters.
///
/// # Returns
///
/// The metric depth map in meters.
pub fn convert_depth(raw: &Image<u16>, params: &DepthParams) -> Result<Image<f32>, PreprocError> {
    params.validate()?;
    Ok(parallel::par_map(raw, |&r| params.convert(r)))
}

/// Convert a raw depth map into inverse depth `1 / d`, NaN where invalid.
pub fn convert_depth_to_inverse_depth(
    raw: &Image<u16>,
    params: &DepthParams,
) -> Result<Image<f32>, PreprocError> {
    params.validate()?;
    Ok(parallel::par_map(raw, |&r| 1.0 / params.convert(r)))
}

/// Compute the inverse depth of a metric depth map, NaN where invalid.
pub fn inverse_depth(depth: &Image<f32>) -> Image<f32> {
    parallel::par_map(depth, |&d| if is_valid_depth(d) { 1.0 / d } else { f32::NAN })
}

/// Back-project every valid depth sample into a 3D point in camera frame.
///
/// Invalid samples produce a NaN point.
pub fn depth_to_points(
    depth: &Image<f32>,
    camera: &PinholeCamera,
) -> Result<Image<Vec3>, PreprocError> {
    if depth.size() != camera.size {
        return Err(PreprocError::SizeMismatch {
            expected: camera.size,
            actual: depth.size(),
        });
    }
    Ok(parallel::par_from_fn(depth.size(), |u, v| {
        let d = depth[(u, v)];
        if is_valid_depth(d) {
            camera.unproject(u as f32, v as f32, d)
        } else {
            Vec3::NAN
        }
    }))
}

/// Convert an RGB image into a grey intensity image in `[0, 1]`.
pub fn grey_from_rgb(rgb: &Image<[u8; 3]>) -> Image<f32> {
    const RW: f32 = 0.299;
    const GW: f32 = 0.587;
    const BW: f32 = 0.114;
    parallel::par_map(rgb, |px| {
        (RW * px[0] as f32 + GW * px[1] as f32 + BW * px[2] as f32) / 255.0
    })
}
