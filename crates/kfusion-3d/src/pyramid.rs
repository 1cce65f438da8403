use glam::Vec3;
use kfusion_image::{parallel, Image};

use crate::{
    camera::PinholeCamera,
    depth::{depth_to_points, is_valid_depth},
    error::PreprocError,
    normals::{compute_normals, is_valid_point, NormalParams},
};

/// Smallest side a pyramid level may have; normals need a 3x3 neighbourhood.
pub const MIN_LEVEL_SIDE: usize = 3;

/// A single resolution level of a point/normal pyramid.
#[derive(Debug, Clone)]
pub struct PyramidLevel {
    /// The camera of this level.
    pub camera: PinholeCamera,
    /// Metric depth, NaN where invalid.
    pub depth: Image<f32>,
    /// Points in camera frame, NaN where invalid.
    pub points: Image<Vec3>,
    /// Unit normals in camera frame, NaN where invalid.
    pub normals: Image<Vec3>,
    /// Optional grey intensity in `[0, 1]`.
    pub intensity: Option<Image<f32>>,
}

impl PyramidLevel {
    fn from_depth(
        camera: PinholeCamera,
        depth: Image<f32>,
        params: &NormalParams,
    ) -> Result<Self, PreprocError> {
        let points = depth_to_points(&depth, &camera)?;
        let normals = compute_normals(&points, params);
        Ok(Self {
            camera,
            depth,
            points,
            normals,
            intensity: None,
        })
    }

    /// True if pixel `(u, v)` has both a valid point and a valid normal.
    #[inline]
    pub fn is_valid(&self, u: usize, v: usize) -> bool {
        is_valid_point(self.points[(u, v)]) && is_valid_point(self.normals[(u, v)])
    }

    /// Number of pixels with a valid point and normal.
    pub fn num_valid(&self) -> usize {
        self.points
            .as_slice()
            .iter()
            .zip(self.normals.as_slice())
            .filter(|(p, n)| is_valid_point(**p) && is_valid_point(**n))
            .count()
    }
}

/// An ordered stack of point/normal images, level 0 being the finest.
///
/// Every level is computed from a box-downsampled depth map, never from the
/// points or normals of the level below.
#[derive(Debug, Clone)]
pub struct Pyramid {
    levels: Vec<PyramidLevel>,
}

impl Pyramid {
    /// Build a pyramid from a metric depth map.
    ///
    /// # Arguments
    ///
    /// * `camera` - The camera of the finest level.
    /// * `depth` - The metric depth map, NaN where invalid.
    /// * `num_levels` - The number of levels to build.
    /// * `params` - The normal estimation parameters.
    pub fn from_depth(
        camera: &PinholeCamera,
        depth: &Image<f32>,
        num_levels: usize,
        params: &NormalParams,
    ) -> Result<Self, PreprocError> {
        check_levels(camera, depth, num_levels)?;

        let mut levels = Vec::with_capacity(num_levels);
        levels.push(PyramidLevel::from_depth(*camera, depth.clone(), params)?);
        for _ in 1..num_levels {
            let prev = &levels[levels.len() - 1];
            let depth = downsample_depth(&prev.depth, params.max_depth_discontinuity);
            let level = PyramidLevel::from_depth(prev.camera.half(), depth, params)?;
            levels.push(level);
        }

        log::trace!(
            "built {} pyramid levels, {} valid pixels at level 0",
            levels.len(),
            levels[0].num_valid()
        );

        Ok(Self { levels })
    }

    /// Build a model pyramid from a ray-cast prediction.
    ///
    /// Level 0 keeps the predicted points and normals; the coarser levels are
    /// derived from the predicted depth exactly like [`Pyramid::from_depth`].
    pub fn from_prediction(
        camera: &PinholeCamera,
        points: &Image<Vec3>,
        normals: &Image<Vec3>,
        num_levels: usize,
        params: &NormalParams,
    ) -> Result<Self, PreprocError> {
        if normals.size() != points.size() {
            return Err(PreprocError::SizeMismatch {
                expected: points.size(),
                actual: normals.size(),
            });
        }

        let depth = parallel::par_from_fn(points.size(), |u, v| {
            let (p, n) = (points[(u, v)], normals[(u, v)]);
            if is_valid_point(p) && is_valid_point(n) && is_valid_depth(p.z) {
                p.z
            } else {
                f32::NAN
            }
        });
        check_levels(camera, &depth, num_levels)?;

        // drop points whose normal is missing so both images agree
        let points = parallel::par_from_fn(points.size(), |u, v| {
            if is_valid_depth(depth[(u, v)]) {
                points[(u, v)]
            } else {
                Vec3::NAN
            }
        });
        let normals = parallel::par_from_fn(normals.size(), |u, v| {
            if is_valid_depth(depth[(u, v)]) {
                normals[(u, v)]
            } else {
                Vec3::NAN
            }
        });

        let mut levels = Vec::with_capacity(num_levels);
        levels.push(PyramidLevel {
            camera: *camera,
            depth,
            points,
            normals,
            intensity: None,
        });
        for _ in 1..num_levels {
            let prev = &levels[levels.len() - 1];
            let depth = downsample_depth(&prev.depth, params.max_depth_discontinuity);
            let level = PyramidLevel::from_depth(prev.camera.half(), depth, params)?;
            levels.push(level);
        }

        Ok(Self { levels })
    }

    /// Attach a grey intensity image to the finest level and its box-averaged
    /// versions to the coarser levels.
    pub fn with_intensity(mut self, intensity: &Image<f32>) -> Result<Self, PreprocError> {
        let expected = self.levels[0].camera.size;
        if intensity.size() != expected {
            return Err(PreprocError::SizeMismatch {
                expected,
                actual: intensity.size(),
            });
        }

        let mut current = intensity.clone();
        for (i, level) in self.levels.iter_mut().enumerate() {
            if i > 0 {
                current = downsample_intensity(&current);
            }
            level.intensity = Some(current.clone());
        }
        Ok(self)
    }

    /// The pyramid levels, finest first.
    pub fn levels(&self) -> &[PyramidLevel] {
        &self.levels
    }

    /// The level at index `level`, if any.
    pub fn level(&self, level: usize) -> Option<&PyramidLevel> {
        self.levels.get(level)
    }

    /// The number of levels.
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }
}

fn check_levels(
    camera: &PinholeCamera,
    depth: &Image<f32>,
    num_levels: usize,
) -> Result<(), PreprocError> {
    camera.validate()?;
    if depth.size() != camera.size {
        return Err(PreprocError::SizeMismatch {
            expected: camera.size,
            actual: depth.size(),
        });
    }
    let coarsest = camera.at_level(num_levels.saturating_sub(1)).size;
    if num_levels == 0 || coarsest.width < MIN_LEVEL_SIDE || coarsest.height < MIN_LEVEL_SIDE {
        return Err(PreprocError::InvalidPyramidLevels {
            levels: num_levels,
            width: camera.size.width,
            height: camera.size.height,
        });
    }
    Ok(())
}

/// Halve a depth map by averaging each 2x2 block.
///
/// Only the valid samples within `max_discontinuity * d` of the block's
/// nearest depth `d` contribute, so that foreground and background are never
/// blended. Blocks without valid samples are invalid.
pub fn downsample_depth(depth: &Image<f32>, max_discontinuity: f32) -> Image<f32> {
    parallel::par_from_fn(depth.size().half(), |u, v| {
        let block = [
            depth[(2 * u, 2 * v)],
            depth[(2 * u + 1, 2 * v)],
            depth[(2 * u, 2 * v + 1)],
            depth[(2 * u + 1, 2 * v + 1)],
        ];

        let nearest = block
            .iter()
            .copied()
            .filter(|&d| is_valid_depth(d))
            .fold(f32::INFINITY, f32::min);
        if !nearest.is_finite() {
            return f32::NAN;
        }

        let max_jump = max_discontinuity * nearest;
        let (sum, count) = block
            .iter()
            .filter(|&&d| is_valid_depth(d) && d - nearest <= max_jump)
            .fold((0.0, 0u32), |(s, c), &d| (s + d, c + 1));
        sum / count as f32
    })
}

/// Halve an intensity image by averaging each 2x2 block.
pub fn downsample_intensity(intensity: &Image<f32>) -> Image<f32> {
    parallel::par_from_fn(intensity.size().half(), |u, v| {
        0.25 * (intensity[(2 * u, 2 * v)]
            + intensity[(2 * u + 1, 2 * v)]
            + intensity[(2 * u, 2 * v + 1)]
            + intensity[(2 * u + 1, 2 * v + 1)])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use kfusion_image::ImageSize;

    fn camera() -> PinholeCamera {
        PinholeCamera::new(
            80.0,
            80.0,
            31.5,
            23.5,
            ImageSize {
                width: 64,
                height: 48,
            },
        )
    }

    #[test]
    fn test_downsample_depth() -> Result<(), PreprocError> {
        let depth = Image::new(
            [4, 2].into(),
            vec![1.0, 1.02, 2.0, f32::NAN, 1.04, 3.0, f32::NAN, f32::NAN],
        )?;
        let half = downsample_depth(&depth, 0.05);
        assert_eq!(half.size(), [2, 1].into());
        // the 3.0 sample is a discontinuity and is left out
        assert_relative_eq!(half[(0, 0)], 1.02, epsilon = 1e-6);
        assert_relative_eq!(half[(1, 0)], 2.0);

        let empty = Image::from_size_val([2, 2].into(), f32::NAN);
        assert!(downsample_depth(&empty, 0.05)[(0, 0)].is_nan());
        Ok(())
    }

    #[test]
    fn test_pyramid_from_depth() -> Result<(), PreprocError> {
        let cam = camera();
        let depth = Image::from_size_val(cam.size, 2.0f32);
        let pyramid = Pyramid::from_depth(&cam, &depth, 3, &NormalParams::default())?;
        assert_eq!(pyramid.num_levels(), 3);

        let coarse = pyramid.level(2).ok_or(PreprocError::InvalidCamera("level".into()))?;
        assert_eq!(coarse.depth.size(), ImageSize { width: 16, height: 12 });
        assert_eq!(coarse.camera.size, coarse.depth.size());
        assert_relative_eq!(coarse.camera.fx, 20.0);
        // interior pixels of a frontal plane are all valid
        assert_eq!(coarse.num_valid(), 14 * 10);
        assert!(coarse.is_valid(5, 5));
        assert!(!coarse.is_valid(0, 5));
        Ok(())
    }

    #[test]
    fn test_pyramid_with_intensity() -> Result<(), PreprocError> {
        let cam = camera();
        let depth = Image::from_size_val(cam.size, 2.0f32);
        let grey = Image::from_fn(cam.size, |u, _| (u % 2) as f32);
        let pyramid =
            Pyramid::from_depth(&cam, &depth, 2, &NormalParams::default())?.with_intensity(&grey)?;
        let coarse = pyramid.levels()[1]
            .intensity
            .as_ref()
            .ok_or(PreprocError::InvalidCamera("intensity".into()))?;
        assert_relative_eq!(coarse[(3, 3)], 0.5);
        Ok(())
    }

    #[test]
    fn test_pyramid_from_prediction() -> Result<(), PreprocError> {
        let cam = camera();
        let depth = Image::from_size_val(cam.size, 1.0f32);
        let points = depth_to_points(&depth, &cam)?;
        let mut normals = Image::from_size_val(cam.size, Vec3::new(0.0, 0.0, -1.0));
        normals[(10, 10)] = Vec3::NAN;

        let pyramid =
            Pyramid::from_prediction(&cam, &points, &normals, 2, &NormalParams::default())?;
        let fine = &pyramid.levels()[0];
        // level 0 keeps border pixels of the prediction
        assert!(fine.is_valid(0, 0));
        assert!(!fine.is_valid(10, 10));
        assert!(fine.depth[(10, 10)].is_nan());
        assert_relative_eq!(pyramid.levels()[1].depth[(5, 5)], 1.0);
        Ok(())
    }

    #[test]
    fn test_invalid_levels() {
        let cam = camera();
        let depth = Image::from_size_val(cam.size, 1.0f32);
        let params = NormalParams::default();
        assert!(matches!(
            Pyramid::from_depth(&cam, &depth, 0, &params),
            Err(PreprocError::InvalidPyramidLevels { levels: 0, .. })
        ));
        assert!(matches!(
            Pyramid::from_depth(&cam, &depth, 6, &params),
            Err(PreprocError::InvalidPyramidLevels { levels: 6, .. })
        ));
    }
}
