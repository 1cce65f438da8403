use glam::Vec3;
use kfusion_3d::PinholeCamera;
use kfusion_image::{parallel, Image};
use kfusion_lie::SE3;

use crate::{error::VolumeError, volume::TsdfVolume};

/// Unknown space is skipped in steps of this fraction of the truncation distance.
const UNKNOWN_STEP: f32 = 0.8;

/// Points and normals synthesized by ray-casting the volume.
///
/// Both images are in the camera frame of the ray-cast pose; pixels without
/// a surface are NaN.
#[derive(Debug, Clone)]
pub struct Prediction {
    /// Surface points.
    pub points: Image<Vec3>,
    /// Unit surface normals, pointing toward the camera side of the surface.
    pub normals: Image<Vec3>,
}

impl TsdfVolume {
    /// Trilinear interpolation of the distance field at a world point.
    ///
    /// Returns `None` outside the grid or if any of the 8 surrounding cells
    /// has a weight not above the weight threshold.
    pub fn interpolate(&self, p: Vec3) -> Option<f32> {
        self.interpolate_with_threshold(p, self.params().weight_threshold)
    }

    /// Like [`TsdfVolume::interpolate`], with an explicit weight threshold.
    pub fn interpolate_with_threshold(&self, p: Vec3, threshold: f32) -> Option<f32> {
        let g = self.world_to_grid(p);
        let base = g.floor();
        if base.min_element() < 0.0 || !base.is_finite() {
            return None;
        }
        let (i, j, k) = (base.x as usize, base.y as usize, base.z as usize);
        let [nx, ny, nz] = self.resolution();
        if i + 1 >= nx || j + 1 >= ny || k + 1 >= nz {
            return None;
        }
        let f = g - base;

        let mut value = 0.0;
        for (dk, wz) in [(0, 1.0 - f.z), (1, f.z)] {
            for (dj, wy) in [(0, 1.0 - f.y), (1, f.y)] {
                for (di, wx) in [(0, 1.0 - f.x), (1, f.x)] {
                    let cell = self.cell(i + di, j + dj, k + dk)?;
                    if !cell.is_observed(threshold) {
                        return None;
                    }
                    value += wx * wy * wz * cell.tsdf;
                }
            }
        }
        Some(value)
    }

    /// Gradient of the interpolated distance field at a world point by
    /// central differences of one cell.
    pub fn gradient(&self, p: Vec3) -> Option<Vec3> {
        self.gradient_with_threshold(p, self.params().weight_threshold)
    }

    /// Like [`TsdfVolume::gradient`], with an explicit weight threshold.
    pub fn gradient_with_threshold(&self, p: Vec3, threshold: f32) -> Option<Vec3> {
        let h = self.spacing();
        let sample = |q: Vec3| self.interpolate_with_threshold(q, threshold);
        let diff = |offset: Vec3, step: f32| -> Option<f32> {
            Some((sample(p + offset)? - sample(p - offset)?) / (2.0 * step))
        };
        Some(Vec3::new(
            diff(Vec3::new(h.x, 0.0, 0.0), h.x)?,
            diff(Vec3::new(0.0, h.y, 0.0), h.y)?,
            diff(Vec3::new(0.0, 0.0, h.z), h.z)?,
        ))
    }

    // march a unit ray and return the world position and normal of the first
    // front facing zero crossing
    fn march(&self, origin: Vec3, dir: Vec3, t_near: f32, t_far: f32) -> Option<(Vec3, Vec3)> {
        let step = self.params().raycast_step * self.spacing().min_element();
        let skip = (UNKNOWN_STEP * self.params().truncation).max(step);

        let mut t = t_near;
        let mut prev: Option<(f32, f32)> = None;
        while t <= t_far {
            let Some(value) = self.interpolate(origin + t * dir) else {
                prev = None;
                t += skip;
                continue;
            };

            if let Some((t_prev, v_prev)) = prev {
                if v_prev > 0.0 && value <= 0.0 {
                    let t_hit = t_prev + (t - t_prev) * v_prev / (v_prev - value);
                    let hit = origin + t_hit * dir;
                    let normal = self.gradient(hit)?.try_normalize()?;
                    return Some((hit, normal));
                }
                if v_prev < 0.0 && value > 0.0 {
                    // back face
                    return None;
                }
            }

            prev = Some((t, value));
            t += step;
        }
        None
    }

    /// Ray-cast the volume from the camera-to-world pose `pose`.
    ///
    /// For every pixel a ray is clipped to the grid and marched until the
    /// first crossing from positive to negative distance between two valid
    /// samples; the surface point is the linear interpolation of the two
    /// samples and its normal the normalized field gradient.
    pub fn ray_trace(&self, camera: &PinholeCamera, pose: &SE3) -> Result<Prediction, VolumeError> {
        camera.validate()?;

        let origin = pose.translation();
        let world_to_camera = pose.inverse();
        let grid = *self.grid();

        let hits = parallel::par_from_fn(camera.size, |u, v| {
            let dir = pose.transform_vector(camera.ray(u as f32, v as f32)).normalize();
            let (t_near, t_far) = grid.clip_ray(origin, dir)?;
            let (hit, normal) = self.march(origin, dir, t_near.max(0.0), t_far)?;
            Some((
                world_to_camera.transform_point(hit),
                world_to_camera.transform_vector(normal),
            ))
        });

        let points = hits.map(|h| h.map_or(Vec3::NAN, |(p, _)| p));
        let normals = hits.map(|h| h.map_or(Vec3::NAN, |(_, n)| n));

        log::debug!(
            "ray-cast {} of {} pixels",
            points.as_slice().iter().filter(|p| p.is_finite()).count(),
            camera.size.area()
        );

        Ok(Prediction { points, normals })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{grid::GridConfig, volume::TsdfParams};
    use approx::assert_relative_eq;
    use kfusion_image::ImageSize;

    fn camera() -> PinholeCamera {
        PinholeCamera::new(
            40.0,
            40.0,
            15.5,
            15.5,
            ImageSize {
                width: 32,
                height: 32,
            },
        )
    }

    fn plane_volume(z0: f32) -> Result<TsdfVolume, VolumeError> {
        let grid = GridConfig {
            min: [-0.5, -0.5, 0.5],
            max: [0.5, 0.5, 1.5],
            resolution: [40, 40, 40],
        };
        let mut vol = TsdfVolume::new(grid, TsdfParams::default().with_truncation(0.08))?;
        let cam = camera();
        vol.fuse(&Image::from_size_val(cam.size, z0), &cam, &SE3::IDENTITY)?;
        Ok(vol)
    }

    #[test]
    fn test_empty_volume_has_no_surface() -> Result<(), VolumeError> {
        let vol = TsdfVolume::new(GridConfig::cube(Vec3::new(0.0, 0.0, 1.0), 1.0, 16), TsdfParams::default())?;
        let prediction = vol.ray_trace(&camera(), &SE3::IDENTITY)?;
        assert!(prediction.points.as_slice().iter().all(|p| p.is_nan()));
        assert!(prediction.normals.as_slice().iter().all(|n| n.is_nan()));
        Ok(())
    }

    #[test]
    fn test_planar_round_trip() -> Result<(), VolumeError> {
        let z0 = 1.0;
        let vol = plane_volume(z0)?;
        let prediction = vol.ray_trace(&camera(), &SE3::IDENTITY)?;

        let mut hits = 0;
        for (p, n) in prediction
            .points
            .as_slice()
            .iter()
            .zip(prediction.normals.as_slice())
        {
            if !p.is_finite() {
                continue;
            }
            hits += 1;
            assert!((p.z - z0).abs() < vol.params().truncation, "{p}");
            assert!(n.z < -0.9, "{n}");
        }
        // the plane covers the whole field of view inside the grid
        assert!(hits > 20 * 20, "{hits}");

        let centre = prediction.points[(16, 16)];
        assert_relative_eq!(centre.z, z0, epsilon = 0.01);
        Ok(())
    }

    #[test]
    fn test_ray_trace_from_moved_pose() -> Result<(), VolumeError> {
        let vol = plane_volume(1.0)?;
        // step back 10cm: the plane is now 1.1m in front of the camera
        let pose = SE3::from_translation(Vec3::new(0.0, 0.0, -0.1));
        let prediction = vol.ray_trace(&camera(), &pose)?;
        assert_relative_eq!(prediction.points[(16, 16)].z, 1.1, epsilon = 0.01);
        Ok(())
    }

    #[test]
    fn test_weight_threshold_hides_surface() -> Result<(), VolumeError> {
        let vol = plane_volume(1.0)?;
        let mut snapshot = vol.snapshot();
        snapshot.params.weight_threshold = 1.0;
        let strict = TsdfVolume::from_snapshot(snapshot)?;
        let prediction = strict.ray_trace(&camera(), &SE3::IDENTITY)?;
        assert!(prediction.points.as_slice().iter().all(|p| p.is_nan()));
        Ok(())
    }

    #[test]
    fn test_interpolate_and_gradient() -> Result<(), VolumeError> {
        let vol = plane_volume(1.0)?;
        let p = Vec3::new(0.0, 0.0, 0.97);
        let value = vol.interpolate(p).unwrap_or(f32::NAN);
        assert_relative_eq!(value, 0.03 / 0.08, epsilon = 1e-3);
        let g = vol.gradient(p).unwrap_or(Vec3::NAN);
        assert_relative_eq!(g.z, -1.0 / 0.08, epsilon = 1e-2);
        assert!(vol.interpolate(Vec3::new(0.0, 0.0, 3.0)).is_none());
        Ok(())
    }
}
