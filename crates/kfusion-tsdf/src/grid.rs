use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::VolumeError;

/// World-space geometry of a dense grid of cells.
///
/// The grid covers the axis aligned box `[min, max]` with `resolution` cells
/// per axis. Cell `(i, j, k)` is centred at `min + (idx + 0.5) * spacing`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    /// Lower corner of the box in world coordinates.
    pub min: [f32; 3],
    /// Upper corner of the box in world coordinates.
    pub max: [f32; 3],
    /// Number of cells along x, y and z.
    pub resolution: [usize; 3],
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            min: [-1.5, -1.5, 0.0],
            max: [1.5, 1.5, 3.0],
            resolution: [256, 256, 256],
        }
    }
}

impl GridConfig {
    /// A cube of side `size` centred at `center` with `n` cells per axis.
    pub fn cube(center: Vec3, size: f32, n: usize) -> Self {
        let half = Vec3::splat(0.5 * size);
        Self {
            min: (center - half).to_array(),
            max: (center + half).to_array(),
            resolution: [n; 3],
        }
    }

    /// Reject empty or non-finite bounds and degenerate resolutions.
    pub fn validate(&self) -> Result<(), VolumeError> {
        let bounds_ok = (0..3).all(|a| {
            self.min[a].is_finite() && self.max[a].is_finite() && self.max[a] > self.min[a]
        });
        if !bounds_ok {
            return Err(VolumeError::InvalidBounds {
                min: self.min,
                max: self.max,
            });
        }

        let fits = self
            .resolution
            .iter()
            .try_fold(1usize, |acc, &n| acc.checked_mul(n));
        if self.resolution.iter().any(|&n| n < 2) || fits.is_none() {
            return Err(VolumeError::InvalidResolution(self.resolution));
        }
        Ok(())
    }

    /// Lower corner.
    #[inline]
    pub fn min_corner(&self) -> Vec3 {
        Vec3::from_array(self.min)
    }

    /// Upper corner.
    #[inline]
    pub fn max_corner(&self) -> Vec3 {
        Vec3::from_array(self.max)
    }

    /// Cell size along each axis.
    #[inline]
    pub fn spacing(&self) -> Vec3 {
        let n = Vec3::new(
            self.resolution[0] as f32,
            self.resolution[1] as f32,
            self.resolution[2] as f32,
        );
        (self.max_corner() - self.min_corner()) / n
    }

    /// Total number of cells.
    #[inline]
    pub fn num_cells(&self) -> usize {
        self.resolution.iter().product()
    }

    /// Centre of cell `(i, j, k)` in world coordinates.
    #[inline]
    pub fn cell_center(&self, i: usize, j: usize, k: usize) -> Vec3 {
        let idx = Vec3::new(i as f32, j as f32, k as f32);
        self.min_corner() + (idx + 0.5) * self.spacing()
    }

    /// Continuous grid coordinates of a world point, cell centres being at
    /// integer coordinates.
    #[inline]
    pub fn world_to_grid(&self, p: Vec3) -> Vec3 {
        (p - self.min_corner()) / self.spacing() - 0.5
    }

    /// The parameter interval `[t_near, t_far]` in which `origin + t * dir`
    /// is inside the box, if any.
    pub fn clip_ray(&self, origin: Vec3, dir: Vec3) -> Option<(f32, f32)> {
        let inv = dir.recip();
        let t0 = (self.min_corner() - origin) * inv;
        let t1 = (self.max_corner() - origin) * inv;
        let t_near = t0.min(t1).max_element();
        let t_far = t0.max(t1).min_element();
        (t_near <= t_far && !t_near.is_nan() && !t_far.is_nan()).then_some((t_near, t_far))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cell_geometry() -> Result<(), VolumeError> {
        let grid = GridConfig {
            min: [0.0, -1.0, 2.0],
            max: [1.0, 1.0, 3.0],
            resolution: [10, 20, 5],
        };
        grid.validate()?;
        assert_eq!(grid.num_cells(), 1000);
        assert_relative_eq!(grid.spacing().x, 0.1);
        assert_relative_eq!(grid.spacing().z, 0.2);

        let c = grid.cell_center(0, 0, 0);
        assert_relative_eq!(c.x, 0.05);
        assert_relative_eq!(c.y, -0.95);
        assert_relative_eq!(c.z, 2.1);

        let g = grid.world_to_grid(grid.cell_center(3, 7, 2));
        assert_relative_eq!(g.x, 3.0, epsilon = 1e-5);
        assert_relative_eq!(g.y, 7.0, epsilon = 1e-5);
        assert_relative_eq!(g.z, 2.0, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn test_invalid_grid() {
        let bad_bounds = GridConfig {
            min: [0.0, 0.0, 1.0],
            max: [1.0, 1.0, 1.0],
            resolution: [8, 8, 8],
        };
        assert!(matches!(
            bad_bounds.validate(),
            Err(VolumeError::InvalidBounds { .. })
        ));

        let nan_bounds = GridConfig {
            min: [f32::NAN, 0.0, 0.0],
            ..GridConfig::default()
        };
        assert!(nan_bounds.validate().is_err());

        let bad_resolution = GridConfig {
            resolution: [8, 0, 8],
            ..GridConfig::default()
        };
        assert_eq!(
            bad_resolution.validate(),
            Err(VolumeError::InvalidResolution([8, 0, 8]))
        );
    }

    #[test]
    fn test_clip_ray() {
        let grid = GridConfig::cube(Vec3::ZERO, 2.0, 4);
        let (t0, t1) = grid
            .clip_ray(Vec3::new(0.0, 0.0, -3.0), Vec3::Z)
            .unwrap_or_default();
        assert_relative_eq!(t0, 2.0);
        assert_relative_eq!(t1, 4.0);
        assert!(grid.clip_ray(Vec3::new(0.0, 5.0, -3.0), Vec3::Z).is_none());
    }
}
