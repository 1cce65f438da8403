use glam::Vec3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::volume::TsdfVolume;

/// A point cloud with per-point normals, in world coordinates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointCloud {
    /// The points.
    pub points: Vec<Vec3>,
    /// The unit normals, one per point.
    pub normals: Vec<Vec3>,
}

impl PointCloud {
    /// Number of points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True if the cloud has no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl TsdfVolume {
    /// Extract the surface as a point cloud.
    ///
    /// A point is emitted on every edge between two neighbouring cells whose
    /// weights are above `weight_threshold` and whose distances change sign,
    /// at the linear zero crossing. Normals come from the distance gradient,
    /// sampled under the same weight threshold.
    pub fn extract_point_cloud(&self, weight_threshold: f32) -> PointCloud {
        let [nx, ny, nz] = self.resolution();

        let surfels = (0..nz)
            .into_par_iter()
            .flat_map_iter(|k| {
                let mut out = Vec::new();
                for j in 0..ny {
                    for i in 0..nx {
                        self.crossings(i, j, k, weight_threshold, &mut out);
                    }
                }
                out
            })
            .collect::<Vec<_>>();

        let (points, normals) = surfels.into_iter().unzip();
        PointCloud { points, normals }
    }

    fn crossings(&self, i: usize, j: usize, k: usize, threshold: f32, out: &mut Vec<(Vec3, Vec3)>) {
        let Some(c0) = self.cell(i, j, k).filter(|c| c.is_observed(threshold)) else {
            return;
        };

        for (di, dj, dk) in [(1, 0, 0), (0, 1, 0), (0, 0, 1)] {
            let Some(c1) = self
                .cell(i + di, j + dj, k + dk)
                .filter(|c| c.is_observed(threshold))
            else {
                continue;
            };
            if (c0.tsdf > 0.0) == (c1.tsdf > 0.0) {
                continue;
            }

            let t = c0.tsdf / (c0.tsdf - c1.tsdf);
            let p0 = self.cell_center(i, j, k);
            let p1 = self.cell_center(i + di, j + dj, k + dk);
            let p = p0 + t * (p1 - p0);

            // fall back to the edge direction where the field gradient is undefined
            let normal = self
                .gradient_with_threshold(p, threshold)
                .and_then(Vec3::try_normalize)
                .unwrap_or_else(|| (p1 - p0).normalize() * (c1.tsdf - c0.tsdf).signum());
            out.push((p, normal));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::VolumeError, grid::GridConfig, volume::TsdfParams};
    use approx::assert_relative_eq;
    use kfusion_3d::{synthetic::Scene, PinholeCamera};
    use kfusion_image::{Image, ImageSize};
    use kfusion_lie::SE3;

    #[test]
    fn test_extract_point_cloud_empty() -> Result<(), VolumeError> {
        let volume = TsdfVolume::new(
            GridConfig::cube(Vec3::ZERO, 1.0, 10),
            TsdfParams::default().with_truncation(0.3),
        )?;
        let cloud = volume.extract_point_cloud(0.0);
        assert!(cloud.is_empty());
        assert_eq!(cloud.normals.len(), 0);
        Ok(())
    }

    #[test]
    fn test_extract_point_cloud_plane() -> Result<(), VolumeError> {
        let grid = GridConfig {
            min: [-0.5, -0.5, 0.5],
            max: [0.5, 0.5, 1.5],
            resolution: [20, 20, 20],
        };
        let mut volume = TsdfVolume::new(grid, TsdfParams::default().with_truncation(0.1))?;
        let camera = PinholeCamera::new(
            40.0,
            40.0,
            15.5,
            15.5,
            ImageSize {
                width: 32,
                height: 32,
            },
        );
        volume.fuse(
            &Image::from_size_val(camera.size, 1.0f32),
            &camera,
            &SE3::IDENTITY,
        )?;

        let cloud = volume.extract_point_cloud(0.0);
        assert!(!cloud.is_empty());
        assert_eq!(cloud.points.len(), cloud.normals.len());
        for (p, n) in cloud.points.iter().zip(&cloud.normals) {
            assert_relative_eq!(p.z, 1.0, epsilon = 1e-4);
            assert_relative_eq!(n.length(), 1.0, epsilon = 1e-4);
            assert!(n.z < 0.0);
        }
        Ok(())
    }

    #[test]
    fn test_extract_ignores_volume_threshold() -> Result<(), Box<dyn std::error::Error>> {
        let grid = GridConfig {
            min: [-0.5, -0.5, 0.5],
            max: [0.5, 0.5, 1.5],
            resolution: [20, 20, 20],
        };
        let mut volume = TsdfVolume::new(grid, TsdfParams::default().with_truncation(0.2))?;
        let camera = PinholeCamera::new(
            80.0,
            80.0,
            31.5,
            31.5,
            ImageSize {
                width: 64,
                height: 64,
            },
        );
        // a plane tilted by 45 degrees, so that gradient normals differ from
        // the edge directions
        let normal = Vec3::new(1.0, 0.0, -1.0).normalize();
        let scene = Scene::new().with_plane(Vec3::new(0.0, 0.0, 1.0), normal);
        volume.fuse(&scene.render_depth(&camera, &SE3::IDENTITY), &camera, &SE3::IDENTITY)?;

        // cells fused once have weight 1 and are hidden at a volume threshold of 1
        let mut snapshot = volume.snapshot();
        snapshot.params.weight_threshold = 1.0;
        let strict = TsdfVolume::from_snapshot(snapshot)?;

        let expected = volume.extract_point_cloud(0.0);
        let cloud = strict.extract_point_cloud(0.0);
        assert!(!cloud.is_empty());
        assert_eq!(cloud, expected);

        let aligned = cloud.normals.iter().filter(|n| n.dot(normal) > 0.9).count();
        assert!(4 * aligned > cloud.len(), "{aligned} of {}", cloud.len());
        Ok(())
    }
}
