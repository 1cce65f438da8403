use glam::Vec3;
use kfusion_image::{parallel, Image};
use serde::{Deserialize, Serialize};

/// Parameters of the normal estimation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalParams {
    /// Maximum depth jump between a pixel and its neighbours, relative to the
    /// pixel depth. Larger jumps are treated as occlusion boundaries.
    pub max_depth_discontinuity: f32,
    /// Minimum ratio between the cross product magnitude and the product of
    /// the neighbour spans; smaller values mean a degenerate neighbourhood.
    pub min_area_ratio: f32,
}

impl Default for NormalParams {
    fn default() -> Self {
        Self {
            max_depth_discontinuity: 0.05,
            min_area_ratio: 1e-3,
        }
    }
}

/// True if the point (or normal) is a measurement.
#[inline]
pub fn is_valid_point(p: Vec3) -> bool {
    p.is_finite()
}

/// Estimate the normal at pixel `(u, v)` from the central differences of its
/// 4-neighbourhood.
///
/// Returns `None` at the image border, when any neighbour is invalid, across
/// depth discontinuities and for degenerate neighbourhoods. The normal points
/// toward the camera.
pub fn normal_at(points: &Image<Vec3>, u: usize, v: usize, params: &NormalParams) -> Option<Vec3> {
    if u == 0 || v == 0 || u + 1 >= points.width() || v + 1 >= points.height() {
        return None;
    }

    let p = points[(u, v)];
    let left = points[(u - 1, v)];
    let right = points[(u + 1, v)];
    let up = points[(u, v - 1)];
    let down = points[(u, v + 1)];

    let neighbours = [left, right, up, down];
    if !is_valid_point(p) || !neighbours.iter().all(|&q| is_valid_point(q)) {
        return None;
    }

    let max_jump = params.max_depth_discontinuity * p.z;
    if neighbours.iter().any(|q| (q.z - p.z).abs() > max_jump) {
        return None;
    }

    let du = right - left;
    let dv = down - up;
    let n = du.cross(dv);
    let area = n.length();
    if area <= params.min_area_ratio * du.length() * dv.length() || area <= f32::MIN_POSITIVE {
        return None;
    }

    let n = n / area;
    // orient toward the camera centre
    Some(if n.dot(p) > 0.0 { -n } else { n })
}

/// Estimate per-pixel normals of a point image. Invalid normals are NaN.
pub fn compute_normals(points: &Image<Vec3>, params: &NormalParams) -> Image<Vec3> {
    parallel::par_from_fn(points.size(), |u, v| {
        normal_at(points, u, v, params).unwrap_or(Vec3::NAN)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{camera::PinholeCamera, depth::depth_to_points};
    use approx::assert_relative_eq;
    use kfusion_image::ImageSize;

    fn camera() -> PinholeCamera {
        PinholeCamera::new(
            50.0,
            50.0,
            15.5,
            11.5,
            ImageSize {
                width: 32,
                height: 24,
            },
        )
    }

    #[test]
    fn test_frontal_plane() -> Result<(), crate::error::PreprocError> {
        let cam = camera();
        let depth = Image::from_size_val(cam.size, 1.5f32);
        let points = depth_to_points(&depth, &cam)?;
        let normals = compute_normals(&points, &NormalParams::default());

        // borders are invalid, the interior faces the camera
        assert!(!is_valid_point(normals[(0, 5)]));
        assert!(!is_valid_point(normals[(31, 5)]));
        let n = normals[(10, 10)];
        assert_relative_eq!(n.z, -1.0, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn test_slanted_plane() -> Result<(), crate::error::PreprocError> {
        // plane z = 1 + 0.5 x, i.e. normal ~ (0.5, 0, -1)
        let cam = camera();
        let depth = Image::from_fn(cam.size, |u, _| {
            let x = (u as f32 - cam.cx) / cam.fx;
            1.0 / (1.0 - 0.5 * x)
        });
        let points = depth_to_points(&depth, &cam)?;
        let normals = compute_normals(&points, &NormalParams::default());
        let expected = Vec3::new(0.5, 0.0, -1.0).normalize();
        let n = normals[(16, 12)];
        assert!(n.dot(expected) > 0.9999, "{n}");
        Ok(())
    }

    #[test]
    fn test_invalid_neighbourhood() -> Result<(), crate::error::PreprocError> {
        let cam = camera();
        let mut depth = Image::from_size_val(cam.size, 1.0f32);
        depth[(10, 10)] = f32::NAN;
        // a step edge
        for v in 0..cam.size.height {
            for u in 20..cam.size.width {
                depth[(u, v)] = 2.0;
            }
        }
        let points = depth_to_points(&depth, &cam)?;
        let normals = compute_normals(&points, &NormalParams::default());
        assert!(!is_valid_point(normals[(10, 10)]));
        assert!(!is_valid_point(normals[(11, 10)]));
        assert!(!is_valid_point(normals[(10, 11)]));
        assert!(!is_valid_point(normals[(19, 5)]));
        assert!(!is_valid_point(normals[(20, 5)]));
        assert!(is_valid_point(normals[(22, 5)]));
        Ok(())
    }
}
