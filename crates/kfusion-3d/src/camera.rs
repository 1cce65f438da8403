use glam::{Vec2, Vec3};
use kfusion_image::ImageSize;
use serde::{Deserialize, Serialize};

use crate::error::PreprocError;

const UNDISTORT_ITERATIONS: usize = 10;

/// Represents the polynomial distortion parameters of a camera
///
/// The model is the rational radial + tangential (Brown-Conrady) model applied
/// to normalized image coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PolynomialDistortion {
    /// The first radial distortion coefficient
    pub k1: f32,
    /// The second radial distortion coefficient
    pub k2: f32,
    /// The third radial distortion coefficient
    pub k3: f32,
    /// The fourth radial distortion coefficient
    pub k4: f32,
    /// The fifth radial distortion coefficient
    pub k5: f32,
    /// The sixth radial distortion coefficient
    pub k6: f32,
    /// The first tangential distortion coefficient
    pub p1: f32,
    /// The second tangential distortion coefficient
    pub p2: f32,
}

impl PolynomialDistortion {
    /// Distort a point given in normalized image coordinates.
    pub fn distort(&self, x: f32, y: f32) -> (f32, f32) {
        let r2 = x * x + y * y;

        // radial distortion
        let kr = (1.0 + self.k1 * r2 + self.k2 * r2 * r2 + self.k3 * r2 * r2 * r2)
            / (1.0 + self.k4 * r2 + self.k5 * r2 * r2 + self.k6 * r2 * r2 * r2);

        // tangential distortion
        let xd = x * kr + 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let yd = y * kr + self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;

        (xd, yd)
    }

    /// Jacobian of [`PolynomialDistortion::distort`] at `(x, y)`, row major.
    pub fn jacobian(&self, x: f32, y: f32) -> [[f32; 2]; 2] {
        let r2 = x * x + y * y;
        let num = 1.0 + self.k1 * r2 + self.k2 * r2 * r2 + self.k3 * r2 * r2 * r2;
        let den = 1.0 + self.k4 * r2 + self.k5 * r2 * r2 + self.k6 * r2 * r2 * r2;
        let dnum = self.k1 + 2.0 * self.k2 * r2 + 3.0 * self.k3 * r2 * r2;
        let dden = self.k4 + 2.0 * self.k5 * r2 + 3.0 * self.k6 * r2 * r2;

        let kr = num / den;
        // derivative of kr with respect to r2
        let dkr = (dnum * den - num * dden) / (den * den);

        let cross = 2.0 * x * y * dkr + 2.0 * self.p1 * x + 2.0 * self.p2 * y;
        [
            [
                kr + 2.0 * x * x * dkr + 2.0 * self.p1 * y + 6.0 * self.p2 * x,
                cross,
            ],
            [
                cross,
                kr + 2.0 * y * y * dkr + 6.0 * self.p1 * y + 2.0 * self.p2 * x,
            ],
        ]
    }

    /// Undistort a point given in normalized image coordinates by fixed point
    /// iteration.
    pub fn undistort(&self, xd: f32, yd: f32) -> (f32, f32) {
        let (mut x, mut y) = (xd, yd);
        for _ in 0..UNDISTORT_ITERATIONS {
            let r2 = x * x + y * y;
            let kr = (1.0 + self.k4 * r2 + self.k5 * r2 * r2 + self.k6 * r2 * r2 * r2)
                / (1.0 + self.k1 * r2 + self.k2 * r2 * r2 + self.k3 * r2 * r2 * r2);
            let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            x = (xd - dx) * kr;
            y = (yd - dy) * kr;
        }
        (x, y)
    }
}

/// A pinhole camera with optional lens distortion.
///
/// Pixel centres sit at integer coordinates: the pixel `(u, v)` covers
/// `[u - 0.5, u + 0.5) x [v - 0.5, v + 0.5)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PinholeCamera {
    /// Focal length in pixels along x.
    pub fx: f32,
    /// Focal length in pixels along y.
    pub fy: f32,
    /// Principal point x coordinate in pixels.
    pub cx: f32,
    /// Principal point y coordinate in pixels.
    pub cy: f32,
    /// The image dimensions.
    pub size: ImageSize,
    /// Optional lens distortion.
    pub distortion: Option<PolynomialDistortion>,
}

impl PinholeCamera {
    /// Creates a new distortion free camera.
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32, size: ImageSize) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            size,
            distortion: None,
        }
    }

    /// Attach a distortion model.
    pub fn with_distortion(mut self, distortion: PolynomialDistortion) -> Self {
        self.distortion = Some(distortion);
        self
    }

    /// Check that the intrinsics describe a usable camera.
    pub fn validate(&self) -> Result<(), PreprocError> {
        let finite = [self.fx, self.fy, self.cx, self.cy]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.fx <= 0.0 || self.fy <= 0.0 {
            return Err(PreprocError::InvalidCamera(format!(
                "focal lengths must be positive and finite, got fx={} fy={}",
                self.fx, self.fy
            )));
        }
        if self.size.width == 0 || self.size.height == 0 {
            return Err(PreprocError::InvalidCamera(format!(
                "empty image size {}",
                self.size
            )));
        }
        Ok(())
    }

    /// Project a point in camera coordinates to continuous pixel coordinates.
    ///
    /// Returns `None` for points on or behind the image plane.
    #[inline]
    pub fn project(&self, p: Vec3) -> Option<Vec2> {
        if p.z.is_nan() || p.z <= 0.0 {
            return None;
        }
        let (mut x, mut y) = (p.x / p.z, p.y / p.z);
        if let Some(d) = &self.distortion {
            (x, y) = d.distort(x, y);
        }
        Some(Vec2::new(self.fx * x + self.cx, self.fy * y + self.cy))
    }

    /// Project a point to the nearest pixel, if it falls inside the image.
    #[inline]
    pub fn project_to_pixel(&self, p: Vec3) -> Option<(usize, usize)> {
        let uv = self.project(p)?;
        let u = (uv.x + 0.5).floor();
        let v = (uv.y + 0.5).floor();
        if u >= 0.0 && v >= 0.0 && (u as usize) < self.size.width && (v as usize) < self.size.height
        {
            Some((u as usize, v as usize))
        } else {
            None
        }
    }

    /// The viewing ray through pixel `(u, v)`, scaled so that its z component is 1.
    #[inline]
    pub fn ray(&self, u: f32, v: f32) -> Vec3 {
        let (mut x, mut y) = ((u - self.cx) / self.fx, (v - self.cy) / self.fy);
        if let Some(d) = &self.distortion {
            (x, y) = d.undistort(x, y);
        }
        Vec3::new(x, y, 1.0)
    }

    /// Back-project pixel `(u, v)` at the given depth (z) into camera coordinates.
    #[inline]
    pub fn unproject(&self, u: f32, v: f32, depth: f32) -> Vec3 {
        self.ray(u, v) * depth
    }

    /// Jacobian of [`PinholeCamera::project`] at `p`, as two rows.
    pub fn project_jacobian(&self, p: Vec3) -> [Vec3; 2] {
        let inv_z = 1.0 / p.z;
        let (x, y) = (p.x * inv_z, p.y * inv_z);
        let dx = Vec3::new(inv_z, 0.0, -x * inv_z);
        let dy = Vec3::new(0.0, inv_z, -y * inv_z);

        let (jx, jy) = match &self.distortion {
            Some(d) => {
                let [[a, b], [c, e]] = d.jacobian(x, y);
                (dx * a + dy * b, dx * c + dy * e)
            }
            None => (dx, dy),
        };
        [jx * self.fx, jy * self.fy]
    }

    /// The camera of the next (half resolution) pyramid level.
    pub fn half(&self) -> Self {
        Self {
            fx: self.fx * 0.5,
            fy: self.fy * 0.5,
            cx: (self.cx + 0.5) * 0.5 - 0.5,
            cy: (self.cy + 0.5) * 0.5 - 0.5,
            size: self.size.half(),
            distortion: self.distortion,
        }
    }

    /// The camera of pyramid level `level` (0 is the full resolution).
    pub fn at_level(&self, level: usize) -> Self {
        (0..level).fold(*self, |cam, _| cam.half())
    }
}
