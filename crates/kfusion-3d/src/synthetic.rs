use glam::Vec3;
use kfusion_image::{parallel, Image};
use kfusion_lie::SE3;
use serde::{Deserialize, Serialize};

use crate::camera::PinholeCamera;

/// An infinite plane through `point` with unit `normal`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    /// A point on the plane.
    pub point: Vec3,
    /// The plane normal.
    pub normal: Vec3,
}

/// A sphere.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sphere {
    /// The sphere centre.
    pub center: Vec3,
    /// The sphere radius.
    pub radius: f32,
}

impl Plane {
    /// Create a plane, normalizing `normal`.
    pub fn new(point: Vec3, normal: Vec3) -> Self {
        Self {
            point,
            normal: normal.normalize(),
        }
    }

    fn intersect(&self, origin: Vec3, dir: Vec3) -> Option<f32> {
        let denom = self.normal.dot(dir);
        if denom.abs() < 1e-9 {
            return None;
        }
        let t = self.normal.dot(self.point - origin) / denom;
        (t > 0.0).then_some(t)
    }
}

impl Sphere {
    fn intersect(&self, origin: Vec3, dir: Vec3) -> Option<f32> {
        let oc = origin - self.center;
        let a = dir.length_squared();
        let half_b = oc.dot(dir);
        let c = oc.length_squared() - self.radius * self.radius;
        let disc = half_b * half_b - a * c;
        if disc < 0.0 {
            return None;
        }
        let sq = disc.sqrt();
        [(-half_b - sq) / a, (-half_b + sq) / a]
            .into_iter()
            .find(|&t| t > 0.0)
    }
}

/// An analytic scene made of planes and spheres, in world coordinates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    /// The planes of the scene.
    pub planes: Vec<Plane>,
    /// The spheres of the scene.
    pub spheres: Vec<Sphere>,
}

impl Scene {
    /// An empty scene.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plane.
    pub fn with_plane(mut self, point: Vec3, normal: Vec3) -> Self {
        self.planes.push(Plane::new(point, normal));
        self
    }

    /// Add a sphere.
    pub fn with_sphere(mut self, center: Vec3, radius: f32) -> Self {
        self.spheres.push(Sphere { center, radius });
        self
    }

    /// The ray parameter of the nearest surface hit along `origin + t * dir`.
    pub fn intersect(&self, origin: Vec3, dir: Vec3) -> Option<f32> {
        let planes = self.planes.iter().filter_map(|p| p.intersect(origin, dir));
        let spheres = self.spheres.iter().filter_map(|s| s.intersect(origin, dir));
        planes.chain(spheres).reduce(f32::min)
    }

    /// Unsigned distance from `p` to the nearest surface of the scene.
    pub fn distance(&self, p: Vec3) -> f32 {
        let planes = self.planes.iter().map(|pl| pl.normal.dot(p - pl.point).abs());
        let spheres = self
            .spheres
            .iter()
            .map(|s| ((p - s.center).length() - s.radius).abs());
        planes.chain(spheres).fold(f32::INFINITY, f32::min)
    }

    /// Render the metric z-depth seen by `camera` at the camera-to-world
    /// pose `pose`. Pixels that see nothing are NaN.
    pub fn render_depth(&self, camera: &PinholeCamera, pose: &SE3) -> Image<f32> {
        let origin = pose.translation();
        parallel::par_from_fn(camera.size, |u, v| {
            // the ray has unit z in camera frame, so t is the z-depth
            let dir = pose.transform_vector(camera.ray(u as f32, v as f32));
            self.intersect(origin, dir).unwrap_or(f32::NAN)
        })
    }

    /// Render raw sensor depth, quantized with `scale` meters per unit.
    /// Pixels that see nothing or overflow the raw range are zero.
    pub fn render_raw_depth(&self, camera: &PinholeCamera, pose: &SE3, scale: f32) -> Image<u16> {
        let depth = self.render_depth(camera, pose);
        parallel::par_map(&depth, |&d| {
            let raw = (d / scale).round();
            if raw.is_finite() && raw > 0.0 && raw <= u16::MAX as f32 {
                raw as u16
            } else {
                0
            }
        })
    }
}
