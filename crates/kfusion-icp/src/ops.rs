use glam::{Vec2, Vec3};
use kfusion_3d::PinholeCamera;
use kfusion_image::Image;
use kfusion_linalg::{symmetric_eigenvalues, Cholesky, CholeskyError, Mat6, Vec6};

/// Spectral summary of the information matrix `A`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conditioning {
    /// Smallest over largest eigenvalue, in `[0, 1]`.
    pub eigenvalue_ratio: f64,
    /// Entropy `-sum(ln lambda_i)` of the update distribution, up to a constant.
    pub entropy: f64,
}

/// Gauss-Newton normal equations `A * xi = b` accumulated over correspondences.
///
/// Each row `a` with residual `r` is the linearization `r(xi) = r - a^T xi`,
/// so the minimizer of `sum(w * r(xi)^2)` solves `A xi = b`. Accumulation is
/// in `f64` and [`NormalEquations::merge`] is associative and commutative, so
/// partial sums can be combined in any order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalEquations {
    /// The 6x6 information matrix.
    pub a: Mat6,
    /// The right-hand side.
    pub b: Vec6,
    /// Sum of the point-to-plane residuals.
    pub residual_sum: f64,
    /// Sum of the squared point-to-plane residuals.
    pub squared_sum: f64,
    /// Number of point-to-plane correspondences.
    pub inliers: usize,
}

impl Default for NormalEquations {
    fn default() -> Self {
        Self::zeros()
    }
}

impl NormalEquations {
    /// Empty normal equations.
    pub const fn zeros() -> Self {
        Self {
            a: [[0.0; 6]; 6],
            b: [0.0; 6],
            residual_sum: 0.0,
            squared_sum: 0.0,
            inliers: 0,
        }
    }

    /// Add the weighted row `a` with residual `r` to `A` and `b`.
    #[inline]
    pub fn add_row(&mut self, a: &[f32; 6], r: f32, weight: f32) {
        let a = a.map(f64::from);
        let (r, w) = (r as f64, weight as f64);
        for i in 0..6 {
            let wai = w * a[i];
            for j in 0..6 {
                self.a[i][j] += wai * a[j];
            }
            self.b[i] += wai * r;
        }
    }

    /// Add a point-to-plane correspondence and record its residual.
    #[inline]
    pub fn add_point_to_plane(&mut self, a: &[f32; 6], r: f32) {
        self.add_row(a, r, 1.0);
        self.residual_sum += r as f64;
        self.squared_sum += (r as f64) * (r as f64);
        self.inliers += 1;
    }

    /// Combine two partial sums.
    pub fn merge(mut self, other: Self) -> Self {
        for i in 0..6 {
            for j in 0..6 {
                self.a[i][j] += other.a[i][j];
            }
            self.b[i] += other.b[i];
        }
        self.residual_sum += other.residual_sum;
        self.squared_sum += other.squared_sum;
        self.inliers += other.inliers;
        self
    }

    /// Root mean square of the point-to-plane residuals, zero without inliers.
    pub fn rms(&self) -> f64 {
        if self.inliers == 0 {
            return 0.0;
        }
        (self.squared_sum / self.inliers as f64).sqrt()
    }

    /// Solve `A * xi = b` for the update `xi = [omega, upsilon]`.
    pub fn solve(&self) -> Result<Vec6, CholeskyError> {
        Ok(Cholesky::new(&self.a)?.solve(&self.b))
    }

    /// Eigenvalue ratio and entropy of `A`.
    ///
    /// A small ratio means some direction of motion is barely constrained,
    /// e.g. sliding along a single plane.
    pub fn conditioning(&self) -> Conditioning {
        let ev = symmetric_eigenvalues(&self.a);
        let (min, max) = (ev[0], ev[5]);
        let eigenvalue_ratio = if max > 0.0 { (min / max).max(0.0) } else { 0.0 };
        let entropy = -ev.iter().map(|l| l.max(f64::MIN_POSITIVE).ln()).sum::<f64>();
        Conditioning {
            eigenvalue_ratio,
            entropy,
        }
    }

    /// Covariance of the update, `sigma^2 * A^-1` with the residual variance
    /// `sigma^2 = sum(r^2) / max(n - 6, 1)`.
    pub fn covariance(&self) -> Result<Mat6, CholeskyError> {
        let dof = self.inliers.saturating_sub(6).max(1) as f64;
        let sigma2 = self.squared_sum / dof;
        let mut cov = Cholesky::new(&self.a)?.inverse();
        cov.iter_mut().flatten().for_each(|c| *c *= sigma2);
        Ok(cov)
    }
}

/// Point-to-plane row for the live point `p` (already in model frame)
/// against the model point `p_model` with normal `n_model`.
///
/// Returns `([p x n_model, n_model], n_model . (p_model - p))`.
#[inline]
pub fn point_to_plane(p: Vec3, p_model: Vec3, n_model: Vec3) -> ([f32; 6], f32) {
    let r = n_model.dot(p_model - p);
    let c = p.cross(n_model);
    ([c.x, c.y, c.z, n_model.x, n_model.y, n_model.z], r)
}

/// Normal alignment row for the rotated live normal `n` against `n_model`.
///
/// Returns `([n x n_model, 0], 1 - n_model . n)`.
#[inline]
pub fn normal_alignment(n: Vec3, n_model: Vec3) -> ([f32; 6], f32) {
    let r = 1.0 - n_model.dot(n);
    let c = n.cross(n_model);
    ([c.x, c.y, c.z, 0.0, 0.0, 0.0], r)
}

/// Photometric row for the live point `p` (in model frame) observed with
/// intensity `live_intensity`, against the model intensity `model_intensity`
/// with image gradient `gradient` at the projection of `p`.
///
/// The residual is `I_model(pi(p)) - I_live`; its Jacobian goes through the
/// projection Jacobian, lens distortion included.
#[inline]
pub fn photometric(
    camera: &PinholeCamera,
    p: Vec3,
    model_intensity: f32,
    gradient: Vec2,
    live_intensity: f32,
) -> ([f32; 6], f32) {
    let [jx, jy] = camera.project_jacobian(p);
    // gradient of the model intensity with respect to the point
    let g = jx * gradient.x + jy * gradient.y;
    let c = p.cross(g);
    let r = model_intensity - live_intensity;
    ([-c.x, -c.y, -c.z, -g.x, -g.y, -g.z], r)
}

/// Sample `image` at the continuous pixel `uv` by bilinear interpolation,
/// returning the value and its central difference gradient.
///
/// Returns `None` when the 4x4 support around `uv` leaves the image.
pub fn sample_with_gradient(image: &Image<f32>, uv: Vec2) -> Option<(f32, Vec2)> {
    let (u0, v0) = (uv.x.floor(), uv.y.floor());
    if u0 < 1.0 || v0 < 1.0 {
        return None;
    }
    let (u, v) = (u0 as usize, v0 as usize);
    if u + 2 >= image.width() || v + 2 >= image.height() {
        return None;
    }
    let (fu, fv) = (uv.x - u0, uv.y - v0);

    let bilinear = |f: &dyn Fn(usize, usize) -> f32| {
        (1.0 - fv) * ((1.0 - fu) * f(u, v) + fu * f(u + 1, v))
            + fv * ((1.0 - fu) * f(u, v + 1) + fu * f(u + 1, v + 1))
    };

    let value = bilinear(&|x, y| image[(x, y)]);
    let gx = bilinear(&|x, y| 0.5 * (image[(x + 1, y)] - image[(x - 1, y)]));
    let gy = bilinear(&|x, y| 0.5 * (image[(x, y + 1)] - image[(x, y - 1)]));

    Some((value, Vec2::new(gx, gy)))
}
