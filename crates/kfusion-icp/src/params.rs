use serde::{Deserialize, Serialize};

use crate::error::IcpError;

/// Early termination of a level on the entropy of the update distribution.
///
/// The entropy `H = -sum(ln lambda_i)` over the eigenvalues of the
/// information matrix falls as correspondences accumulate and the pose
/// settles. A level stops once `H < max_entropy` or once an iteration
/// lowers `H` by less than `min_decrease`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntropyTermination {
    /// Entropy below which a level is considered converged.
    pub max_entropy: f64,
    /// Smallest entropy decrease that keeps a level iterating.
    pub min_decrease: f64,
}

/// Parameters controlling the projective ICP tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcpParams {
    /// Maximum Gauss-Newton iterations per pyramid level, level 0 (finest) first.
    pub max_iterations: Vec<usize>,
    /// Maximum angle in degrees between corresponding normals.
    pub angle_threshold_deg: f32,
    /// Maximum distance in meters between corresponding points.
    pub dist_threshold: f32,
    /// Optional gate on the absolute point-to-plane residual in meters.
    pub p2pl_threshold: Option<f32>,
    /// Minimum number of finest level correspondences to accept a pose.
    pub min_inliers: usize,
    /// Convergence threshold on the change of the RMS residual between iterations.
    pub tolerance: f64,
    /// Weight of the normal alignment term, disabled when zero.
    pub normal_weight: f32,
    /// Weight of the photometric term, disabled when zero.
    pub photometric_weight: f32,
    /// Smallest accepted ratio between the extreme eigenvalues of the
    /// information matrix; below it the system is treated as degenerate.
    pub min_eigenvalue_ratio: f64,
    /// Largest translation in meters the tracker may add to the initial pose.
    pub max_translation: f32,
    /// Largest rotation in degrees the tracker may add to the initial pose.
    pub max_rotation_deg: f32,
    /// Optional entropy based termination of the levels.
    pub entropy_termination: Option<EntropyTermination>,
}

impl Default for IcpParams {
    fn default() -> Self {
        Self {
            max_iterations: vec![10, 5, 4],
            angle_threshold_deg: 20.0,
            dist_threshold: 0.1,
            p2pl_threshold: None,
            min_inliers: 100,
            tolerance: 1e-6,
            normal_weight: 0.0,
            photometric_weight: 0.0,
            min_eigenvalue_ratio: 1e-3,
            max_translation: 0.3,
            max_rotation_deg: 30.0,
            entropy_termination: None,
        }
    }
}

impl IcpParams {
    /// Create default tracker parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-level iteration caps, finest level first.
    pub fn with_max_iterations(mut self, max_iterations: Vec<usize>) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the normal angle threshold in degrees.
    pub fn with_angle_threshold(mut self, degrees: f32) -> Self {
        self.angle_threshold_deg = degrees;
        self
    }

    /// Set the point distance threshold in meters.
    pub fn with_dist_threshold(mut self, meters: f32) -> Self {
        self.dist_threshold = meters;
        self
    }

    /// Set the point-to-plane residual gate.
    pub fn with_p2pl_threshold(mut self, meters: f32) -> Self {
        self.p2pl_threshold = Some(meters);
        self
    }

    /// Set the minimum number of inliers.
    pub fn with_min_inliers(mut self, min_inliers: usize) -> Self {
        self.min_inliers = min_inliers;
        self
    }

    /// Set the convergence tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Set the weight of the normal alignment term.
    pub fn with_normal_weight(mut self, weight: f32) -> Self {
        self.normal_weight = weight;
        self
    }

    /// Set the weight of the photometric term.
    pub fn with_photometric_weight(mut self, weight: f32) -> Self {
        self.photometric_weight = weight;
        self
    }

    /// Set the smallest accepted eigenvalue ratio, zero disables the check.
    pub fn with_min_eigenvalue_ratio(mut self, ratio: f64) -> Self {
        self.min_eigenvalue_ratio = ratio;
        self
    }

    /// Set the largest translation and rotation the tracker may add to the
    /// initial pose.
    pub fn with_max_motion(mut self, meters: f32, degrees: f32) -> Self {
        self.max_translation = meters;
        self.max_rotation_deg = degrees;
        self
    }

    /// Enable entropy based termination.
    pub fn with_entropy_termination(mut self, max_entropy: f64, min_decrease: f64) -> Self {
        self.entropy_termination = Some(EntropyTermination {
            max_entropy,
            min_decrease,
        });
        self
    }

    /// The number of pyramid levels the schedule covers.
    pub fn num_levels(&self) -> usize {
        self.max_iterations.len()
    }

    /// Cosine of the normal angle threshold.
    pub fn cos_angle_threshold(&self) -> f32 {
        self.angle_threshold_deg.to_radians().cos()
    }

    /// Check that the parameters are usable.
    pub fn validate(&self) -> Result<(), IcpError> {
        if self.max_iterations.is_empty() {
            return Err(IcpError::InvalidParams(
                "the iteration schedule is empty".into(),
            ));
        }
        if self.max_iterations[0] == 0 {
            return Err(IcpError::InvalidParams(
                "the finest level needs at least one iteration".into(),
            ));
        }
        if !(self.angle_threshold_deg > 0.0 && self.angle_threshold_deg <= 180.0) {
            return Err(IcpError::InvalidParams(format!(
                "angle threshold must be in (0, 180], got {}",
                self.angle_threshold_deg
            )));
        }
        if !(self.dist_threshold.is_finite() && self.dist_threshold > 0.0) {
            return Err(IcpError::InvalidParams(format!(
                "distance threshold must be positive, got {}",
                self.dist_threshold
            )));
        }
        if let Some(t) = self.p2pl_threshold {
            if !(t.is_finite() && t > 0.0) {
                return Err(IcpError::InvalidParams(format!(
                    "point-to-plane threshold must be positive, got {t}"
                )));
            }
        }
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(IcpError::InvalidParams(format!(
                "tolerance must be non negative, got {}",
                self.tolerance
            )));
        }
        for (name, w) in [
            ("normal", self.normal_weight),
            ("photometric", self.photometric_weight),
        ] {
            if !(w.is_finite() && w >= 0.0) {
                return Err(IcpError::InvalidParams(format!(
                    "{name} weight must be non negative, got {w}"
                )));
            }
        }
        if !(self.min_eigenvalue_ratio >= 0.0 && self.min_eigenvalue_ratio < 1.0) {
            return Err(IcpError::InvalidParams(format!(
                "eigenvalue ratio must be in [0, 1), got {}",
                self.min_eigenvalue_ratio
            )));
        }
        if !(self.max_translation.is_finite() && self.max_translation > 0.0) {
            return Err(IcpError::InvalidParams(format!(
                "maximum translation must be positive, got {}",
                self.max_translation
            )));
        }
        if !(self.max_rotation_deg > 0.0 && self.max_rotation_deg <= 180.0) {
            return Err(IcpError::InvalidParams(format!(
                "maximum rotation must be in (0, 180], got {}",
                self.max_rotation_deg
            )));
        }
        if let Some(EntropyTermination {
            max_entropy,
            min_decrease,
        }) = self.entropy_termination
        {
            if max_entropy.is_nan() || !(min_decrease.is_finite() && min_decrease >= 0.0) {
                return Err(IcpError::InvalidParams(format!(
                    "invalid entropy termination ({max_entropy}, {min_decrease})"
                )));
            }
        }
        Ok(())
    }
}
