use glam::Vec3;
use kfusion_3d::{normals::is_valid_point, Pyramid, PyramidLevel};
use kfusion_image::Image;
use kfusion_lie::SE3;
use kfusion_linalg::{Mat6, Vec6};
use rayon::prelude::*;

use crate::{
    error::IcpError,
    ops::{normal_alignment, photometric, point_to_plane, sample_with_gradient, NormalEquations},
    params::IcpParams,
};

/// Updates smaller than this norm end the iterations of a level.
pub const MIN_UPDATE_NORM: f64 = 1e-7;

/// Statistics of one pyramid level.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LevelStats {
    /// The pyramid level, 0 being the finest.
    pub level: usize,
    /// Signed sum of the point-to-plane residuals of the last iteration.
    pub residual_sum: f64,
    /// RMS of the point-to-plane residuals of the last iteration.
    pub rms: f64,
    /// Number of correspondences of the last iteration.
    pub inliers: usize,
    /// Number of pose updates applied.
    pub iterations: usize,
    /// True if the level stopped on a singular or ill-conditioned system, or
    /// on an update larger than the correspondence gates.
    pub degenerate: bool,
    /// Smallest over largest eigenvalue of the last information matrix.
    pub eigenvalue_ratio: f64,
    /// Entropy of the last information matrix.
    pub entropy: f64,
}

/// Why a pose could not be tracked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackFailure {
    /// Too few correspondences at the finest level.
    InsufficientInliers {
        /// Correspondences found.
        inliers: usize,
        /// Correspondences required.
        min_inliers: usize,
    },
    /// A residual or the pose became NaN or infinite.
    NonFiniteResidual {
        /// The level where it happened.
        level: usize,
    },
    /// The level produced no usable update, e.g. a single plane leaves
    /// in-plane sliding unconstrained.
    Degenerate {
        /// The level where it happened.
        level: usize,
    },
    /// The refined pose moved implausibly far from the initial pose.
    ExcessiveMotion {
        /// Added translation in meters.
        translation: f32,
        /// Added rotation in degrees.
        rotation_deg: f32,
    },
}

impl std::fmt::Display for TrackFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackFailure::InsufficientInliers {
                inliers,
                min_inliers,
            } => write!(f, "{inliers} inliers, at least {min_inliers} required"),
            TrackFailure::NonFiniteResidual { level } => {
                write!(f, "non finite residual at level {level}")
            }
            TrackFailure::Degenerate { level } => {
                write!(f, "degenerate system at level {level}")
            }
            TrackFailure::ExcessiveMotion {
                translation,
                rotation_deg,
            } => write!(
                f,
                "excessive motion of {translation:.3} m and {rotation_deg:.2} deg"
            ),
        }
    }
}

/// Outcome of a tracking call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackStatus {
    /// The pose is reliable.
    Success,
    /// The pose must not be used; the caller should pause and recover.
    Failure(TrackFailure),
}

impl TrackStatus {
    /// True on success.
    pub fn is_success(&self) -> bool {
        matches!(self, TrackStatus::Success)
    }
}

/// Result of the projective ICP tracker.
///
/// The pose maps live camera coordinates into model camera coordinates.
#[derive(Debug, Clone)]
pub struct TrackResult {
    /// Refined pose, or the initial pose on failure.
    pub pose: SE3,
    /// Covariance of the finest level update `[omega, upsilon]`, if the
    /// finest level produced a solvable system.
    pub covariance: Option<Mat6>,
    /// Per level statistics, level 0 (finest) first.
    pub levels: Vec<LevelStats>,
    /// Whether the pose can be used.
    pub status: TrackStatus,
}

/// Accumulate the normal equations of one level at pose `pose`.
///
/// Every valid live pixel is transformed into the model frame and projected
/// into the model image; the nearest model pixel is accepted as a
/// correspondence if it is valid and passes the distance, angle and
/// optional residual gates.
pub fn accumulate_level(
    live: &PyramidLevel,
    model: &PyramidLevel,
    pose: &SE3,
    params: &IcpParams,
) -> NormalEquations {
    let cos_threshold = params.cos_angle_threshold();
    let dist_threshold2 = params.dist_threshold * params.dist_threshold;
    let rotation = pose.rotation();

    let use_normals = params.normal_weight > 0.0;
    let intensities = match (&live.intensity, &model.intensity) {
        (Some(l), Some(m)) if params.photometric_weight > 0.0 => Some((l, m)),
        _ => None,
    };

    (0..live.points.height())
        .into_par_iter()
        .fold(NormalEquations::zeros, |mut eq, v| {
            for u in 0..live.points.width() {
                let (p_live, n_live) = (live.points[(u, v)], live.normals[(u, v)]);
                if !is_valid_point(p_live) || !is_valid_point(n_live) {
                    continue;
                }

                let p = pose.transform_point(p_live);
                let n = rotation.transform(n_live);

                let Some((um, vm)) = model.camera.project_to_pixel(p) else {
                    continue;
                };
                let (p_model, n_model) = (model.points[(um, vm)], model.normals[(um, vm)]);
                if !is_valid_point(p_model) || !is_valid_point(n_model) {
                    continue;
                }
                if (p_model - p).length_squared() > dist_threshold2
                    || n_model.dot(n) < cos_threshold
                {
                    continue;
                }

                let (a, r) = point_to_plane(p, p_model, n_model);
                if params.p2pl_threshold.is_some_and(|t| r.abs() > t) {
                    continue;
                }
                eq.add_point_to_plane(&a, r);

                if use_normals {
                    let (a, r) = normal_alignment(n, n_model);
                    eq.add_row(&a, r, params.normal_weight);
                }

                if let Some((live_intensity, model_intensity)) = intensities {
                    let live_value = live_intensity[(u, v)];
                    add_photometric(&mut eq, model, model_intensity, p, live_value, params);
                }
            }
            eq
        })
        .reduce(NormalEquations::zeros, NormalEquations::merge)
}

fn add_photometric(
    eq: &mut NormalEquations,
    model: &PyramidLevel,
    model_intensity: &Image<f32>,
    p: Vec3,
    live_value: f32,
    params: &IcpParams,
) {
    let Some(uv) = model.camera.project(p) else {
        return;
    };
    let Some((value, gradient)) = sample_with_gradient(model_intensity, uv) else {
        return;
    };
    if value.is_finite() && gradient.is_finite() && live_value.is_finite() {
        let (a, r) = photometric(&model.camera, p, value, gradient, live_value);
        eq.add_row(&a, r, params.photometric_weight);
    }
}

fn check_inputs(live: &Pyramid, model: &Pyramid, params: &IcpParams) -> Result<(), IcpError> {
    params.validate()?;
    if live.num_levels() != model.num_levels() || live.num_levels() != params.num_levels() {
        return Err(IcpError::LevelCountMismatch {
            live: live.num_levels(),
            model: model.num_levels(),
            schedule: params.num_levels(),
        });
    }
    for (level, (l, m)) in live.levels().iter().zip(model.levels()).enumerate() {
        if l.points.size() != m.points.size() {
            return Err(IcpError::SizeMismatch {
                level,
                live: l.points.size(),
                model: m.points.size(),
            });
        }
    }
    Ok(())
}

// a single step may not move correspondences past the association gates
fn update_within_gates(xi: &Vec6, params: &IcpParams) -> bool {
    let omega = (xi[0] * xi[0] + xi[1] * xi[1] + xi[2] * xi[2]).sqrt();
    let upsilon = (xi[3] * xi[3] + xi[4] * xi[4] + xi[5] * xi[5]).sqrt();
    omega <= (params.angle_threshold_deg as f64).to_radians()
        && upsilon <= params.dist_threshold as f64
}

fn check_motion(pose: &SE3, initial: &SE3, params: &IcpParams) -> Option<TrackFailure> {
    let correction = *pose * initial.inverse();
    let translation = correction.translation().length();
    let rotation_deg = correction.rotation().angle().to_degrees();
    (translation > params.max_translation || rotation_deg > params.max_rotation_deg).then_some(
        TrackFailure::ExcessiveMotion {
            translation,
            rotation_deg,
        },
    )
}

/// Estimate the rigid transform aligning a live pyramid to a model pyramid.
///
/// Coarse-to-fine Gauss-Newton on SE(3) with projective data association.
/// Each iteration solves the point-to-plane normal equations (plus the
/// optional normal alignment and photometric terms) and applies the update
/// on the left, `T <- exp(xi) * T`. A level stops when the RMS residual
/// changes by less than `params.tolerance`, the update is negligible, the
/// optional entropy criterion is met or the iteration cap is reached.
/// A singular or ill-conditioned system, or an update larger than the
/// correspondence gates, is discarded and marks the level degenerate.
///
/// Tracking fails when the finest level has too few correspondences, when
/// it applies no update because it is degenerate, or when the refined pose
/// departs from `initial` by more than `params.max_translation` or
/// `params.max_rotation_deg`.
///
/// # Arguments
///
/// * `live` - The live point/normal pyramid.
/// * `model` - The model point/normal pyramid, e.g. a ray-cast prediction.
/// * `params` - The tracker parameters.
/// * `initial` - The initial live to model pose.
///
/// # Returns
///
/// The tracking result. A pose that cannot be tracked is reported through
/// [`TrackStatus::Failure`] with the initial pose; only inconsistent inputs
/// are errors.
pub fn track(
    live: &Pyramid,
    model: &Pyramid,
    params: &IcpParams,
    initial: &SE3,
) -> Result<TrackResult, IcpError> {
    check_inputs(live, model, params)?;

    let num_levels = live.num_levels();
    let mut pose = *initial;
    let mut levels: Vec<LevelStats> = (0..num_levels)
        .map(|level| LevelStats {
            level,
            ..Default::default()
        })
        .collect();
    let mut covariance = None;
    let mut failure = None;

    'levels: for level in (0..num_levels).rev() {
        let (live_level, model_level) = (&live.levels()[level], &model.levels()[level]);
        let stats = &mut levels[level];
        let mut prev_rms = f64::INFINITY;
        let mut prev_entropy = f64::INFINITY;

        for i in 0..params.max_iterations[level] {
            let eq = accumulate_level(live_level, model_level, &pose, params);
            stats.residual_sum = eq.residual_sum;
            stats.rms = eq.rms();
            stats.inliers = eq.inliers;

            log::debug!(
                "level {level} iteration {i}: {} inliers, rms {:.6}",
                eq.inliers,
                stats.rms
            );

            if !eq.residual_sum.is_finite() || !eq.squared_sum.is_finite() {
                failure = Some(TrackFailure::NonFiniteResidual { level });
                break 'levels;
            }

            let conditioning = eq.conditioning();
            stats.eigenvalue_ratio = conditioning.eigenvalue_ratio;
            stats.entropy = conditioning.entropy;
            if conditioning.eigenvalue_ratio < params.min_eigenvalue_ratio {
                log::warn!(
                    "level {level}: ill-conditioned system, eigenvalue ratio {:.3e}",
                    conditioning.eigenvalue_ratio
                );
                stats.degenerate = true;
                break;
            }

            let xi = match eq.solve() {
                Ok(xi) => xi,
                Err(err) => {
                    log::warn!("level {level}: degenerate system, {err}");
                    stats.degenerate = true;
                    break;
                }
            };

            if !update_within_gates(&xi, params) {
                log::warn!("level {level}: update exceeds the correspondence gates");
                stats.degenerate = true;
                break;
            }

            if level == 0 {
                covariance = eq.covariance().ok();
            }

            let update = xi.map(|x| x as f32);
            let next = pose.retract(update);
            if !next.is_finite() {
                failure = Some(TrackFailure::NonFiniteResidual { level });
                break 'levels;
            }
            pose = next;
            stats.iterations += 1;

            let update_norm = xi.iter().map(|x| x * x).sum::<f64>().sqrt();
            let entropy_converged = params.entropy_termination.is_some_and(|t| {
                conditioning.entropy < t.max_entropy
                    || prev_entropy - conditioning.entropy < t.min_decrease
            });
            if (prev_rms - stats.rms).abs() < params.tolerance
                || update_norm < MIN_UPDATE_NORM
                || entropy_converged
            {
                log::debug!("level {level} converged in {} iterations", i + 1);
                break;
            }
            prev_rms = stats.rms;
            prev_entropy = conditioning.entropy;
        }
    }

    let finest = &levels[0];
    if failure.is_none() {
        failure = if finest.inliers < params.min_inliers {
            Some(TrackFailure::InsufficientInliers {
                inliers: finest.inliers,
                min_inliers: params.min_inliers,
            })
        } else if finest.degenerate && finest.iterations == 0 {
            Some(TrackFailure::Degenerate { level: 0 })
        } else {
            check_motion(&pose, initial, params)
        };
    }

    let status = match failure {
        Some(failure) => {
            log::warn!("tracking failed: {failure}");
            TrackStatus::Failure(failure)
        }
        None => TrackStatus::Success,
    };

    Ok(TrackResult {
        pose: if status.is_success() { pose } else { *initial },
        covariance: if status.is_success() { covariance } else { None },
        levels,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kfusion_3d::{normals::NormalParams, synthetic::Scene, PinholeCamera};
    use kfusion_image::ImageSize;
    use kfusion_lie::SO3;

    fn camera() -> PinholeCamera {
        PinholeCamera::new(
            60.0,
            60.0,
            39.5,
            29.5,
            ImageSize {
                width: 80,
                height: 60,
            },
        )
    }

    fn wall_pyramid(levels: usize) -> Result<Pyramid, kfusion_3d::PreprocError> {
        let cam = camera();
        let scene = Scene::new().with_plane(Vec3::new(0.0, 0.0, 1.5), Vec3::new(0.0, 0.0, -1.0));
        let depth = scene.render_depth(&cam, &SE3::IDENTITY);
        Pyramid::from_depth(&cam, &depth, levels, &NormalParams::default())
    }

    #[test]
    fn test_empty_live_is_failure() -> Result<(), Box<dyn std::error::Error>> {
        let cam = camera();
        let model = wall_pyramid(2)?;
        let empty = Image::from_size_val(cam.size, f32::NAN);
        let live = Pyramid::from_depth(&cam, &empty, 2, &NormalParams::default())?;

        let initial = SE3::from_translation(Vec3::new(0.01, 0.0, 0.0));
        let params = IcpParams::new().with_max_iterations(vec![5, 5]);
        let result = track(&live, &model, &params, &initial)?;

        assert!(matches!(
            result.status,
            TrackStatus::Failure(TrackFailure::InsufficientInliers { inliers: 0, .. })
        ));
        assert_eq!(result.pose, initial);
        assert!(result.covariance.is_none());
        assert!(result.levels.iter().all(|l| l.degenerate && l.iterations == 0));
        Ok(())
    }

    #[test]
    fn test_single_plane_is_degenerate() -> Result<(), Box<dyn std::error::Error>> {
        // a plane constrains only three degrees of freedom, the model camera
        // slid along one of the free ones
        let cam = camera();
        let live = wall_pyramid(2)?;
        let scene = Scene::new().with_plane(Vec3::new(0.0, 0.0, 1.5), Vec3::new(0.0, 0.0, -1.0));
        let model_pose = SE3::from_translation(Vec3::new(0.05, 0.0, 0.02));
        let depth = scene.render_depth(&cam, &model_pose);
        let model = Pyramid::from_depth(&cam, &depth, 2, &NormalParams::default())?;

        let params = IcpParams::new()
            .with_max_iterations(vec![5, 5])
            .with_min_inliers(10);
        let result = track(&live, &model, &params, &SE3::IDENTITY)?;

        assert_eq!(
            result.status,
            TrackStatus::Failure(TrackFailure::Degenerate { level: 0 })
        );
        assert_eq!(result.pose, SE3::IDENTITY);
        assert!(result.covariance.is_none());
        assert!(result.levels[0].inliers > 1000);
        for stats in &result.levels {
            assert!(stats.degenerate && stats.iterations == 0, "{stats:?}");
            assert!(stats.eigenvalue_ratio < params.min_eigenvalue_ratio);
        }
        Ok(())
    }

    #[test]
    fn test_update_gates() {
        let params = IcpParams::new()
            .with_dist_threshold(0.1)
            .with_angle_threshold(20.0);
        assert!(update_within_gates(&[0.01, 0.0, -0.02, 0.05, 0.0, 0.05], &params));
        assert!(!update_within_gates(&[0.0, 0.0, 0.0, 0.08, 0.0, 0.08], &params));
        assert!(!update_within_gates(&[0.4, 0.0, 0.0, 0.0, 0.0, 0.0], &params));
        assert!(!update_within_gates(&[f64::NAN, 0.0, 0.0, 0.0, 0.0, 0.0], &params));
    }

    #[test]
    fn test_motion_limits() {
        let params = IcpParams::new().with_max_motion(0.1, 10.0);
        let initial = SE3::from_rotation(SO3::from_axis_angle(Vec3::Y, 0.3));
        let small = SE3::from_translation(Vec3::new(0.05, 0.0, 0.0)) * initial;
        assert_eq!(check_motion(&small, &initial, &params), None);
        assert_eq!(check_motion(&initial, &initial, &params), None);

        let far = SE3::from_translation(Vec3::new(0.0, 0.2, 0.0)) * initial;
        assert!(matches!(
            check_motion(&far, &initial, &params),
            Some(TrackFailure::ExcessiveMotion { translation, .. }) if (translation - 0.2).abs() < 1e-5
        ));

        let turned = SE3::from_rotation(SO3::from_axis_angle(Vec3::X, 15f32.to_radians())) * initial;
        assert!(matches!(
            check_motion(&turned, &initial, &params),
            Some(TrackFailure::ExcessiveMotion { rotation_deg, .. }) if (rotation_deg - 15.0).abs() < 1e-2
        ));
    }

    #[test]
    fn test_level_mismatch() -> Result<(), Box<dyn std::error::Error>> {
        let (a, b) = (wall_pyramid(2)?, wall_pyramid(3)?);
        let params = IcpParams::new().with_max_iterations(vec![5, 5]);
        assert!(matches!(
            track(&a, &b, &params, &SE3::IDENTITY),
            Err(IcpError::LevelCountMismatch { .. })
        ));
        let params = IcpParams::new().with_dist_threshold(0.0);
        assert!(matches!(
            track(&b, &b, &params, &SE3::IDENTITY),
            Err(IcpError::InvalidParams(_))
        ));
        Ok(())
    }
}
