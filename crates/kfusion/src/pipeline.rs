use kfusion_3d::{
    depth::{convert_depth, grey_from_rgb},
    PinholeCamera, PreprocError, Pyramid,
};
use kfusion_icp::{track, IcpError, LevelStats, TrackFailure, TrackStatus};
use kfusion_image::Image;
use kfusion_lie::{SE3, SO3};
use kfusion_linalg::Mat6;
use kfusion_tsdf::{Prediction, TsdfVolume, VolumeError, VolumeSnapshot};

use crate::config::{ConfigError, FusionConfig};

/// Errors that abort the processing of a frame.
///
/// A pose that cannot be tracked is not an error; it is reported through
/// [`FrameStatus::Failed`].
#[derive(Debug, thiserror::Error)]
pub enum FusionError {
    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The frame could not be preprocessed.
    #[error(transparent)]
    Preproc(#[from] PreprocError),

    /// The tracker was called with inconsistent inputs.
    #[error(transparent)]
    Icp(#[from] IcpError),

    /// The volume could not be fused or ray-cast.
    #[error(transparent)]
    Volume(#[from] VolumeError),
}

/// One frame from the capture collaborator.
#[derive(Debug, Clone)]
pub struct DepthFrame {
    /// Raw depth in sensor units, zero where missing.
    pub depth: Image<u16>,
    /// Optional colour image registered to the depth map.
    pub rgb: Option<Image<[u8; 3]>>,
    /// Optional rotation of this frame's camera relative to the previous
    /// frame's camera, e.g. integrated from an IMU.
    pub prior_rotation: Option<SO3>,
}

impl DepthFrame {
    /// A frame with depth only.
    pub fn new(depth: Image<u16>) -> Self {
        Self {
            depth,
            rgb: None,
            prior_rotation: None,
        }
    }

    /// Attach a colour image.
    pub fn with_rgb(mut self, rgb: Image<[u8; 3]>) -> Self {
        self.rgb = Some(rgb);
        self
    }

    /// Attach an inter-frame rotation prior.
    pub fn with_prior_rotation(mut self, rotation: SO3) -> Self {
        self.prior_rotation = Some(rotation);
        self
    }
}

/// State of the tracking loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
    /// Waiting for the first usable frame.
    Initializing,
    /// Tracking and fusing every frame.
    Tracking,
    /// The last frame could not be tracked; fusion is suspended until a
    /// frame is tracked against the last model again.
    Paused,
}

/// What happened to a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameStatus {
    /// The frame started a new model at the current pose.
    Initialized,
    /// The frame was tracked and fused.
    Tracked,
    /// The frame was dropped; pose and volume are unchanged.
    Failed(TrackFailure),
}

/// Result of [`FusionPipeline::process_frame`].
#[derive(Debug, Clone)]
pub struct FrameResult {
    /// Index of the frame since the pipeline was created.
    pub frame_index: usize,
    /// The state after the frame.
    pub state: TrackingState,
    /// What happened to the frame.
    pub status: FrameStatus,
    /// The camera-to-world pose after the frame.
    pub pose: SE3,
    /// Per level tracker statistics, empty when no tracking was attempted.
    pub levels: Vec<LevelStats>,
    /// Covariance of the finest level update, if available.
    pub covariance: Option<Mat6>,
    /// True if the frame was fused into the volume.
    pub fused: bool,
}

/// The per-frame tracking and fusion loop.
///
/// Every frame is preprocessed into a pyramid, tracked against the model
/// ray-cast at the previous pose, fused at the new pose and ray-cast again
/// to produce the next model.
pub struct FusionPipeline {
    config: FusionConfig,
    camera: PinholeCamera,
    volume: TsdfVolume,
    state: TrackingState,
    // camera-to-world pose of the last accepted frame
    pose: SE3,
    model: Option<Pyramid>,
    prediction: Option<Prediction>,
    // rotation priors of the frames dropped since the model was built
    pending_rotation: SO3,
    frame_index: usize,
}

impl FusionPipeline {
    /// Create a pipeline with an empty volume at the identity pose.
    ///
    /// # Arguments
    ///
    /// * `config` - The pipeline configuration, validated here.
    /// * `camera` - The depth camera intrinsics.
    pub fn new(config: FusionConfig, camera: PinholeCamera) -> Result<Self, FusionError> {
        config.validate()?;
        camera.validate()?;
        let volume = TsdfVolume::new(config.grid, config.tsdf)?;

        log::info!(
            "fusion pipeline: {}x{} camera, {:?} volume cells",
            camera.size.width,
            camera.size.height,
            config.grid.resolution
        );

        Ok(Self {
            config,
            camera,
            volume,
            state: TrackingState::Initializing,
            pose: SE3::IDENTITY,
            model: None,
            prediction: None,
            pending_rotation: SO3::IDENTITY,
            frame_index: 0,
        })
    }

    /// Process one frame.
    ///
    /// The first frame with enough valid pixels initializes the model at the
    /// current pose. Later frames are tracked; on success the pose is updated
    /// and the frame is fused, on failure the frame is dropped and the
    /// pipeline pauses until a frame can be tracked again.
    pub fn process_frame(&mut self, frame: &DepthFrame) -> Result<FrameResult, FusionError> {
        let depth = convert_depth(&frame.depth, &self.config.depth)?;
        let grey = frame.rgb.as_ref().map(grey_from_rgb);

        let mut live = Pyramid::from_depth(
            &self.camera,
            &depth,
            self.config.pyramid_levels,
            &self.config.normals,
        )?;
        if let Some(grey) = &grey {
            live = live.with_intensity(grey)?;
        }

        let frame_index = self.frame_index;
        self.frame_index += 1;

        let prior = match frame.prior_rotation {
            Some(r) => self.pending_rotation * r,
            None => self.pending_rotation,
        };

        let Some(model) = self.model.as_ref() else {
            return self.initialize(frame_index, &live, &depth, grey);
        };

        let result = track(&live, model, &self.config.icp, &SE3::from_rotation(prior))?;

        match result.status {
            TrackStatus::Success => {
                self.pose = (self.pose * result.pose).renormalize();
                self.volume.fuse(&depth, &self.camera, &self.pose)?;
                self.update_model(grey)?;
                self.pending_rotation = SO3::IDENTITY;

                if self.state == TrackingState::Paused {
                    log::info!("frame {frame_index}: tracking recovered");
                }
                self.state = TrackingState::Tracking;

                log::debug!(
                    "frame {frame_index}: tracked, {} inliers",
                    result.levels[0].inliers
                );

                Ok(FrameResult {
                    frame_index,
                    state: self.state,
                    status: FrameStatus::Tracked,
                    pose: self.pose,
                    levels: result.levels,
                    covariance: result.covariance,
                    fused: true,
                })
            }
            TrackStatus::Failure(failure) => {
                log::warn!("frame {frame_index}: tracking failed, {failure}");
                self.state = TrackingState::Paused;
                self.pending_rotation = prior;

                Ok(FrameResult {
                    frame_index,
                    state: self.state,
                    status: FrameStatus::Failed(failure),
                    pose: self.pose,
                    levels: result.levels,
                    covariance: None,
                    fused: false,
                })
            }
        }
    }

    fn initialize(
        &mut self,
        frame_index: usize,
        live: &Pyramid,
        depth: &Image<f32>,
        grey: Option<Image<f32>>,
    ) -> Result<FrameResult, FusionError> {
        let valid = live.levels()[0].num_valid();
        let min_inliers = self.config.icp.min_inliers;
        if valid < min_inliers {
            log::warn!("frame {frame_index}: {valid} valid pixels, cannot initialize");
            return Ok(FrameResult {
                frame_index,
                state: self.state,
                status: FrameStatus::Failed(TrackFailure::InsufficientInliers {
                    inliers: valid,
                    min_inliers,
                }),
                pose: self.pose,
                levels: Vec::new(),
                covariance: None,
                fused: false,
            });
        }

        self.volume.fuse(depth, &self.camera, &self.pose)?;
        self.update_model(grey)?;
        self.pending_rotation = SO3::IDENTITY;
        self.state = TrackingState::Tracking;
        log::info!("frame {frame_index}: model initialized");

        Ok(FrameResult {
            frame_index,
            state: self.state,
            status: FrameStatus::Initialized,
            pose: self.pose,
            levels: Vec::new(),
            covariance: None,
            fused: true,
        })
    }

    // ray-cast the volume at the current pose into the next model pyramid
    fn update_model(&mut self, grey: Option<Image<f32>>) -> Result<(), FusionError> {
        let prediction = self.volume.ray_trace(&self.camera, &self.pose)?;
        let mut model = Pyramid::from_prediction(
            &self.camera,
            &prediction.points,
            &prediction.normals,
            self.config.pyramid_levels,
            &self.config.normals,
        )?;
        if let Some(grey) = &grey {
            model = model.with_intensity(grey)?;
        }
        self.model = Some(model);
        self.prediction = Some(prediction);
        Ok(())
    }

    /// Return to [`TrackingState::Initializing`] at the identity pose,
    /// optionally clearing the volume.
    pub fn reset(&mut self, reset_volume: bool) {
        self.state = TrackingState::Initializing;
        self.pose = SE3::IDENTITY;
        self.model = None;
        self.prediction = None;
        self.pending_rotation = SO3::IDENTITY;
        if reset_volume {
            self.volume.reset();
        }
        log::info!("pipeline reset, volume cleared: {reset_volume}");
    }

    /// The camera-to-world pose of the last accepted frame.
    pub fn pose(&self) -> SE3 {
        self.pose
    }

    /// The current state.
    pub fn state(&self) -> TrackingState {
        self.state
    }

    /// The last ray-cast points and normals, in the camera frame of
    /// [`FusionPipeline::pose`].
    pub fn prediction(&self) -> Option<&Prediction> {
        self.prediction.as_ref()
    }

    /// The volume.
    pub fn volume(&self) -> &TsdfVolume {
        &self.volume
    }

    /// An independent copy of the volume, safe to persist while fusion goes on.
    pub fn volume_snapshot(&self) -> VolumeSnapshot {
        self.volume.snapshot()
    }

    /// Number of frames processed so far.
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// The configuration.
    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// The camera.
    pub fn camera(&self) -> &PinholeCamera {
        &self.camera
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kfusion_image::ImageSize;

    fn camera() -> PinholeCamera {
        PinholeCamera::new(
            40.0,
            40.0,
            15.5,
            11.5,
            ImageSize {
                width: 32,
                height: 24,
            },
        )
    }

    fn small_config() -> FusionConfig {
        let mut config = FusionConfig::default();
        config.grid = kfusion_tsdf::GridConfig::cube(glam::Vec3::new(0.0, 0.0, 1.0), 1.0, 16);
        config.icp = config.icp.with_max_iterations(vec![5, 3]).with_min_inliers(50);
        config.pyramid_levels = 2;
        config
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = small_config();
        config.pyramid_levels = 3;
        assert!(matches!(
            FusionPipeline::new(config, camera()),
            Err(FusionError::Config(ConfigError::LevelMismatch { .. }))
        ));
    }

    #[test]
    fn test_empty_frame_does_not_initialize() -> Result<(), FusionError> {
        let cam = camera();
        let mut pipeline = FusionPipeline::new(small_config(), cam)?;
        let frame = DepthFrame::new(Image::from_size_val(cam.size, 0u16));

        let result = pipeline.process_frame(&frame)?;
        assert_eq!(result.state, TrackingState::Initializing);
        assert!(matches!(
            result.status,
            FrameStatus::Failed(TrackFailure::InsufficientInliers { inliers: 0, .. })
        ));
        assert!(!result.fused);
        assert_eq!(pipeline.volume().num_observed(), 0);
        assert!(pipeline.prediction().is_none());
        assert_eq!(pipeline.frame_index(), 1);
        Ok(())
    }

    #[test]
    fn test_first_frame_initializes() -> Result<(), FusionError> {
        let cam = camera();
        let mut pipeline = FusionPipeline::new(small_config(), cam)?;
        let frame = DepthFrame::new(Image::from_size_val(cam.size, 1000u16));

        let result = pipeline.process_frame(&frame)?;
        assert_eq!(result.status, FrameStatus::Initialized);
        assert_eq!(pipeline.state(), TrackingState::Tracking);
        assert_eq!(result.pose, SE3::IDENTITY);
        assert!(pipeline.volume().num_observed() > 0);
        assert!(pipeline.prediction().is_some());

        pipeline.reset(true);
        assert_eq!(pipeline.state(), TrackingState::Initializing);
        assert_eq!(pipeline.volume().num_observed(), 0);
        assert!(pipeline.prediction().is_none());
        Ok(())
    }

    #[test]
    fn test_frame_size_mismatch() -> Result<(), FusionError> {
        let mut pipeline = FusionPipeline::new(small_config(), camera())?;
        let frame = DepthFrame::new(Image::from_size_val(
            ImageSize {
                width: 16,
                height: 12,
            },
            1000u16,
        ));
        assert!(matches!(
            pipeline.process_frame(&frame),
            Err(FusionError::Preproc(PreprocError::SizeMismatch { .. }))
        ));
        Ok(())
    }
}
