use std::path::Path;

use kfusion_3d::{depth::DepthParams, normals::NormalParams, PreprocError};
use kfusion_icp::{IcpError, IcpParams};
use kfusion_tsdf::{GridConfig, TsdfParams, VolumeError};
use serde::{Deserialize, Serialize};

/// Errors raised while loading or validating a [`FusionConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration is not valid JSON or has unknown field types.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The configuration file could not be read.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The depth conversion parameters are invalid.
    #[error("depth: {0}")]
    Depth(PreprocError),

    /// The tracker parameters are invalid.
    #[error("icp: {0}")]
    Icp(IcpError),

    /// The volume geometry or fusion parameters are invalid.
    #[error("volume: {0}")]
    Volume(VolumeError),

    /// The pyramid depth does not match the iteration schedule.
    #[error("{pyramid_levels} pyramid levels but {schedule} entries in the iteration schedule")]
    LevelMismatch {
        /// Number of pyramid levels.
        pyramid_levels: usize,
        /// Length of the ICP iteration schedule.
        schedule: usize,
    },

    /// The normal estimation parameters are invalid.
    #[error("normals: {0}")]
    InvalidNormals(String),
}

/// Configuration of the whole tracking and fusion loop.
///
/// Every field falls back to its default when missing from the JSON input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Raw depth conversion and valid range.
    pub depth: DepthParams,
    /// Number of pyramid levels, equal to the ICP schedule length.
    pub pyramid_levels: usize,
    /// Normal estimation.
    pub normals: NormalParams,
    /// Projective ICP.
    pub icp: IcpParams,
    /// Volume bounds and resolution.
    pub grid: GridConfig,
    /// Fusion and ray-casting.
    pub tsdf: TsdfParams,
}

impl Default for FusionConfig {
    fn default() -> Self {
        let icp = IcpParams::default();
        Self {
            depth: DepthParams::default(),
            pyramid_levels: icp.num_levels(),
            normals: NormalParams::default(),
            icp,
            grid: GridConfig::default(),
            tsdf: TsdfParams::default(),
        }
    }
}

impl FusionConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    /// Serialize the configuration as pretty printed JSON.
    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject unusable configurations before any frame is processed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.depth.validate().map_err(ConfigError::Depth)?;
        self.icp.validate().map_err(ConfigError::Icp)?;
        self.grid.validate().map_err(ConfigError::Volume)?;
        self.tsdf.validate().map_err(ConfigError::Volume)?;

        if self.pyramid_levels == 0 || self.pyramid_levels != self.icp.num_levels() {
            return Err(ConfigError::LevelMismatch {
                pyramid_levels: self.pyramid_levels,
                schedule: self.icp.num_levels(),
            });
        }

        let n = &self.normals;
        if !(n.max_depth_discontinuity.is_finite() && n.max_depth_discontinuity > 0.0) {
            return Err(ConfigError::InvalidNormals(format!(
                "depth discontinuity must be positive, got {}",
                n.max_depth_discontinuity
            )));
        }
        if !(n.min_area_ratio.is_finite() && n.min_area_ratio >= 0.0) {
            return Err(ConfigError::InvalidNormals(format!(
                "area ratio must be non negative, got {}",
                n.min_area_ratio
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() -> Result<(), ConfigError> {
        let config = FusionConfig::default();
        assert_eq!(config.pyramid_levels, 3);
        config.validate()?;
        Ok(())
    }

    #[test]
    fn test_partial_json() -> Result<(), ConfigError> {
        let config = FusionConfig::from_json_str(
            r#"{
                "pyramid_levels": 2,
                "icp": { "max_iterations": [8, 4], "min_inliers": 50 },
                "tsdf": { "truncation": 0.05 }
            }"#,
        )?;
        assert_eq!(config.pyramid_levels, 2);
        assert_eq!(config.icp.max_iterations, vec![8, 4]);
        assert_eq!(config.icp.min_inliers, 50);
        assert_eq!(config.tsdf.truncation, 0.05);
        assert_eq!(config.tsdf.max_weight, TsdfParams::default().max_weight);
        assert_eq!(config.grid, GridConfig::default());
        Ok(())
    }

    #[test]
    fn test_level_mismatch() {
        let res = FusionConfig::from_json_str(r#"{ "pyramid_levels": 2 }"#);
        assert!(matches!(
            res,
            Err(ConfigError::LevelMismatch {
                pyramid_levels: 2,
                schedule: 3
            })
        ));
    }

    #[test]
    fn test_invalid_sections() {
        let grid = FusionConfig::from_json_str(
            r#"{
                "pyramid_levels": 3,
                "grid": { "min": [0, 0, 1], "max": [1, 1, 1], "resolution": [8, 8, 8] }
            }"#,
        );
        assert!(matches!(
            grid,
            Err(ConfigError::Volume(VolumeError::InvalidBounds { .. }))
        ));

        let depth = FusionConfig::from_json_str(
            r#"{ "pyramid_levels": 3, "depth": { "min_depth": 2.0, "max_depth": 1.0 } }"#,
        );
        assert!(matches!(depth, Err(ConfigError::Depth(_))));

        let icp = FusionConfig::from_json_str(
            r#"{ "pyramid_levels": 3, "icp": { "max_iterations": [0, 5, 5] } }"#,
        );
        assert!(matches!(icp, Err(ConfigError::Icp(IcpError::InvalidParams(_)))));

        let normals = FusionConfig::from_json_str(
            r#"{ "pyramid_levels": 3, "normals": { "max_depth_discontinuity": 0.0 } }"#,
        );
        assert!(matches!(normals, Err(ConfigError::InvalidNormals(_))));

        assert!(matches!(
            FusionConfig::from_json_str("{ not json"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_json_file_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let config = FusionConfig {
            icp: IcpParams::default().with_min_inliers(42),
            ..Default::default()
        };

        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(config.to_json_string()?.as_bytes())?;

        let loaded = FusionConfig::from_json_file(file.path())?;
        assert_eq!(loaded, config);

        let missing = FusionConfig::from_json_file(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
        Ok(())
    }
}
