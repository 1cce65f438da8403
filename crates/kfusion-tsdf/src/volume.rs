use glam::Vec3;
use kfusion_3d::{depth::is_valid_depth, PinholeCamera};
use kfusion_image::Image;
use kfusion_lie::SE3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{error::VolumeError, grid::GridConfig};

/// A single volume cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    /// Truncated signed distance in units of the truncation distance, in `[-1, 1]`.
    pub tsdf: f32,
    /// Confidence accumulator; zero means no surface information.
    pub weight: f32,
}

impl Cell {
    /// The value of a cell that has never been observed.
    pub const UNKNOWN: Cell = Cell {
        tsdf: -1.01,
        weight: 0.0,
    };

    /// True if the cell carries surface information above `threshold`.
    #[inline]
    pub fn is_observed(&self, threshold: f32) -> bool {
        self.weight > threshold
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

/// Parameters of the fusion and ray-casting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TsdfParams {
    /// Truncation distance `mu` in meters.
    pub truncation: f32,
    /// Saturation value of the cell weights.
    pub max_weight: f32,
    /// Cells must have a weight above this value to be ray-cast.
    pub weight_threshold: f32,
    /// Ray marching step as a fraction of the smallest cell spacing.
    pub raycast_step: f32,
}

impl Default for TsdfParams {
    fn default() -> Self {
        Self {
            truncation: 0.04,
            max_weight: 100.0,
            weight_threshold: 0.0,
            raycast_step: 0.5,
        }
    }
}

impl TsdfParams {
    /// Set the truncation distance.
    pub fn with_truncation(mut self, mu: f32) -> Self {
        self.truncation = mu;
        self
    }

    /// Set the maximum weight.
    pub fn with_max_weight(mut self, max_weight: f32) -> Self {
        self.max_weight = max_weight;
        self
    }

    /// Set the ray-casting weight threshold.
    pub fn with_weight_threshold(mut self, threshold: f32) -> Self {
        self.weight_threshold = threshold;
        self
    }

    /// Set the ray marching step.
    pub fn with_raycast_step(mut self, step: f32) -> Self {
        self.raycast_step = step;
        self
    }

    /// Check that the parameters are usable.
    pub fn validate(&self) -> Result<(), VolumeError> {
        if !(self.truncation.is_finite() && self.truncation > 0.0) {
            return Err(VolumeError::InvalidParams(format!(
                "truncation must be positive, got {}",
                self.truncation
            )));
        }
        if !(self.max_weight.is_finite() && self.max_weight >= 1.0) {
            return Err(VolumeError::InvalidParams(format!(
                "max weight must be at least 1, got {}",
                self.max_weight
            )));
        }
        if !(self.weight_threshold >= 0.0 && self.weight_threshold < self.max_weight) {
            return Err(VolumeError::InvalidParams(format!(
                "weight threshold must be in [0, {}), got {}",
                self.max_weight, self.weight_threshold
            )));
        }
        if !(self.raycast_step > 0.0 && self.raycast_step <= 1.0) {
            return Err(VolumeError::InvalidParams(format!(
                "raycast step must be in (0, 1], got {}",
                self.raycast_step
            )));
        }
        Ok(())
    }
}

/// An independent copy of the volume, suitable for serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSnapshot {
    /// The grid geometry, including the world bounding box.
    pub grid: GridConfig,
    /// The fusion parameters.
    pub params: TsdfParams,
    /// The cells, x fastest then y then z.
    pub cells: Vec<Cell>,
}

/// A dense truncated signed distance volume.
///
/// Cells are stored x fastest, then y, then z, so that a z-slice is a
/// contiguous chunk.
#[derive(Debug, Clone)]
pub struct TsdfVolume {
    grid: GridConfig,
    params: TsdfParams,
    spacing: Vec3,
    cells: Vec<Cell>,
}

impl TsdfVolume {
    /// Create a volume with every cell unknown.
    ///
    /// # Errors
    ///
    /// Rejects empty bounds, degenerate resolutions and invalid parameters.
    pub fn new(grid: GridConfig, params: TsdfParams) -> Result<Self, VolumeError> {
        grid.validate()?;
        params.validate()?;

        let spacing = grid.spacing();
        if params.truncation < 2.0 * spacing.max_element() {
            log::warn!(
                "truncation {} is below two cells ({}), ray-casting may miss surfaces",
                params.truncation,
                spacing.max_element()
            );
        }

        Ok(Self {
            grid,
            params,
            spacing,
            cells: vec![Cell::UNKNOWN; grid.num_cells()],
        })
    }

    /// Rebuild a volume from a snapshot.
    pub fn from_snapshot(snapshot: VolumeSnapshot) -> Result<Self, VolumeError> {
        let VolumeSnapshot {
            grid,
            params,
            cells,
        } = snapshot;
        let mut volume = Self::new(grid, params)?;
        if cells.len() != volume.cells.len() {
            return Err(VolumeError::SnapshotSize {
                expected: volume.cells.len(),
                actual: cells.len(),
            });
        }
        volume.cells = cells;
        Ok(volume)
    }

    /// Copy the volume into a snapshot.
    pub fn snapshot(&self) -> VolumeSnapshot {
        VolumeSnapshot {
            grid: self.grid,
            params: self.params,
            cells: self.cells.clone(),
        }
    }

    /// Set every cell back to [`Cell::UNKNOWN`].
    pub fn reset(&mut self) {
        self.cells.fill(Cell::UNKNOWN);
    }

    /// The grid geometry.
    pub fn grid(&self) -> &GridConfig {
        &self.grid
    }

    /// The fusion parameters.
    pub fn params(&self) -> &TsdfParams {
        &self.params
    }

    /// Cell size along each axis.
    pub fn spacing(&self) -> Vec3 {
        self.spacing
    }

    /// Number of cells along x, y and z.
    pub fn resolution(&self) -> [usize; 3] {
        self.grid.resolution
    }

    /// All cells, x fastest.
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Linear index of cell `(i, j, k)`, if inside the grid.
    #[inline]
    pub fn index(&self, i: usize, j: usize, k: usize) -> Option<usize> {
        let [nx, ny, nz] = self.grid.resolution;
        (i < nx && j < ny && k < nz).then(|| (k * ny + j) * nx + i)
    }

    /// The cell `(i, j, k)`, if inside the grid.
    #[inline]
    pub fn cell(&self, i: usize, j: usize, k: usize) -> Option<&Cell> {
        self.index(i, j, k).map(|idx| &self.cells[idx])
    }

    /// Centre of cell `(i, j, k)` in world coordinates.
    #[inline]
    pub fn cell_center(&self, i: usize, j: usize, k: usize) -> Vec3 {
        self.grid.cell_center(i, j, k)
    }

    /// Continuous grid coordinates of a world point.
    #[inline]
    pub fn world_to_grid(&self, p: Vec3) -> Vec3 {
        self.grid.world_to_grid(p)
    }

    /// Number of cells with a non-zero weight.
    pub fn num_observed(&self) -> usize {
        self.cells.par_iter().filter(|c| c.weight > 0.0).count()
    }

    /// Fuse a metric depth map seen from the camera-to-world pose `pose`.
    ///
    /// Every cell whose centre projects onto a valid depth sample `D` at
    /// camera depth `z` with `D - z >= -mu` is updated with the running
    /// average of `clamp((D - z) / mu, -1, 1)`; the weight grows by one up
    /// to the maximum weight. Other cells are left untouched.
    ///
    /// # Returns
    ///
    /// The number of updated cells.
    pub fn fuse(
        &mut self,
        depth: &Image<f32>,
        camera: &PinholeCamera,
        pose: &SE3,
    ) -> Result<usize, VolumeError> {
        camera.validate()?;
        if depth.size() != camera.size {
            return Err(VolumeError::SizeMismatch {
                expected: camera.size,
                actual: depth.size(),
            });
        }

        let world_to_camera = pose.inverse();
        let [nx, ny, _] = self.grid.resolution;
        let grid = self.grid;
        let (mu, max_weight) = (self.params.truncation, self.params.max_weight);

        let updated = self
            .cells
            .par_chunks_mut(nx * ny)
            .enumerate()
            .map(|(k, slice)| {
                let mut updated = 0;
                for j in 0..ny {
                    for i in 0..nx {
                        let p = world_to_camera.transform_point(grid.cell_center(i, j, k));
                        let Some((u, v)) = camera.project_to_pixel(p) else {
                            continue;
                        };
                        let d = depth[(u, v)];
                        if !is_valid_depth(d) {
                            continue;
                        }
                        let sdf = d - p.z;
                        if sdf < -mu {
                            continue;
                        }
                        update_cell(&mut slice[j * nx + i], (sdf / mu).clamp(-1.0, 1.0), max_weight);
                        updated += 1;
                    }
                }
                updated
            })
            .sum::<usize>();

        log::debug!("fused depth map into {updated} cells");

        Ok(updated)
    }
}

// running average with the weight saturating at `max_weight`
#[inline]
fn update_cell(cell: &mut Cell, tsdf: f32, max_weight: f32) {
    let w = cell.weight;
    cell.tsdf = (cell.tsdf * w + tsdf) / (w + 1.0);
    cell.weight = (w + 1.0).min(max_weight);
}
