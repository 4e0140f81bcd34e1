//! Stitching configuration.
//!
//! A single `StitchConfig` carries every option of a job, grouped by stage.
//! All groups deserialize with defaults for missing fields so a YAML file only
//! needs to name what differs from the reference acquisition setup.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::error::StitchError;
use crate::tile::TraversalOrder;

/// Tile grid geometry and acquisition path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Number of tile columns.
    pub grid_size_x: usize,
    /// Number of tile rows.
    pub grid_size_y: usize,
    /// Expected overlap fraction between adjacent tiles, in (0, 1).
    pub tile_overlap: f64,
    pub traversal: TraversalOrder,
    /// Z/focus offsets are never corrected; only `true` is accepted.
    pub ignore_z_stage: bool,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            grid_size_x: 3,
            grid_size_y: 3,
            tile_overlap: 0.2,
            traversal: TraversalOrder::default(),
            ignore_z_stage: true,
        }
    }
}

/// Where tile images come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileSourceConfig {
    pub directory: PathBuf,
    /// File name prefix, as in `<prefix><index>.<extension>`.
    pub prefix: String,
    pub extension: String,
    /// File index of the first tile of the first panorama.
    pub first_file_index: usize,
    /// Integer decimation factor applied to every tile on load. 1 = full resolution.
    pub downsample: usize,
    /// Number of consecutive panoramas stored in one tile sequence.
    pub panorama_count: usize,
}

impl Default for TileSourceConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("tiles"),
            prefix: "tile".to_string(),
            extension: "png".to_string(),
            first_file_index: 0,
            downsample: 1,
            panorama_count: 1,
        }
    }
}

/// Sub-pixel interpolation of the phase correlation peak.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubpixelMethod {
    /// Integer peak only.
    None,
    /// Parabola through the peak and its two neighbors, per axis.
    #[default]
    Parabolic,
    /// Parabola through the log of the peak neighborhood.
    Gaussian,
}

/// Pairwise registration tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Number of correlation peaks verified by cross-correlation.
    pub check_peaks: usize,
    pub subpixel_method: SubpixelMethod,
    /// Gauss-Newton refinement iterations after peak fitting. 0 disables.
    pub refine_iterations: usize,
    /// Apply a Hann window before the FFT.
    pub use_windowing: bool,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            check_peaks: 5,
            subpixel_method: SubpixelMethod::Parabolic,
            refine_iterations: 20,
            use_windowing: true,
        }
    }
}

/// Outlier rejection bounds of the global position solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Minimum confidence for an edge to take part in the solve.
    pub regression_threshold: f64,
    /// Mean correction (px) above which a whole component is considered failed.
    pub max_avg_displacement_threshold: f64,
    /// Largest correction (px) a tile may receive, and largest edge residual kept.
    pub absolute_displacement_threshold: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            regression_threshold: 0.30,
            max_avg_displacement_threshold: 4.0,
            absolute_displacement_threshold: 3.0,
        }
    }
}

/// How overlapping tiles are combined into the canvas.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FusionMethod {
    /// Weights fall off linearly toward each tile border.
    #[default]
    LinearBlending,
    /// Unweighted mean of covering tiles.
    Average,
    MaxIntensity,
    MinIntensity,
    /// Highest tile index wins.
    Overlay,
}

/// Trade-off between speed and peak memory during fusion.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MemoryMode {
    /// Keep all tiles and the whole canvas in memory.
    #[default]
    Fast,
    /// Fuse in row bands, reloading only the tiles each band needs.
    SaveMemory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub fusion_method: FusionMethod,
    pub memory_mode: MemoryMode,
    /// Canvas rows per band in [`MemoryMode::SaveMemory`].
    pub band_rows: usize,
    /// Value in [0, 1] for canvas pixels no tile covers.
    pub fill_value: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            fusion_method: FusionMethod::LinearBlending,
            memory_mode: MemoryMode::Fast,
            band_rows: 256,
            fill_value: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub output_dir: PathBuf,
    /// Base name of every output file.
    pub output_name: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            output_name: "panorama".to_string(),
        }
    }
}

/// Complete configuration of a stitching job.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StitchConfig {
    pub grid: GridConfig,
    pub source: TileSourceConfig,
    pub registration: RegistrationConfig,
    pub solver: SolverConfig,
    pub fusion: FusionConfig,
    pub output: OutputConfig,
}

impl StitchConfig {
    /// Grid of `cols` x `rows` tiles with the given overlap, other options default.
    pub fn grid(cols: usize, rows: usize, overlap: f64) -> Self {
        let mut config = Self::default();
        config.grid.grid_size_x = cols;
        config.grid.grid_size_y = rows;
        config.grid.tile_overlap = overlap;
        config
    }

    /// Preset for very large acquisitions: banded fusion and half-resolution tiles.
    pub fn low_memory(cols: usize, rows: usize, overlap: f64) -> Self {
        let mut config = Self::grid(cols, rows, overlap);
        config.fusion.memory_mode = MemoryMode::SaveMemory;
        config.source.downsample = 2;
        config
    }

    pub fn with_source_dir(mut self, directory: impl Into<PathBuf>) -> Self {
        self.source.directory = directory.into();
        self
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output.output_dir = output_dir.into();
        self
    }

    pub fn with_fusion_method(mut self, method: FusionMethod) -> Self {
        self.fusion.fusion_method = method;
        self
    }

    pub fn with_memory_mode(mut self, mode: MemoryMode) -> Self {
        self.fusion.memory_mode = mode;
        self
    }

    /// Number of tiles in one panorama.
    pub fn tiles_per_panorama(&self) -> usize {
        self.grid.grid_size_x * self.grid.grid_size_y
    }

    pub fn from_yaml(text: &str) -> Result<Self, StitchError> {
        let config: Self = serde_yml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, StitchError> {
        Ok(serde_yml::to_string(self)?)
    }

    /// Check every option. Returns the first problem found.
    pub fn validate(&self) -> Result<(), StitchError> {
        let fail = |msg: String| Err(StitchError::InvalidConfig(msg));
        let grid = &self.grid;

        if grid.grid_size_x == 0 || grid.grid_size_y == 0 {
            return fail(format!(
                "grid must be at least 1x1, got {}x{}",
                grid.grid_size_x, grid.grid_size_y
            ));
        }
        if !(grid.tile_overlap > 0.0 && grid.tile_overlap < 1.0) {
            return fail(format!(
                "tile_overlap must be in (0, 1), got {}",
                grid.tile_overlap
            ));
        }
        if !grid.ignore_z_stage {
            return fail("z-stage correction is not supported; set ignore_z_stage".to_string());
        }

        if self.source.downsample == 0 {
            return fail("downsample must be at least 1".to_string());
        }
        if self.source.panorama_count == 0 {
            return fail("panorama_count must be at least 1".to_string());
        }
        if self.source.extension.trim_start_matches('.').is_empty() {
            return fail("tile extension must not be empty".to_string());
        }

        if self.registration.check_peaks == 0 {
            return fail("check_peaks must be at least 1".to_string());
        }

        let solver = &self.solver;
        if !(0.0..=1.0).contains(&solver.regression_threshold) {
            return fail(format!(
                "regression_threshold must be in [0, 1], got {}",
                solver.regression_threshold
            ));
        }
        if !(solver.max_avg_displacement_threshold > 0.0) {
            return fail("max_avg_displacement_threshold must be positive".to_string());
        }
        if !(solver.absolute_displacement_threshold > 0.0) {
            return fail("absolute_displacement_threshold must be positive".to_string());
        }

        if self.fusion.band_rows == 0 {
            return fail("band_rows must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.fusion.fill_value) {
            return fail(format!(
                "fill_value must be in [0, 1], got {}",
                self.fusion.fill_value
            ));
        }

        if self.output.output_name.is_empty() {
            return fail("output_name must not be empty".to_string());
        }
        Ok(())
    }
}
