//! Mosaic - grid panorama stitching for overlapping microscope tiles.
//!
//! Tiles acquired on a regular grid are registered pairwise by phase
//! correlation of their overlap strips, placed by a global least-squares solve
//! that rejects unreliable registrations, and blended into one image per
//! connected group of tiles.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use mosaic::{StitchConfig, Stitcher};
//!
//! let config = StitchConfig::grid(4, 3, 0.2)
//!     .with_source_dir("acquisition/tiles")
//!     .with_output_dir("acquisition/stitched");
//!
//! for panorama in Stitcher::new(config)?.run()? {
//!     println!("{} components, {} warnings", panorama.components.len(), panorama.warnings.len());
//! }
//! ```

pub mod config;
pub mod error;
pub mod fusion;
pub mod graph;
pub mod grouping;
pub mod pipeline;
pub mod progress;
pub mod registration;
pub mod solver;
pub mod tile;

#[cfg(test)]
pub mod testing;

pub mod prelude;

// ============================================================================
// Configuration
// ============================================================================

pub use config::{
    FusionConfig, FusionMethod, GridConfig, MemoryMode, OutputConfig, RegistrationConfig,
    SolverConfig, StitchConfig, SubpixelMethod, TileSourceConfig,
};

// ============================================================================
// Errors
// ============================================================================

pub use error::{ComponentError, StitchError, StitchWarning, TileLoadError};

// ============================================================================
// Tiles
// ============================================================================

pub use tile::{
    BitDepth, DirectoryTileSource, GridLayout, GridPos, MemoryTileSource, TileDimensions,
    TileImage, TileSource, TraversalOrder, file_index, grid_position,
};

// ============================================================================
// Registration and placement
// ============================================================================

pub use graph::{Edge, OverlapGraph, TileNode};
pub use grouping::Component;
pub use registration::{Direction, PairRegistrar, PairRegistration};
pub use solver::{PlacementMethod, Solution, TilePlacement};

// ============================================================================
// Pipeline
// ============================================================================

pub use pipeline::{
    ComponentOutcome, FusedComponent, PanoramaResult, PlacementTable, Stitcher, stitch,
};
pub use progress::{ProgressCallback, StitchProgress, StitchStage};
