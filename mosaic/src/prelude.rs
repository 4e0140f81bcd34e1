//! Prelude module for convenient imports.
//!
//! ```rust,ignore
//! use mosaic::prelude::*;
//! ```

// Configuration
pub use crate::{FusionMethod, MemoryMode, StitchConfig, TraversalOrder};

// Running a job
pub use crate::{ProgressCallback, StitchProgress, StitchStage, Stitcher, stitch};

// Results
pub use crate::{
    ComponentError, FusedComponent, PanoramaResult, PlacementMethod, StitchError, StitchWarning,
    TilePlacement,
};
