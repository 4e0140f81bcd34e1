//! Outcome of one stitched panorama.

use std::path::PathBuf;

use glam::DVec2;

use crate::error::{ComponentError, StitchWarning};
use crate::solver::{PlacementMethod, TilePlacement};

/// A component that was fused and written.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedComponent {
    pub path: PathBuf,
    /// Panorama coordinate of the image's top-left pixel.
    pub origin: DVec2,
    pub width: usize,
    pub height: usize,
    /// FNV-1a over the fused samples, before quantization.
    pub checksum: u64,
}

/// Result of fusing one connected component.
#[derive(Debug)]
pub struct ComponentOutcome {
    pub index: usize,
    /// Node indices of the component's tiles, ascending.
    pub tiles: Vec<usize>,
    pub result: Result<FusedComponent, ComponentError>,
}

impl ComponentOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Everything one panorama run produced.
#[derive(Debug)]
pub struct PanoramaResult {
    /// Position in the acquisition sequence, starting at 0.
    pub panorama: usize,
    pub output_dir: PathBuf,
    /// One entry per grid position, row-major.
    pub placements: Vec<TilePlacement>,
    pub components: Vec<ComponentOutcome>,
    pub warnings: Vec<StitchWarning>,
    pub placement_table: PathBuf,
    pub params_log: PathBuf,
}

impl PanoramaResult {
    pub fn count(&self, method: PlacementMethod) -> usize {
        self.placements.iter().filter(|p| p.method == method).count()
    }

    pub fn fused(&self) -> impl Iterator<Item = &FusedComponent> {
        self.components.iter().filter_map(|c| c.result.as_ref().ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = (usize, &ComponentError)> {
        self.components
            .iter()
            .filter_map(|c| c.result.as_ref().err().map(|e| (c.index, e)))
    }

    /// True when at least one component exists and none was written.
    pub fn all_failed(&self) -> bool {
        !self.components.is_empty() && self.components.iter().all(|c| !c.is_ok())
    }
}
