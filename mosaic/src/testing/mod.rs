//! Synthetic tile grids for tests.
//!
//! Tiles are sampled from an analytic scene (a sum of Gaussian blobs) at
//! known sub-pixel positions, so the exact answer of every registration is
//! known without resampling artifacts from a reference raster.

use common::Buffer2;
use glam::DVec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::StitchConfig;
use crate::tile::{
    BitDepth, GridLayout, GridPos, MemoryTileSource, TileImage, TraversalOrder, file_index,
};

#[derive(Debug, Clone, Copy)]
pub struct Blob {
    pub center: DVec2,
    pub sigma: f64,
    pub amplitude: f64,
}

/// Smooth, textured scene defined everywhere in the plane.
#[derive(Debug, Clone)]
pub struct SyntheticScene {
    pub blobs: Vec<Blob>,
    pub background: f64,
}

impl SyntheticScene {
    /// Random blobs covering `min..max` with roughly one blob per `area_per_blob` px².
    pub fn random(seed: u64, min: DVec2, max: DVec2, area_per_blob: f64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let size = max - min;
        let count = ((size.x * size.y) / area_per_blob).ceil() as usize;
        let blobs = (0..count)
            .map(|_| Blob {
                center: DVec2::new(
                    rng.random_range(min.x..max.x),
                    rng.random_range(min.y..max.y),
                ),
                sigma: rng.random_range(2.5..5.0),
                amplitude: rng.random_range(0.15..0.35),
            })
            .collect();
        Self {
            blobs,
            background: 0.1,
        }
    }

    pub fn value(&self, p: DVec2) -> f64 {
        let mut v = self.background;
        for blob in &self.blobs {
            let d = p - blob.center;
            let reach = 4.0 * blob.sigma;
            if d.x.abs() > reach || d.y.abs() > reach {
                continue;
            }
            v += blob.amplitude * (-d.length_squared() / (2.0 * blob.sigma * blob.sigma)).exp();
        }
        v.clamp(0.0, 1.0)
    }

    /// Tile whose pixel (x, y) shows scene point `origin + (x, y)`.
    pub fn render(&self, origin: DVec2, width: usize, height: usize) -> Buffer2<f32> {
        Buffer2::from_fn(width, height, |x, y| {
            self.value(origin + DVec2::new(x as f64, y as f64)) as f32
        })
    }
}

/// A grid of synthetic tiles with known true positions.
pub struct SyntheticGrid {
    pub layout: GridLayout,
    /// True position of every tile, row-major.
    pub true_positions: Vec<DVec2>,
    pub source: MemoryTileSource,
}

impl SyntheticGrid {
    /// Tiles at nominal positions plus a random offset in `[-max_offset, max_offset]`
    /// per axis. Tile (0, 0) is never offset.
    pub fn new(
        rows: usize,
        cols: usize,
        tile_size: usize,
        overlap: f64,
        max_offset: f64,
        seed: u64,
    ) -> Self {
        let layout = GridLayout::new(rows, cols, tile_size, tile_size, overlap);
        let mut rng = StdRng::seed_from_u64(seed ^ 0x5eed);

        let true_positions: Vec<DVec2> = layout
            .positions()
            .map(|pos| {
                let nominal = layout.nominal_position(pos);
                if pos == GridPos::new(0, 0) || max_offset == 0.0 {
                    nominal
                } else {
                    nominal
                        + DVec2::new(
                            rng.random_range(-max_offset..=max_offset),
                            rng.random_range(-max_offset..=max_offset),
                        )
                }
            })
            .collect();

        let margin = DVec2::splat(16.0);
        let extent = layout.nominal_position(GridPos::new(rows - 1, cols - 1))
            + DVec2::new(tile_size as f64, tile_size as f64);
        let scene = SyntheticScene::random(seed, -margin, extent + margin, 120.0);

        let order = TraversalOrder::default();
        let mut source = MemoryTileSource::new();
        for (i, pos) in layout.positions().enumerate() {
            let plane = scene.render(true_positions[i], tile_size, tile_size);
            source.insert(
                file_index(&order, rows, cols, pos),
                TileImage::from_luma(plane, BitDepth::Sixteen),
            );
        }

        Self {
            layout,
            true_positions,
            source,
        }
    }

    /// Configuration matching this grid; outputs go to `output_dir`.
    pub fn config(&self, output_dir: &std::path::Path) -> StitchConfig {
        StitchConfig::grid(self.layout.cols, self.layout.rows, self.layout.overlap)
            .with_output_dir(output_dir)
    }
}

/// Grid of identical single-valued tiles at nominal positions.
pub fn uniform_grid(
    rows: usize,
    cols: usize,
    width: usize,
    height: usize,
    value: f32,
) -> MemoryTileSource {
    let order = TraversalOrder::default();
    let mut source = MemoryTileSource::new();
    for row in 0..rows {
        for col in 0..cols {
            let index = file_index(&order, rows, cols, GridPos::new(row, col));
            source.insert(
                index,
                TileImage::from_luma(Buffer2::new_filled(width, height, value), BitDepth::Eight),
            );
        }
    }
    source
}

/// Luma tile with a single value.
pub fn flat_tile(width: usize, height: usize, value: f32) -> TileImage {
    TileImage::from_luma(Buffer2::new_filled(width, height, value), BitDepth::Eight)
}
