//! Tiles, grid geometry and tile loading.

pub mod loader;
pub mod naming;


use std::fmt;

use common::Buffer2;
use glam::DVec2;

pub use loader::{DirectoryTileSource, MemoryTileSource, TileSource, load_tile, load_tiles};
pub use naming::{
    HorizontalOrder, TraversalAxis, TraversalOrder, TraversalPattern, VerticalOrder, file_index,
    grid_position, tile_file_name,
};

/// Logical (row, column) coordinate of a tile in the acquisition grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GridPos {
    pub row: usize,
    pub col: usize,
}

impl GridPos {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for GridPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Image dimensions: width, height and number of channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TileDimensions {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
}

impl fmt::Display for TileDimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.channels)
    }
}

/// Sample depth of the source images, preserved in the fused output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BitDepth {
    #[default]
    Eight,
    Sixteen,
}

impl BitDepth {
    /// Largest integer sample value.
    pub fn max_value(self) -> f32 {
        match self {
            BitDepth::Eight => u8::MAX as f32,
            BitDepth::Sixteen => u16::MAX as f32,
        }
    }
}

/// Pixels of one tile: one plane per channel, samples normalized to [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct TileImage {
    planes: Vec<Buffer2<f32>>,
    bit_depth: BitDepth,
}

impl TileImage {
    /// Panics if `planes` is empty or the planes differ in size.
    pub fn new(planes: Vec<Buffer2<f32>>, bit_depth: BitDepth) -> Self {
        assert!(!planes.is_empty(), "tile must have at least one channel");
        let (w, h) = (planes[0].width(), planes[0].height());
        assert!(
            planes.iter().all(|p| p.width() == w && p.height() == h),
            "all channel planes must have the same size"
        );
        Self { planes, bit_depth }
    }

    pub fn from_luma(plane: Buffer2<f32>, bit_depth: BitDepth) -> Self {
        Self::new(vec![plane], bit_depth)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.planes[0].width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.planes[0].height()
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.planes.len()
    }

    pub fn dimensions(&self) -> TileDimensions {
        TileDimensions {
            width: self.width(),
            height: self.height(),
            channels: self.channels(),
        }
    }

    pub fn bit_depth(&self) -> BitDepth {
        self.bit_depth
    }

    pub fn plane(&self, channel: usize) -> &Buffer2<f32> {
        &self.planes[channel]
    }

    /// Channel mean, used as the registration signal.
    pub fn luminance(&self) -> Buffer2<f32> {
        if self.planes.len() == 1 {
            return self.planes[0].clone();
        }
        let scale = 1.0 / self.planes.len() as f32;
        let mut out = Buffer2::new_default(self.width(), self.height());
        for plane in &self.planes {
            for (o, &v) in out.iter_mut().zip(plane.iter()) {
                *o += v;
            }
        }
        for o in out.iter_mut() {
            *o *= scale;
        }
        out
    }

    /// Reduce resolution by an integer `factor` with a box filter.
    ///
    /// Trailing pixels that do not fill a whole box are dropped. Returns `None`
    /// when the tile is smaller than one box.
    pub fn downsample(&self, factor: usize) -> Option<Self> {
        assert!(factor > 0, "downsample factor must be positive");
        if factor == 1 {
            return Some(self.clone());
        }
        let new_width = self.width() / factor;
        let new_height = self.height() / factor;
        if new_width == 0 || new_height == 0 {
            return None;
        }

        let norm = 1.0 / (factor * factor) as f32;
        let planes = self
            .planes
            .iter()
            .map(|plane| {
                Buffer2::from_fn(new_width, new_height, |nx, ny| {
                    let mut sum = 0.0f32;
                    for y in ny * factor..(ny + 1) * factor {
                        let row = plane.row(y);
                        sum += row[nx * factor..(nx + 1) * factor].iter().sum::<f32>();
                    }
                    sum * norm
                })
            })
            .collect();

        Some(Self {
            planes,
            bit_depth: self.bit_depth,
        })
    }

    /// Bilinear sample of `channel` at fractional pixel (`x`, `y`), clamped to the edge.
    #[inline]
    pub fn sample(&self, channel: usize, x: f64, y: f64) -> f32 {
        bilinear_clamped(&self.planes[channel], x, y)
    }
}

/// Bilinear interpolation with clamp-to-edge addressing.
pub(crate) fn bilinear_clamped(plane: &Buffer2<f32>, x: f64, y: f64) -> f32 {
    let max_x = (plane.width() - 1) as f64;
    let max_y = (plane.height() - 1) as f64;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(plane.width() - 1);
    let y1 = (y0 + 1).min(plane.height() - 1);
    let fx = (x - x0 as f64) as f32;
    let fy = (y - y0 as f64) as f32;

    let p00 = plane[(x0, y0)];
    let p10 = plane[(x1, y0)];
    let p01 = plane[(x0, y1)];
    let p11 = plane[(x1, y1)];

    let top = p00 + fx * (p10 - p00);
    let bottom = p01 + fx * (p11 - p01);
    top + fy * (bottom - top)
}

/// A loaded tile: its grid slot, acquisition index and pixels.
#[derive(Debug, Clone)]
pub struct Tile {
    pub pos: GridPos,
    pub file_index: usize,
    pub image: TileImage,
}

/// Geometry of a rectangular tile grid with uniform overlap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLayout {
    pub rows: usize,
    pub cols: usize,
    pub tile_width: usize,
    pub tile_height: usize,
    /// Fraction of a tile shared with each direct neighbor, in (0, 1).
    pub overlap: f64,
}

impl GridLayout {
    pub fn new(rows: usize, cols: usize, tile_width: usize, tile_height: usize, overlap: f64) -> Self {
        Self {
            rows,
            cols,
            tile_width,
            tile_height,
            overlap,
        }
    }

    #[inline]
    pub fn tile_count(&self) -> usize {
        self.rows * self.cols
    }

    /// Row-major arena index of `pos`.
    #[inline]
    pub fn index(&self, pos: GridPos) -> usize {
        debug_assert!(pos.row < self.rows && pos.col < self.cols);
        pos.row * self.cols + pos.col
    }

    #[inline]
    pub fn pos(&self, index: usize) -> GridPos {
        GridPos::new(index / self.cols, index % self.cols)
    }

    /// All positions in row-major order.
    pub fn positions(&self) -> impl Iterator<Item = GridPos> + '_ {
        (0..self.tile_count()).map(|i| self.pos(i))
    }

    /// Distance between neighboring tile origins.
    pub fn step(&self) -> DVec2 {
        DVec2::new(
            self.tile_width as f64 * (1.0 - self.overlap),
            self.tile_height as f64 * (1.0 - self.overlap),
        )
    }

    /// Position the stage was commanded to, relative to tile (0, 0).
    pub fn nominal_position(&self, pos: GridPos) -> DVec2 {
        let step = self.step();
        DVec2::new(pos.col as f64 * step.x, pos.row as f64 * step.y)
    }

    /// Width in pixels of the strip shared by horizontal neighbors.
    pub fn overlap_width(&self) -> usize {
        ((self.tile_width as f64 * self.overlap).round() as usize).min(self.tile_width)
    }

    /// Height in pixels of the strip shared by vertical neighbors.
    pub fn overlap_height(&self) -> usize {
        ((self.tile_height as f64 * self.overlap).round() as usize).min(self.tile_height)
    }
}
