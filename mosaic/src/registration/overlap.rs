//! Overlap strips shared by adjacent tiles.
//!
//! For a right neighbor the strip is the last `ow` columns of the left tile and
//! the first `ow` columns of the right tile, full height. Down neighbors use
//! rows the same way. Registration only ever sees these strips, so a tile's
//! full pixels can be released once its four strips are cut.

use std::fmt;

use common::Buffer2;
use glam::DVec2;

use crate::tile::GridLayout;

/// Adjacency of an edge, from the upstream tile's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Right,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Right => write!(f, "right"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// Strip sizes and the nominal strip misalignment for one grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlapGeometry {
    pub tile_width: usize,
    pub tile_height: usize,
    pub overlap_width: usize,
    pub overlap_height: usize,
    /// Nominal step between tile origins.
    pub step: DVec2,
}

impl OverlapGeometry {
    pub fn from_layout(layout: &GridLayout) -> Self {
        Self {
            tile_width: layout.tile_width,
            tile_height: layout.tile_height,
            overlap_width: layout.overlap_width(),
            overlap_height: layout.overlap_height(),
            step: layout.step(),
        }
    }

    /// (width, height) of the strips registered for `direction`.
    pub fn strip_size(&self, direction: Direction) -> (usize, usize) {
        match direction {
            Direction::Right => (self.overlap_width, self.tile_height),
            Direction::Down => (self.tile_width, self.overlap_height),
        }
    }

    /// Strip translation expected when the edge displacement is zero.
    ///
    /// Non-zero only when the strip size was rounded away from the nominal
    /// step. A measured strip translation `t` maps to the displacement
    /// `nominal_strip_shift - t`.
    pub fn nominal_strip_shift(&self, direction: Direction) -> DVec2 {
        match direction {
            Direction::Right => DVec2::new(
                (self.tile_width - self.overlap_width) as f64 - self.step.x,
                0.0,
            ),
            Direction::Down => DVec2::new(
                0.0,
                (self.tile_height - self.overlap_height) as f64 - self.step.y,
            ),
        }
    }

    /// Edge displacement implied by a strip translation.
    pub fn displacement_from_translation(&self, direction: Direction, translation: DVec2) -> DVec2 {
        self.nominal_strip_shift(direction) - translation
    }
}

/// The four border strips of one tile's luminance.
#[derive(Debug, Clone)]
pub struct TileStrips {
    pub left: Buffer2<f32>,
    pub right: Buffer2<f32>,
    pub top: Buffer2<f32>,
    pub bottom: Buffer2<f32>,
}

impl TileStrips {
    pub fn extract(luminance: &Buffer2<f32>, geometry: &OverlapGeometry) -> Self {
        let (w, h) = (luminance.width(), luminance.height());
        let ow = geometry.overlap_width.min(w);
        let oh = geometry.overlap_height.min(h);
        Self {
            left: luminance.crop(0, 0, ow, h),
            right: luminance.crop(w - ow, 0, ow, h),
            top: luminance.crop(0, 0, w, oh),
            bottom: luminance.crop(0, h - oh, w, oh),
        }
    }

    /// Strip of this tile facing a neighbor in `direction`.
    pub fn outgoing(&self, direction: Direction) -> &Buffer2<f32> {
        match direction {
            Direction::Right => &self.right,
            Direction::Down => &self.bottom,
        }
    }

    /// Strip of this tile facing a neighbor that lies against `direction`.
    pub fn incoming(&self, direction: Direction) -> &Buffer2<f32> {
        match direction {
            Direction::Right => &self.left,
            Direction::Down => &self.top,
        }
    }
}
