//! Compositing of placed tiles into one canvas per component.
//!
//! Canvas pixel `(cx, cy)` shows the scene point `origin + (cx, cy)`. A tile at
//! position `p` covers it when the tile-local coordinate `u = origin + cx - p`
//! lies in `[-0.5, width - 0.5)` (and likewise for rows); its value there is a
//! bilinear sample of the tile.
//!
//! # Linear blending
//!
//! Each covering tile is weighted by
//!
//! ```text
//! w(u, v) = min(u + 1, width - u) * min(v + 1, height - v)
//! ```
//!
//! a tent that rises linearly from the tile border. In an overlap the weights
//! cross-fade linearly from one tile to its neighbor; outside overlaps a tile's
//! own pixels are reproduced exactly.
//!
//! Rows are independent, so the canvas can be produced whole
//! ([`fuse_canvas`]) or band by band with tiles loaded on demand
//! ([`fuse_banded`]). Both give bit-identical samples.

pub mod writer;


use std::collections::BTreeMap;
use std::hash::Hasher;
use std::ops::Range;

use common::FnvHasher;
use common::parallel::ParRowsMutAuto;
use glam::DVec2;
use rayon::prelude::*;

use crate::config::FusionMethod;
use crate::error::ComponentError;
use crate::tile::{BitDepth, TileImage};

/// Largest channel count a canvas can hold: tiles are gray or RGB.
pub const MAX_CHANNELS: usize = 3;

/// Placement of a component's canvas in panorama coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasGeometry {
    /// Panorama coordinate of canvas pixel (0, 0). Integral.
    pub origin: DVec2,
    pub width: usize,
    pub height: usize,
}

impl CanvasGeometry {
    /// Smallest canvas covering every `(position, width, height)` footprint.
    pub fn covering(footprints: impl IntoIterator<Item = (DVec2, usize, usize)>) -> Option<Self> {
        let footprints: Vec<_> = footprints.into_iter().collect();
        let min = footprints
            .iter()
            .map(|&(p, _, _)| p)
            .reduce(DVec2::min)?;
        let origin = (min + 0.5).floor();

        let mut width = 1;
        let mut height = 1;
        for &(p, w, h) in &footprints {
            let end = p + DVec2::new(w as f64, h as f64) - 0.5 - origin;
            width = width.max(end.x.ceil().max(1.0) as usize);
            height = height.max(end.y.ceil().max(1.0) as usize);
        }
        Some(Self {
            origin,
            width,
            height,
        })
    }

    /// Canvas rows a tile at `y` with `tile_height` rows can cover.
    pub fn row_span(&self, y: f64, tile_height: usize) -> Range<usize> {
        let top = y - self.origin.y - 0.5;
        let start = top.ceil().max(0.0) as usize;
        let end = ((top + tile_height as f64).ceil().max(0.0) as usize).min(self.height);
        start.min(end)..end
    }
}

/// A tile image at its solved position.
#[derive(Debug, Clone, Copy)]
pub struct PlacedTile<'a> {
    /// Node index; later tiles win in [`FusionMethod::Overlay`].
    pub node: usize,
    pub position: DVec2,
    pub image: &'a TileImage,
}

/// A tile scheduled for banded fusion, before its pixels are loaded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandTile {
    pub node: usize,
    pub position: DVec2,
    pub height: usize,
}

/// A fused image held in memory, channels interleaved.
#[derive(Debug, Clone, PartialEq)]
pub struct Canvas {
    geometry: CanvasGeometry,
    channels: usize,
    bit_depth: BitDepth,
    samples: Vec<f32>,
}

impl Canvas {
    pub fn geometry(&self) -> &CanvasGeometry {
        &self.geometry
    }

    pub fn width(&self) -> usize {
        self.geometry.width
    }

    pub fn height(&self) -> usize {
        self.geometry.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn bit_depth(&self) -> BitDepth {
        self.bit_depth
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn pixel(&self, x: usize, y: usize) -> &[f32] {
        let start = (y * self.geometry.width + x) * self.channels;
        &self.samples[start..start + self.channels]
    }

    /// Rows `rows` of the canvas.
    pub fn rows(&self, rows: Range<usize>) -> &[f32] {
        let row_len = self.geometry.width * self.channels;
        &self.samples[rows.start * row_len..rows.end * row_len]
    }

    pub fn checksum(&self) -> u64 {
        let mut hasher = FnvHasher::new();
        hasher.write_f32_slice(&self.samples);
        hasher.finish()
    }
}

/// Zeroed sample buffer for `rows` canvas rows, failing softly when memory is short.
pub fn allocate_rows(
    geometry: &CanvasGeometry,
    channels: usize,
    rows: usize,
    component: usize,
) -> Result<Vec<f32>, ComponentError> {
    let too_large = || ComponentError::CanvasAllocation {
        component,
        width: geometry.width,
        height: geometry.height,
    };
    let len = geometry
        .width
        .checked_mul(channels)
        .and_then(|n| n.checked_mul(rows))
        .ok_or_else(too_large)?;
    let mut samples = Vec::new();
    samples.try_reserve_exact(len).map_err(|_| too_large())?;
    samples.resize(len, 0.0);
    Ok(samples)
}

/// Fuse all `tiles` into a canvas held in memory.
pub fn fuse_canvas(
    tiles: &[PlacedTile<'_>],
    geometry: &CanvasGeometry,
    method: FusionMethod,
    fill_value: f32,
    component: usize,
) -> Result<Canvas, ComponentError> {
    let (channels, bit_depth) = tiles
        .first()
        .map_or((1, BitDepth::Eight), |t| (t.image.channels(), t.image.bit_depth()));
    assert!(channels <= MAX_CHANNELS, "at most {MAX_CHANNELS} channels");

    let mut samples = allocate_rows(geometry, channels, geometry.height, component)?;
    fuse_rows(tiles, geometry, channels, method, fill_value, 0, &mut samples);
    Ok(Canvas {
        geometry: *geometry,
        channels,
        bit_depth,
        samples,
    })
}

/// Fuse band by band, loading tiles only while a band needs them.
///
/// `emit` receives the samples of each band, top to bottom. Returns the
/// checksum of all samples, equal to [`Canvas::checksum`] of the same canvas.
#[allow(clippy::too_many_arguments)]
pub fn fuse_banded<L, E>(
    tiles: &[BandTile],
    geometry: &CanvasGeometry,
    channels: usize,
    method: FusionMethod,
    fill_value: f32,
    band_rows: usize,
    component: usize,
    load: L,
    mut emit: E,
) -> Result<u64, ComponentError>
where
    L: Fn(&BandTile) -> Result<TileImage, ComponentError> + Sync,
    E: FnMut(&[f32]) -> Result<(), ComponentError>,
{
    assert!(band_rows > 0, "band height must be positive");
    assert!(channels <= MAX_CHANNELS, "at most {MAX_CHANNELS} channels");

    // One extra row each side so float rounding never drops a covering tile
    let spans: Vec<Range<usize>> = tiles
        .iter()
        .map(|t| {
            let span = geometry.row_span(t.position.y, t.height);
            span.start.saturating_sub(1)..(span.end + 1).min(geometry.height)
        })
        .collect();

    let mut cache: BTreeMap<usize, TileImage> = BTreeMap::new();
    let mut hasher = FnvHasher::new();
    let mut band = allocate_rows(geometry, channels, band_rows.min(geometry.height), component)?;

    let mut y0 = 0;
    while y0 < geometry.height {
        let y1 = (y0 + band_rows).min(geometry.height);

        let needed: Vec<usize> = (0..tiles.len())
            .filter(|&i| spans[i].start < y1 && spans[i].end > y0)
            .collect();
        let to_load: Vec<usize> = needed
            .iter()
            .copied()
            .filter(|i| !cache.contains_key(i))
            .collect();
        let loaded = to_load
            .par_iter()
            .map(|&i| load(&tiles[i]).map(|image| (i, image)))
            .collect::<Result<Vec<_>, _>>()?;
        cache.extend(loaded);

        let placed: Vec<PlacedTile<'_>> = needed
            .iter()
            .filter_map(|i| {
                cache.get(i).map(|image| PlacedTile {
                    node: tiles[*i].node,
                    position: tiles[*i].position,
                    image,
                })
            })
            .collect();

        let samples = &mut band[..(y1 - y0) * geometry.width * channels];
        fuse_rows(&placed, geometry, channels, method, fill_value, y0, samples);
        hasher.write_f32_slice(samples);
        emit(samples)?;

        cache.retain(|&i, _| spans[i].end > y1);
        y0 = y1;
    }

    Ok(hasher.finish())
}

/// Fill `out` with canvas rows starting at `first_row`.
///
/// `tiles` must be ordered by node index and share `channels`.
pub fn fuse_rows(
    tiles: &[PlacedTile<'_>],
    geometry: &CanvasGeometry,
    channels: usize,
    method: FusionMethod,
    fill_value: f32,
    first_row: usize,
    out: &mut [f32],
) {
    let row_len = geometry.width * channels;
    if row_len == 0 || out.is_empty() {
        return;
    }

    out.par_rows_mut_auto(row_len)
        .for_each(|(start_row, chunk)| {
            let mut covering: Vec<&PlacedTile<'_>> = Vec::with_capacity(tiles.len());
            for (i, row) in chunk.chunks_exact_mut(row_len).enumerate() {
                let y = geometry.origin.y + (first_row + start_row + i) as f64;
                covering.clear();
                covering.extend(tiles.iter().filter(|t| {
                    let v = y - t.position.y;
                    v >= -0.5 && v < t.image.height() as f64 - 0.5
                }));
                fuse_row(&covering, geometry, channels, method, fill_value, y, row);
            }
        });
}

fn fuse_row(
    covering: &[&PlacedTile<'_>],
    geometry: &CanvasGeometry,
    channels: usize,
    method: FusionMethod,
    fill_value: f32,
    y: f64,
    row: &mut [f32],
) {
    for (cx, px) in row.chunks_exact_mut(channels).enumerate() {
        let x = geometry.origin.x + cx as f64;
        let local = |t: &PlacedTile<'_>| -> Option<(f64, f64)> {
            let u = x - t.position.x;
            (u >= -0.5 && u < t.image.width() as f64 - 0.5).then_some((u, y - t.position.y))
        };

        if method == FusionMethod::Overlay {
            match covering.iter().rev().find_map(|t| local(*t).map(|uv| (t, uv))) {
                Some((t, (u, v))) => {
                    for (c, p) in px.iter_mut().enumerate() {
                        *p = t.image.sample(c, u, v);
                    }
                }
                None => px.fill(fill_value),
            }
            continue;
        }

        let mut acc = [0.0f64; MAX_CHANNELS];
        let init = match method {
            FusionMethod::MaxIntensity => f64::NEG_INFINITY,
            FusionMethod::MinIntensity => f64::INFINITY,
            _ => 0.0,
        };
        acc[..channels].fill(init);
        let mut weight_sum = 0.0f64;

        for t in covering {
            let Some((u, v)) = local(*t) else {
                continue;
            };
            let weight = match method {
                FusionMethod::LinearBlending => {
                    let (w, h) = (t.image.width() as f64, t.image.height() as f64);
                    (u + 1.0).min(w - u) * (v + 1.0).min(h - v)
                }
                _ => 1.0,
            };
            for (c, a) in acc[..channels].iter_mut().enumerate() {
                let s = t.image.sample(c, u, v) as f64;
                *a = match method {
                    FusionMethod::MaxIntensity => a.max(s),
                    FusionMethod::MinIntensity => a.min(s),
                    _ => *a + weight * s,
                };
            }
            weight_sum += weight;
        }

        if weight_sum == 0.0 {
            px.fill(fill_value);
            continue;
        }
        let norm = match method {
            FusionMethod::LinearBlending | FusionMethod::Average => weight_sum,
            _ => 1.0,
        };
        for (p, a) in px.iter_mut().zip(&acc) {
            *p = (a / norm) as f32;
        }
    }
}
