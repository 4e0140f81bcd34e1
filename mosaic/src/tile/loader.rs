//! Tile sources: where tile pixels come from.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use common::Buffer2;
use image::{ColorType, DynamicImage};
use rayon::prelude::*;

use super::naming::tile_file_name;
use super::{BitDepth, GridPos, TileDimensions, TileImage};
use crate::error::TileLoadError;

/// Supplier of tile pixels by grid position and file index.
///
/// Implementations must be callable from several worker threads at once.
/// A tile may be requested more than once (memory-saving fusion reloads).
pub trait TileSource: Send + Sync {
    fn load(&self, pos: GridPos, file_index: usize) -> Result<TileImage, TileLoadError>;
}

/// Tiles stored as `<prefix><index>.<extension>` in one directory.
#[derive(Debug, Clone)]
pub struct DirectoryTileSource {
    directory: PathBuf,
    prefix: String,
    extension: String,
}

impl DirectoryTileSource {
    pub fn new(directory: impl Into<PathBuf>, prefix: &str, extension: &str) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.to_string(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn path_for(&self, file_index: usize) -> PathBuf {
        self.directory
            .join(tile_file_name(&self.prefix, file_index, &self.extension))
    }
}

impl TileSource for DirectoryTileSource {
    fn load(&self, pos: GridPos, file_index: usize) -> Result<TileImage, TileLoadError> {
        let path = self.path_for(file_index);
        if !path.is_file() {
            return Err(TileLoadError::Missing {
                row: pos.row,
                col: pos.col,
                path,
            });
        }

        let img = image::open(&path).map_err(|source| match source {
            image::ImageError::IoError(ref e) if e.kind() == std::io::ErrorKind::NotFound => {
                TileLoadError::Missing {
                    row: pos.row,
                    col: pos.col,
                    path: path.clone(),
                }
            }
            source => TileLoadError::Decode {
                path: path.clone(),
                source,
            },
        })?;

        tile_from_dynamic(img, &path)
    }
}

/// Convert a decoded image to planar normalized samples.
///
/// Alpha is dropped. Float images are rejected because the output keeps the
/// integer depth of the input.
fn tile_from_dynamic(img: DynamicImage, path: &Path) -> Result<TileImage, TileLoadError> {
    let (width, height) = (img.width() as usize, img.height() as usize);
    let color = img.color();

    let (channels, bit_depth) = match color {
        ColorType::L8 | ColorType::La8 => (1, BitDepth::Eight),
        ColorType::Rgb8 | ColorType::Rgba8 => (3, BitDepth::Eight),
        ColorType::L16 | ColorType::La16 => (1, BitDepth::Sixteen),
        ColorType::Rgb16 | ColorType::Rgba16 => (3, BitDepth::Sixteen),
        other => {
            return Err(TileLoadError::UnsupportedLayout {
                path: path.to_path_buf(),
                layout: format!("{other:?}"),
            });
        }
    };

    let samples: Vec<f32> = match (channels, bit_depth) {
        (1, BitDepth::Eight) => normalize(img.into_luma8().into_raw(), u8::MAX),
        (3, BitDepth::Eight) => normalize(img.into_rgb8().into_raw(), u8::MAX),
        (1, BitDepth::Sixteen) => normalize(img.into_luma16().into_raw(), u16::MAX),
        _ => normalize(img.into_rgb16().into_raw(), u16::MAX),
    };

    let planes = (0..channels)
        .map(|c| {
            let plane: Vec<f32> = samples.iter().skip(c).step_by(channels).copied().collect();
            Buffer2::new(width, height, plane)
        })
        .collect();

    Ok(TileImage::new(planes, bit_depth))
}

fn normalize<T: Copy + Into<f32>>(raw: Vec<T>, max: T) -> Vec<f32> {
    let max: f32 = max.into();
    let scale = 1.0 / max;
    raw.into_iter().map(|v| Into::<f32>::into(v) * scale).collect()
}

/// Tiles held in memory, keyed by file index.
#[derive(Debug, Clone, Default)]
pub struct MemoryTileSource {
    tiles: BTreeMap<usize, TileImage>,
}

impl MemoryTileSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, file_index: usize, image: TileImage) {
        self.tiles.insert(file_index, image);
    }

    pub fn remove(&mut self, file_index: usize) -> Option<TileImage> {
        self.tiles.remove(&file_index)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

impl TileSource for MemoryTileSource {
    fn load(&self, pos: GridPos, file_index: usize) -> Result<TileImage, TileLoadError> {
        self.tiles
            .get(&file_index)
            .cloned()
            .ok_or_else(|| TileLoadError::Missing {
                row: pos.row,
                col: pos.col,
                path: PathBuf::from(format!("memory:{file_index}")),
            })
    }
}

/// Load one tile, decimate it and check it against `expected` dimensions.
pub fn load_tile(
    source: &dyn TileSource,
    pos: GridPos,
    file_index: usize,
    downsample: usize,
    expected: Option<TileDimensions>,
) -> Result<TileImage, TileLoadError> {
    let mut image = source.load(pos, file_index)?;
    if downsample > 1 {
        image = image
            .downsample(downsample)
            .ok_or_else(|| TileLoadError::UnsupportedLayout {
                path: PathBuf::from(format!("tile {file_index}")),
                layout: format!(
                    "{} smaller than downsample factor {downsample}",
                    image.dimensions()
                ),
            })?;
    }

    if let Some(expected) = expected {
        let actual = image.dimensions();
        if actual != expected {
            return Err(TileLoadError::DimensionMismatch {
                path: PathBuf::from(format!("tile {file_index}")),
                expected,
                actual,
            });
        }
    }
    Ok(image)
}

/// Load many tiles in parallel. Results keep the order of `requests`.
///
/// Each decoded tile is handed to `keep` straight away and only its return
/// value is held, so a caller that needs part of a tile never has every full
/// tile in memory at once.
pub fn load_tiles<T: Send>(
    source: &dyn TileSource,
    requests: &[(GridPos, usize)],
    downsample: usize,
    expected: Option<TileDimensions>,
    keep: &(dyn Fn(TileImage) -> T + Sync),
    on_loaded: &(dyn Fn() + Sync),
) -> Vec<Result<T, TileLoadError>> {
    requests
        .par_iter()
        .map(|&(pos, file_index)| {
            let result = load_tile(source, pos, file_index, downsample, expected).map(keep);
            on_loaded();
            result
        })
        .collect()
}
