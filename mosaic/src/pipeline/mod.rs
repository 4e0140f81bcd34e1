//! End-to-end stitching job.
//!
//! A [`Stitcher`] runs every panorama of a tile sequence through the same
//! stages:
//!
//! 1. **Loading** - read (and decimate) every tile; failures become missing nodes
//! 2. **Registering** - phase-correlate each adjacent pair of present tiles
//! 3. **Solving** - reject unreliable edges and solve absolute positions
//! 4. **Fusing** - blend each connected component into its own image
//! 5. **Writing** - placement table and parameter log
//!
//! Tile- and edge-level problems are collected as warnings in the
//! [`PanoramaResult`]. A failing component does not stop its siblings.
//! Cancellation is checked between stages and before each component write;
//! every file is written through a temporary sibling and renamed into place.

pub mod placement;
pub mod result;


use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use common::CancelToken;
use common::file_utils::write_atomic;
use rayon::prelude::*;

use crate::config::{MemoryMode, StitchConfig};
use crate::error::{ComponentError, StitchError, StitchWarning, TileLoadError};
use crate::fusion::writer::{PngLayout, write_png};
use crate::fusion::{BandTile, CanvasGeometry, PlacedTile, fuse_banded, fuse_canvas};
use crate::graph::{OverlapGraph, grid_nodes};
use crate::grouping::{Component, connected_components};
use crate::progress::{ProgressCallback, StitchStage, report_progress};
use crate::registration::{OverlapGeometry, PairRegistrar, PairRegistration, TileStrips};
use crate::solver::{TilePlacement, solve};
use crate::tile::{
    BitDepth, DirectoryTileSource, GridLayout, GridPos, TileDimensions, TileImage, TileSource,
    file_index, load_tile, load_tiles,
};

pub use placement::{PlacementRow, PlacementTable};
pub use result::{ComponentOutcome, FusedComponent, PanoramaResult};

/// What is held of one tile after loading.
struct LoadedTile {
    strips: TileStrips,
    /// Only kept in [`MemoryMode::Fast`].
    image: Option<TileImage>,
}

/// Tiles of one panorama after loading.
struct LoadedTiles {
    /// Absolute file index per grid position, row-major.
    file_indices: Vec<usize>,
    layout: GridLayout,
    geometry: OverlapGeometry,
    /// Always `None` in [`MemoryMode::SaveMemory`].
    images: Vec<Option<TileImage>>,
    /// `None` for tiles that could not be loaded.
    strips: Vec<Option<TileStrips>>,
    dims: TileDimensions,
    bit_depth: BitDepth,
    warnings: Vec<StitchWarning>,
}

/// Per-panorama constants shared by all component tasks.
struct FuseContext<'a> {
    placements: &'a [TilePlacement],
    images: &'a [Option<TileImage>],
    dims: TileDimensions,
    bit_depth: BitDepth,
    output_dir: &'a Path,
}

/// A configured stitching job.
pub struct Stitcher {
    config: StitchConfig,
    source: Arc<dyn TileSource>,
    progress: ProgressCallback,
    cancel: CancelToken,
}

impl Stitcher {
    /// Job reading tiles from `config.source.directory`.
    pub fn new(config: StitchConfig) -> Result<Self, StitchError> {
        config.validate()?;
        let source = DirectoryTileSource::new(
            &config.source.directory,
            &config.source.prefix,
            &config.source.extension,
        );
        Ok(Self {
            config,
            source: Arc::new(source),
            progress: ProgressCallback::default(),
            cancel: CancelToken::new(),
        })
    }

    /// Read tiles from `source` instead of the configured directory.
    pub fn with_source(mut self, source: Arc<dyn TileSource>) -> Self {
        self.source = source;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &StitchConfig {
        &self.config
    }

    /// Token that cancels this job from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Directory receiving the outputs of `panorama`.
    pub fn output_dir(&self, panorama: usize) -> PathBuf {
        let base = &self.config.output.output_dir;
        if self.config.source.panorama_count > 1 {
            base.join(format!("pano{panorama}"))
        } else {
            base.clone()
        }
    }

    /// File index of the first tile of `panorama`.
    pub fn first_file_index(&self, panorama: usize) -> usize {
        self.config.source.first_file_index + panorama * self.config.tiles_per_panorama()
    }

    /// Stitch every panorama of the sequence, in order.
    pub fn run(&self) -> Result<Vec<PanoramaResult>, StitchError> {
        let count = self.config.source.panorama_count;
        let mut results = Vec::with_capacity(count);
        for panorama in 0..count {
            self.check_cancelled()?;
            results.push(self.run_panorama(panorama)?);
        }
        Ok(results)
    }

    /// Stitch one panorama of the sequence.
    pub fn run_panorama(&self, panorama: usize) -> Result<PanoramaResult, StitchError> {
        let count = self.config.source.panorama_count;
        if panorama >= count {
            return Err(StitchError::InvalidConfig(format!(
                "panorama {panorama} out of range, sequence has {count}"
            )));
        }

        let grid = &self.config.grid;
        let output_dir = self.output_dir(panorama);
        tracing::info!(
            panorama,
            grid = %format!("{}x{}", grid.grid_size_x, grid.grid_size_y),
            overlap = grid.tile_overlap,
            first_file_index = self.first_file_index(panorama),
            fusion = %self.config.fusion.fusion_method,
            memory_mode = %self.config.fusion.memory_mode,
            output_dir = %output_dir.display(),
            "Starting panorama"
        );
        let start = Instant::now();

        self.check_cancelled()?;
        let mut loaded = self.load(panorama)?;
        let mut warnings = std::mem::take(&mut loaded.warnings);

        self.check_cancelled()?;
        let mut graph = self.register(&loaded);

        self.check_cancelled()?;
        report_progress(&self.progress, 0, 1, StitchStage::Solving);
        let solution = solve(&mut graph, &self.config.solver);
        let components = connected_components(&graph);
        report_progress(&self.progress, 1, 1, StitchStage::Solving);
        warnings.extend(solution.warnings);
        tracing::info!(components = components.len(), "Grouped tiles");

        self.check_cancelled()?;
        let context = FuseContext {
            placements: &solution.placements,
            images: &loaded.images,
            dims: loaded.dims,
            bit_depth: loaded.bit_depth,
            output_dir: &output_dir,
        };
        let outcomes = self.fuse(&components, &context);
        self.check_cancelled()?;

        report_progress(&self.progress, 0, 2, StitchStage::Writing);
        let name = &self.config.output.output_name;
        let table = PlacementTable::new(&solution.placements, &components);
        let placement_table = table.write(&output_dir.join(format!("{name}_placements.csv")))?;
        report_progress(&self.progress, 1, 2, StitchStage::Writing);
        let params_log = self.write_params(&output_dir.join(format!("{name}_params.yaml")))?;
        report_progress(&self.progress, 2, 2, StitchStage::Writing);

        let result = PanoramaResult {
            panorama,
            output_dir,
            placements: solution.placements,
            components: outcomes,
            warnings,
            placement_table,
            params_log,
        };
        tracing::info!(
            panorama,
            components = result.components.len(),
            fused = result.fused().count(),
            failed = result.failed().count(),
            warnings = result.warnings.len(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Finished panorama"
        );
        Ok(result)
    }

    fn check_cancelled(&self) -> Result<(), StitchError> {
        if self.cancel.is_cancelled() {
            tracing::info!("Stitching cancelled");
            return Err(StitchError::Cancelled);
        }
        Ok(())
    }

    fn load(&self, panorama: usize) -> Result<LoadedTiles, StitchError> {
        let grid = &self.config.grid;
        let (rows, cols) = (grid.grid_size_y, grid.grid_size_x);
        let first = self.first_file_index(panorama);
        let requests: Vec<(GridPos, usize)> = (0..rows * cols)
            .map(|i| {
                let pos = GridPos::new(i / cols, i % cols);
                (pos, first + file_index(&grid.traversal, rows, cols, pos))
            })
            .collect();
        let downsample = self.config.source.downsample;

        let start = Instant::now();
        let total = requests.len();
        let done = AtomicUsize::new(0);
        let on_loaded = || {
            let current = done.fetch_add(1, Ordering::Relaxed) + 1;
            report_progress(&self.progress, current, total, StitchStage::Loading);
        };
        report_progress(&self.progress, 0, total, StitchStage::Loading);

        // The first tile that loads fixes the size every other tile must have
        let mut results: Vec<Result<LoadedTile, TileLoadError>> = Vec::with_capacity(total);
        let mut first_tile = None;
        for &(pos, file_index) in &requests {
            let result = load_tile(self.source.as_ref(), pos, file_index, downsample, None);
            on_loaded();
            match result {
                Ok(image) => {
                    first_tile = Some(image);
                    break;
                }
                Err(err) => results.push(Err(err)),
            }
        }
        let Some(first_tile) = first_tile else {
            for ((pos, _), result) in requests.iter().zip(&results) {
                if let Err(err) = result {
                    tracing::warn!(tile = %pos, "{err}");
                }
            }
            return Err(StitchError::NoTiles);
        };
        let dims = first_tile.dimensions();
        let bit_depth = first_tile.bit_depth();

        let layout = GridLayout::new(rows, cols, dims.width, dims.height, grid.tile_overlap);
        let geometry = OverlapGeometry::from_layout(&layout);
        // Banded fusion reloads tiles, so only the strips are kept
        let keep_images = self.config.fusion.memory_mode == MemoryMode::Fast;
        let reduce = |image: TileImage| LoadedTile {
            strips: TileStrips::extract(&image.luminance(), &geometry),
            image: keep_images.then_some(image),
        };

        results.push(Ok(reduce(first_tile)));
        let rest = &requests[results.len()..];
        results.extend(load_tiles(
            self.source.as_ref(),
            rest,
            downsample,
            Some(dims),
            &reduce,
            &on_loaded,
        ));

        let mut warnings = Vec::new();
        let mut images = Vec::with_capacity(total);
        let mut strips = Vec::with_capacity(total);
        for (&(pos, _), result) in requests.iter().zip(results) {
            match result {
                Ok(tile) => {
                    images.push(tile.image);
                    strips.push(Some(tile.strips));
                }
                Err(err) => {
                    let warning = StitchWarning::MissingTile {
                        tile: pos,
                        reason: err.to_string(),
                    };
                    tracing::warn!("{warning}");
                    warnings.push(warning);
                    images.push(None);
                    strips.push(None);
                }
            }
        }

        tracing::info!(
            loaded = total - warnings.len(),
            missing = warnings.len(),
            tile = %dims,
            downsample,
            kept_images = keep_images,
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Loaded tiles"
        );

        Ok(LoadedTiles {
            file_indices: requests.into_iter().map(|(_, index)| index).collect(),
            layout,
            geometry,
            images,
            strips,
            dims,
            bit_depth,
            warnings,
        })
    }

    fn register(&self, loaded: &LoadedTiles) -> OverlapGraph {
        let layout = loaded.layout;
        let strips = &loaded.strips;
        let nodes = grid_nodes(&layout, |pos| {
            let i = layout.index(pos);
            (loaded.file_indices[i], strips[i].is_some())
        });

        let start = Instant::now();
        let total = OverlapGraph::new(layout, nodes.clone()).lattice_pairs().len();
        let done = AtomicUsize::new(0);
        report_progress(&self.progress, 0, total, StitchStage::Registering);

        let registrar = PairRegistrar::new(
            loaded.geometry,
            &self.config.registration,
            self.config.solver.regression_threshold,
        );
        let graph = OverlapGraph::build(layout, nodes, |from, to, direction| {
            let registration = match (&strips[from], &strips[to]) {
                (Some(upstream), Some(downstream)) => registrar.register(
                    direction,
                    upstream.outgoing(direction),
                    downstream.incoming(direction),
                ),
                _ => PairRegistration::unaligned(),
            };
            let current = done.fetch_add(1, Ordering::Relaxed) + 1;
            report_progress(&self.progress, current, total, StitchStage::Registering);
            registration
        });

        tracing::info!(
            pairs = graph.edges().len(),
            low_confidence = graph.edges().iter().filter(|e| e.low_confidence).count(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Registered adjacent pairs"
        );
        graph
    }

    fn fuse(&self, components: &[Component], context: &FuseContext<'_>) -> Vec<ComponentOutcome> {
        let start = Instant::now();
        let total = components.len();
        let done = AtomicUsize::new(0);
        report_progress(&self.progress, 0, total, StitchStage::Fusing);

        let outcomes: Vec<ComponentOutcome> = components
            .par_iter()
            .map(|component| {
                let result = self.fuse_component(component, context);
                match &result {
                    Ok(fused) => tracing::info!(
                        component = component.index,
                        tiles = component.tiles.len(),
                        width = fused.width,
                        height = fused.height,
                        path = %fused.path.display(),
                        "Wrote component"
                    ),
                    Err(err) => tracing::error!(component = component.index, "{err}"),
                }
                let current = done.fetch_add(1, Ordering::Relaxed) + 1;
                report_progress(&self.progress, current, total, StitchStage::Fusing);
                ComponentOutcome {
                    index: component.index,
                    tiles: component.tiles.clone(),
                    result,
                }
            })
            .collect();

        tracing::info!(
            components = total,
            failed = outcomes.iter().filter(|o| !o.is_ok()).count(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Fused components"
        );
        outcomes
    }

    fn fuse_component(
        &self,
        component: &Component,
        context: &FuseContext<'_>,
    ) -> Result<FusedComponent, ComponentError> {
        let index = component.index;
        let fusion = &self.config.fusion;
        let dims = context.dims;
        let cancelled = || ComponentError::Cancelled { component: index };
        if self.cancel.is_cancelled() {
            return Err(cancelled());
        }

        let geometry = CanvasGeometry::covering(
            component
                .tiles
                .iter()
                .map(|&i| (context.placements[i].position, dims.width, dims.height)),
        )
        .ok_or(ComponentError::CanvasAllocation {
            component: index,
            width: 0,
            height: 0,
        })?;

        let layout = PngLayout {
            width: geometry.width,
            height: geometry.height,
            channels: dims.channels,
            bit_depth: context.bit_depth,
        };
        let name = &self.config.output.output_name;
        let path = context.output_dir.join(format!("{name}_c{index}.png"));

        let (path, checksum) = match fusion.memory_mode {
            MemoryMode::Fast => {
                let placed: Vec<PlacedTile<'_>> = component
                    .tiles
                    .iter()
                    .filter_map(|&i| {
                        context.images[i].as_ref().map(|image| PlacedTile {
                            node: i,
                            position: context.placements[i].position,
                            image,
                        })
                    })
                    .collect();
                let canvas = fuse_canvas(
                    &placed,
                    &geometry,
                    fusion.fusion_method,
                    fusion.fill_value,
                    index,
                )?;

                if self.cancel.is_cancelled() {
                    return Err(cancelled());
                }
                let path = write_png(&path, layout, index, |sink| {
                    let mut y0 = 0;
                    while y0 < canvas.height() {
                        let y1 = (y0 + fusion.band_rows).min(canvas.height());
                        sink.write_rows(canvas.rows(y0..y1))?;
                        y0 = y1;
                    }
                    Ok(())
                })?;
                (path, canvas.checksum())
            }
            MemoryMode::SaveMemory => {
                let tiles: Vec<BandTile> = component
                    .tiles
                    .iter()
                    .map(|&i| BandTile {
                        node: i,
                        position: context.placements[i].position,
                        height: dims.height,
                    })
                    .collect();
                let reload = |tile: &BandTile| {
                    let placement = &context.placements[tile.node];
                    load_tile(
                        self.source.as_ref(),
                        placement.pos,
                        placement.file_index,
                        self.config.source.downsample,
                        Some(dims),
                    )
                    .map_err(|source| ComponentError::TileReload {
                        component: index,
                        source,
                    })
                };

                let mut checksum = 0;
                let path = write_png(&path, layout, index, |sink| {
                    checksum = fuse_banded(
                        &tiles,
                        &geometry,
                        dims.channels,
                        fusion.fusion_method,
                        fusion.fill_value,
                        fusion.band_rows,
                        index,
                        reload,
                        |samples| {
                            if self.cancel.is_cancelled() {
                                return Err(cancelled());
                            }
                            sink.write_rows(samples)
                        },
                    )?;
                    Ok(())
                })?;
                (path, checksum)
            }
        };

        Ok(FusedComponent {
            path,
            origin: geometry.origin,
            width: geometry.width,
            height: geometry.height,
            checksum,
        })
    }

    fn write_params(&self, path: &Path) -> Result<PathBuf, StitchError> {
        let yaml = self.config.to_yaml()?;
        write_atomic(path, yaml.as_bytes()).map_err(|source| StitchError::ParamsWrite {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Stitch with `config`, reading tiles from its source directory.
pub fn stitch(config: StitchConfig) -> Result<Vec<PanoramaResult>, StitchError> {
    Stitcher::new(config)?.run()
}
