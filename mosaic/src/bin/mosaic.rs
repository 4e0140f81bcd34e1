//! mosaic CLI - stitch a grid of overlapping tiles into panoramas.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use common::log_setup::setup_logging;
use mosaic::{
    FusionMethod, MemoryMode, PanoramaResult, PlacementMethod, StitchConfig, Stitcher,
};

#[derive(Parser)]
#[command(name = "mosaic")]
#[command(about = "Stitch overlapping microscope tiles acquired on a regular grid")]
#[command(version)]
struct Cli {
    /// Log level used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Directory for rotating log files.
    #[arg(long, global = true, default_value = "logs")]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register, solve and fuse a tile grid.
    Stitch(StitchArgs),

    /// Print the default configuration as YAML.
    DefaultConfig,
}

#[derive(Debug, Clone, Args)]
struct StitchArgs {
    /// YAML configuration file. Flags below override its fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the tile images.
    #[arg(long)]
    tiles: Option<PathBuf>,

    /// Tile file name prefix.
    #[arg(long)]
    prefix: Option<String>,

    /// Tile file extension.
    #[arg(long)]
    extension: Option<String>,

    /// Number of tile columns.
    #[arg(long)]
    grid_x: Option<usize>,

    /// Number of tile rows.
    #[arg(long)]
    grid_y: Option<usize>,

    /// Overlap fraction between adjacent tiles.
    #[arg(long)]
    overlap: Option<f64>,

    /// File index of the first tile.
    #[arg(long)]
    first_index: Option<usize>,

    /// Number of consecutive panoramas in the tile sequence.
    #[arg(long)]
    panoramas: Option<usize>,

    /// Integer decimation factor applied to every tile.
    #[arg(long)]
    downsample: Option<usize>,

    /// Minimum registration confidence for an edge to be used.
    #[arg(long)]
    regression_threshold: Option<f64>,

    /// Mean correction (px) above which a component falls back to nominal.
    #[arg(long)]
    max_avg_displacement: Option<f64>,

    /// Largest correction (px) a single tile may receive.
    #[arg(long)]
    absolute_displacement: Option<f64>,

    /// How overlapping tiles are combined.
    #[arg(long, value_enum)]
    fusion: Option<FusionMethodArg>,

    /// Speed versus peak memory during fusion.
    #[arg(long, value_enum)]
    memory: Option<MemoryModeArg>,

    /// Output directory.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Base name of output files.
    #[arg(long)]
    name: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FusionMethodArg {
    LinearBlending,
    Average,
    MaxIntensity,
    MinIntensity,
    Overlay,
}

impl From<FusionMethodArg> for FusionMethod {
    fn from(arg: FusionMethodArg) -> Self {
        match arg {
            FusionMethodArg::LinearBlending => FusionMethod::LinearBlending,
            FusionMethodArg::Average => FusionMethod::Average,
            FusionMethodArg::MaxIntensity => FusionMethod::MaxIntensity,
            FusionMethodArg::MinIntensity => FusionMethod::MinIntensity,
            FusionMethodArg::Overlay => FusionMethod::Overlay,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MemoryModeArg {
    Fast,
    SaveMemory,
}

impl From<MemoryModeArg> for MemoryMode {
    fn from(arg: MemoryModeArg) -> Self {
        match arg {
            MemoryModeArg::Fast => MemoryMode::Fast,
            MemoryModeArg::SaveMemory => MemoryMode::SaveMemory,
        }
    }
}

impl StitchArgs {
    fn to_config(&self) -> Result<StitchConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => StitchConfig::default(),
        };

        if let Some(tiles) = &self.tiles {
            config.source.directory = tiles.clone();
        }
        if let Some(prefix) = &self.prefix {
            config.source.prefix = prefix.clone();
        }
        if let Some(extension) = &self.extension {
            config.source.extension = extension.clone();
        }
        if let Some(x) = self.grid_x {
            config.grid.grid_size_x = x;
        }
        if let Some(y) = self.grid_y {
            config.grid.grid_size_y = y;
        }
        if let Some(overlap) = self.overlap {
            config.grid.tile_overlap = overlap;
        }
        if let Some(first) = self.first_index {
            config.source.first_file_index = first;
        }
        if let Some(count) = self.panoramas {
            config.source.panorama_count = count;
        }
        if let Some(factor) = self.downsample {
            config.source.downsample = factor;
        }
        if let Some(threshold) = self.regression_threshold {
            config.solver.regression_threshold = threshold;
        }
        if let Some(bound) = self.max_avg_displacement {
            config.solver.max_avg_displacement_threshold = bound;
        }
        if let Some(bound) = self.absolute_displacement {
            config.solver.absolute_displacement_threshold = bound;
        }
        if let Some(fusion) = self.fusion {
            config.fusion.fusion_method = fusion.into();
        }
        if let Some(memory) = self.memory {
            config.fusion.memory_mode = memory.into();
        }
        if let Some(out) = &self.out {
            config.output.output_dir = out.clone();
        }
        if let Some(name) = &self.name {
            config.output.output_name = name.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

fn load_config(path: &Path) -> Result<StitchConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config '{}'", path.display()))?;
    StitchConfig::from_yaml(&text)
        .with_context(|| format!("Invalid config '{}'", path.display()))
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Stitch(args) => {
            setup_logging(&cli.log_level, &cli.log_dir, "mosaic")
                .context("Failed to set up logging")?;
            run_stitch(&args)
        }
        Commands::DefaultConfig => {
            print!("{}", StitchConfig::default().to_yaml()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

// ── stitch ─────────────────────────────────────────────────────────────

fn run_stitch(args: &StitchArgs) -> Result<ExitCode> {
    let config = args.to_config()?;
    let results = Stitcher::new(config)?
        .run()
        .context("Stitching failed")?;

    for result in &results {
        print_summary(result);
    }

    if results.iter().all(PanoramaResult::all_failed) {
        eprintln!("No component could be written");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_summary(result: &PanoramaResult) {
    println!("Panorama {} -> {}", result.panorama, result.output_dir.display());
    println!(
        "  tiles: {} registered, {} fallback, {} missing",
        result.count(PlacementMethod::Registered),
        result.count(PlacementMethod::Fallback),
        result.count(PlacementMethod::Missing),
    );
    for component in &result.components {
        match &component.result {
            Ok(fused) => println!(
                "  component {}: {} tiles, {}x{} -> {}",
                component.index,
                component.tiles.len(),
                fused.width,
                fused.height,
                fused.path.display()
            ),
            Err(err) => println!("  component {}: FAILED: {err}", component.index),
        }
    }
    if !result.warnings.is_empty() {
        println!("  {} warnings:", result.warnings.len());
        for warning in &result.warnings {
            println!("    {warning}");
        }
    }
    println!("  placements: {}", result.placement_table.display());
}
