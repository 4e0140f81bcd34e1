//! Error and warning types for stitching.
//!
//! Tile- and edge-level problems never abort a job: they surface as
//! [`StitchWarning`]s and degrade placement locally. [`ComponentError`] stops a
//! single connected component. Only [`StitchError`] ends the whole job.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::tile::{GridPos, TileDimensions};

/// Failure to produce the pixels of one tile.
#[derive(Debug, Error)]
pub enum TileLoadError {
    #[error("Tile at row {row}, column {col} is missing: '{path}'")]
    Missing { row: usize, col: usize, path: PathBuf },

    #[error("Failed to decode tile '{path}': {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Tile '{path}' has dimensions {actual}, expected {expected}")]
    DimensionMismatch {
        path: PathBuf,
        expected: TileDimensions,
        actual: TileDimensions,
    },

    #[error("Tile '{path}' has unsupported pixel layout: {layout}")]
    UnsupportedLayout { path: PathBuf, layout: String },
}

/// Failure that stops one connected component. Other components proceed.
#[derive(Debug, Error)]
pub enum ComponentError {
    #[error("Cannot allocate {width}x{height} canvas for component {component}")]
    CanvasAllocation {
        component: usize,
        width: usize,
        height: usize,
    },

    #[error("Failed to write output '{path}' for component {component}: {source}")]
    OutputWrite {
        component: usize,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to encode '{path}' for component {component}: {source}")]
    Encode {
        component: usize,
        path: PathBuf,
        #[source]
        source: png::EncodingError,
    },

    #[error("Failed to reload tile for component {component}: {source}")]
    TileReload {
        component: usize,
        #[source]
        source: TileLoadError,
    },

    #[error("Component {component} skipped: job cancelled")]
    Cancelled { component: usize },
}

/// Job-level failure.
#[derive(Debug, Error)]
pub enum StitchError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No tiles could be loaded")]
    NoTiles,

    #[error("Stitching cancelled")]
    Cancelled,

    #[error("Failed to write placement table '{path}': {source}")]
    PlacementWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write parameter log '{path}': {source}")]
    ParamsWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid parameter document: {0}")]
    Yaml(#[from] serde_yml::Error),

    #[error(transparent)]
    Component(#[from] ComponentError),
}

/// Non-fatal event recorded during a run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StitchWarning {
    #[error("Tile {tile} is missing: {reason}")]
    MissingTile { tile: GridPos, reason: String },

    #[error("Edge {from} -> {to} rejected: confidence {confidence:.3} below threshold")]
    LowConfidenceRegistration {
        from: GridPos,
        to: GridPos,
        confidence: f64,
    },

    #[error("Edge {from} -> {to} rejected: residual {residual:.2} px disagrees with neighbors")]
    InconsistentEdge {
        from: GridPos,
        to: GridPos,
        residual: f64,
    },

    #[error("Tile {tile} placed at nominal position: correction {correction:.2} px exceeds bound")]
    TileFallback { tile: GridPos, correction: f64 },

    #[error(
        "Component at {anchor} ({tiles} tiles) placed at nominal positions: mean correction {mean_correction:.2} px"
    )]
    SystemicRegistrationFailure {
        anchor: GridPos,
        tiles: usize,
        mean_correction: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_tile_error_message() {
        let err = TileLoadError::Missing {
            row: 2,
            col: 1,
            path: PathBuf::from("/tiles/tile7.png"),
        };
        let msg = err.to_string();
        assert!(msg.contains("row 2"));
        assert!(msg.contains("column 1"));
        assert!(msg.contains("/tiles/tile7.png"));
    }

    #[test]
    fn test_dimension_mismatch_message() {
        let err = TileLoadError::DimensionMismatch {
            path: PathBuf::from("tile3.png"),
            expected: TileDimensions {
                width: 640,
                height: 480,
                channels: 1,
            },
            actual: TileDimensions {
                width: 320,
                height: 240,
                channels: 1,
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("640x480x1"));
        assert!(msg.contains("320x240x1"));
    }

    #[test]
    fn test_component_error_converts_to_stitch_error() {
        let err: StitchError = ComponentError::CanvasAllocation {
            component: 3,
            width: 100,
            height: 50,
        }
        .into();
        assert!(matches!(err, StitchError::Component(_)));
        assert!(err.to_string().contains("component 3"));
    }

    #[test]
    fn test_warning_messages_name_tiles() {
        let warning = StitchWarning::LowConfidenceRegistration {
            from: GridPos::new(0, 0),
            to: GridPos::new(0, 1),
            confidence: 0.125,
        };
        let msg = warning.to_string();
        assert!(msg.contains("(0, 0)"));
        assert!(msg.contains("(0, 1)"));
        assert!(msg.contains("0.125"));
    }
}
