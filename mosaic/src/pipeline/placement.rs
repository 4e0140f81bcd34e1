//! Tile placement table written next to the fused images.
//!
//! One CSV row per grid position so registration quality can be audited
//! without the images:
//!
//! ```text
//! tile_index,file_index,row,col,component,x,y,method
//! 0,4,0,0,0,0.000000,0.000000,registered
//! ```
//!
//! `component` is empty for missing tiles.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use common::file_utils::write_atomic;
use glam::DVec2;

use crate::error::StitchError;
use crate::grouping::Component;
use crate::solver::{PlacementMethod, TilePlacement};
use crate::tile::GridPos;

pub const CSV_HEADER: &str = "tile_index,file_index,row,col,component,x,y,method";

#[derive(Debug, Clone, PartialEq)]
pub struct PlacementRow {
    /// Row-major grid index.
    pub tile_index: usize,
    pub file_index: usize,
    pub pos: GridPos,
    pub component: Option<usize>,
    pub position: DVec2,
    pub method: PlacementMethod,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlacementTable {
    rows: Vec<PlacementRow>,
}

impl PlacementTable {
    pub fn new(placements: &[TilePlacement], components: &[Component]) -> Self {
        let mut component_of = vec![None; placements.len()];
        for component in components {
            for &tile in &component.tiles {
                component_of[tile] = Some(component.index);
            }
        }

        let rows = placements
            .iter()
            .zip(component_of)
            .enumerate()
            .map(|(tile_index, (p, component))| PlacementRow {
                tile_index,
                file_index: p.file_index,
                pos: p.pos,
                component,
                position: p.position,
                method: p.method,
            })
            .collect();
        Self { rows }
    }

    pub fn rows(&self) -> &[PlacementRow] {
        &self.rows
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::with_capacity(64 * (self.rows.len() + 1));
        out.push_str(CSV_HEADER);
        out.push('\n');
        for row in &self.rows {
            let component = row.component.map(|c| c.to_string()).unwrap_or_default();
            let _ = writeln!(
                out,
                "{},{},{},{},{},{:.6},{:.6},{}",
                row.tile_index,
                row.file_index,
                row.pos.row,
                row.pos.col,
                component,
                row.position.x,
                row.position.y,
                row.method
            );
        }
        out
    }

    pub fn write(&self, path: &Path) -> Result<PathBuf, StitchError> {
        write_atomic(path, self.to_csv().as_bytes()).map_err(|source| StitchError::PlacementWrite {
            path: path.to_path_buf(),
            source,
        })
    }
}
