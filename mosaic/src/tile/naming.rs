//! Mapping between grid positions and acquisition file indices.
//!
//! The stage visits tiles in a fixed path; the n-th captured image gets file
//! index `n`. Both directions of the mapping are pure functions of the
//! traversal order and grid size, independent of the overlap graph.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use super::GridPos;

/// Whether consecutive lines reverse direction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TraversalPattern {
    /// Every other line is traversed backwards.
    #[default]
    Snake,
    /// Every line starts from the same side.
    Sequential,
}

/// Which grid lines the stage sweeps along first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TraversalAxis {
    /// Column-major: a whole column is captured before moving on.
    #[default]
    ByColumns,
    /// Row-major.
    ByRows,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VerticalOrder {
    /// Row 0 first.
    #[default]
    Down,
    /// Last row first.
    Up,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HorizontalOrder {
    /// Column 0 first.
    Right,
    /// Last column first.
    #[default]
    Left,
}

/// Acquisition path over the grid.
///
/// The default, snake by columns starting down and moving left, matches the
/// stage sweep of the microscope rig: the rightmost column is captured top to
/// bottom, the next one bottom to top, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalOrder {
    pub pattern: TraversalPattern,
    pub axis: TraversalAxis,
    pub vertical: VerticalOrder,
    pub horizontal: HorizontalOrder,
}

impl TraversalOrder {
    /// Line-major order with every line in the same direction.
    pub fn sequential(axis: TraversalAxis) -> Self {
        Self {
            pattern: TraversalPattern::Sequential,
            axis,
            vertical: VerticalOrder::Down,
            horizontal: HorizontalOrder::Right,
        }
    }
}

/// Zero-based position of `pos` along the acquisition path.
///
/// Panics if `pos` lies outside a `rows` x `cols` grid.
pub fn file_index(order: &TraversalOrder, rows: usize, cols: usize, pos: GridPos) -> usize {
    assert!(
        pos.row < rows && pos.col < cols,
        "grid position {pos} outside {rows}x{cols} grid"
    );
    let row_step = ordinal(pos.row, rows, order.vertical == VerticalOrder::Up);
    let col_step = ordinal(pos.col, cols, order.horizontal == HorizontalOrder::Left);

    match order.axis {
        TraversalAxis::ByColumns => {
            let line = col_step;
            let along = snake(row_step, rows, line, order.pattern);
            line * rows + along
        }
        TraversalAxis::ByRows => {
            let line = row_step;
            let along = snake(col_step, cols, line, order.pattern);
            line * cols + along
        }
    }
}

/// Grid position captured at zero-based path `index`, the inverse of [`file_index`].
///
/// Returns `None` when `index` is past the last tile.
pub fn grid_position(
    order: &TraversalOrder,
    rows: usize,
    cols: usize,
    index: usize,
) -> Option<GridPos> {
    if index >= rows * cols {
        return None;
    }

    let (row_step, col_step) = match order.axis {
        TraversalAxis::ByColumns => {
            let line = index / rows;
            let along = snake(index % rows, rows, line, order.pattern);
            (along, line)
        }
        TraversalAxis::ByRows => {
            let line = index / cols;
            let along = snake(index % cols, cols, line, order.pattern);
            (line, along)
        }
    };

    Some(GridPos {
        row: ordinal(row_step, rows, order.vertical == VerticalOrder::Up),
        col: ordinal(col_step, cols, order.horizontal == HorizontalOrder::Left),
    })
}

/// File name of the tile with absolute file index `index`.
pub fn tile_file_name(prefix: &str, index: usize, extension: &str) -> String {
    format!("{prefix}{index}.{extension}")
}

// Both helpers are involutions, which is what makes the two mappings inverse.
#[inline]
fn ordinal(value: usize, len: usize, reversed: bool) -> usize {
    if reversed {
        len - 1 - value
    } else {
        value
    }
}

#[inline]
fn snake(value: usize, len: usize, line: usize, pattern: TraversalPattern) -> usize {
    ordinal(
        value,
        len,
        pattern == TraversalPattern::Snake && line % 2 == 1,
    )
}
