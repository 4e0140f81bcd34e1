//! Overlap graph: tiles as nodes, registered adjacent pairs as edges.
//!
//! Nodes live in a row-major arena indexed like [`GridLayout::index`]; edges
//! refer to nodes by index. The topology is always the grid lattice, whatever
//! order the tiles were acquired in. Missing tiles stay in the arena as
//! isolated nodes so indices never shift.

#[cfg(test)]
mod tests;

use glam::DVec2;
use rayon::prelude::*;

use crate::registration::{Direction, PairRegistration};
use crate::tile::{GridLayout, GridPos};

/// One tile of the grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileNode {
    pub pos: GridPos,
    /// Acquisition index the tile was loaded from.
    pub file_index: usize,
    pub nominal: DVec2,
    /// False when the tile could not be loaded.
    pub present: bool,
}

/// A registered pair of adjacent tiles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    /// Upstream node (left or top).
    pub from: usize,
    /// Downstream node (right or bottom).
    pub to: usize,
    pub direction: Direction,
    /// Deviation of `to` from its nominal offset relative to `from`.
    pub displacement: DVec2,
    pub confidence: f64,
    /// Confidence fell below the threshold the pair was registered with.
    pub low_confidence: bool,
    /// Cleared by the solver when the edge is rejected.
    pub accepted: bool,
}

impl Edge {
    pub fn new(from: usize, to: usize, direction: Direction, registration: PairRegistration) -> Self {
        Self {
            from,
            to,
            direction,
            displacement: registration.displacement,
            confidence: registration.confidence,
            low_confidence: registration.low_confidence,
            accepted: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OverlapGraph {
    layout: GridLayout,
    nodes: Vec<TileNode>,
    edges: Vec<Edge>,
}

impl OverlapGraph {
    /// Graph without edges. `nodes` must be in row-major order.
    pub fn new(layout: GridLayout, nodes: Vec<TileNode>) -> Self {
        assert_eq!(
            nodes.len(),
            layout.tile_count(),
            "one node per grid position required"
        );
        Self {
            layout,
            nodes,
            edges: Vec::new(),
        }
    }

    /// Graph with every lattice pair registered by `register(from, to, direction)`.
    ///
    /// Pairs run in parallel; edges keep lattice order.
    pub fn build<F>(layout: GridLayout, nodes: Vec<TileNode>, register: F) -> Self
    where
        F: Fn(usize, usize, Direction) -> PairRegistration + Sync,
    {
        let mut graph = Self::new(layout, nodes);
        let pairs = graph.lattice_pairs();
        graph.edges = pairs
            .par_iter()
            .map(|&(from, to, direction)| {
                let registration = register(from, to, direction);
                tracing::debug!(
                    from = %graph.nodes[from].pos,
                    to = %graph.nodes[to].pos,
                    %direction,
                    dx = registration.displacement.x,
                    dy = registration.displacement.y,
                    confidence = registration.confidence,
                    low_confidence = registration.low_confidence,
                    "Registered pair"
                );
                Edge::new(from, to, direction, registration)
            })
            .collect();
        graph
    }

    /// Graph with the given edges, in the order given.
    pub fn with_edges(layout: GridLayout, nodes: Vec<TileNode>, edges: Vec<Edge>) -> Self {
        let mut graph = Self::new(layout, nodes);
        debug_assert!(edges
            .iter()
            .all(|e| e.from < graph.nodes.len() && e.to < graph.nodes.len()));
        graph.edges = edges;
        graph
    }

    /// Adjacent pairs of present tiles: row-major, right neighbor before down.
    pub fn lattice_pairs(&self) -> Vec<(usize, usize, Direction)> {
        let mut pairs = Vec::new();
        for pos in self.layout.positions() {
            let from = self.layout.index(pos);
            if !self.nodes[from].present {
                continue;
            }
            if pos.col + 1 < self.layout.cols {
                let to = self.layout.index(GridPos::new(pos.row, pos.col + 1));
                if self.nodes[to].present {
                    pairs.push((from, to, Direction::Right));
                }
            }
            if pos.row + 1 < self.layout.rows {
                let to = self.layout.index(GridPos::new(pos.row + 1, pos.col));
                if self.nodes[to].present {
                    pairs.push((from, to, Direction::Down));
                }
            }
        }
        pairs
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn nodes(&self) -> &[TileNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> &TileNode {
        &self.nodes[index]
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edges_mut(&mut self) -> &mut [Edge] {
        &mut self.edges
    }

    pub fn accepted_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(|e| e.accepted)
    }
}

/// Row-major nodes for `layout`, with `file_index` and `present` per position.
pub fn grid_nodes(
    layout: &GridLayout,
    mut describe: impl FnMut(GridPos) -> (usize, bool),
) -> Vec<TileNode> {
    layout
        .positions()
        .map(|pos| {
            let (file_index, present) = describe(pos);
            TileNode {
                pos,
                file_index,
                nominal: layout.nominal_position(pos),
                present,
            }
        })
        .collect()
}
