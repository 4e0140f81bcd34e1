//! Global position solver.
//!
//! Every accepted edge states `c[to] - c[from] = displacement`, where `c` is a
//! tile's correction away from its nominal position. Per connected component
//! the corrections are the confidence-weighted least-squares solution of those
//! equations, found by conjugate gradient on the graph Laplacian with the
//! lowest-index tile pinned, then shifted to zero mean.
//!
//! An edge is rejected when its confidence is below `regression_threshold`,
//! or when its residual after a solve exceeds `absolute_displacement_threshold`.
//! Only the worst edge is dropped per round before solving again. A component
//! whose mean correction exceeds `max_avg_displacement_threshold` keeps its
//! edges but is placed on the nominal grid as a whole.
//!
//! A single tile whose correction exceeds `absolute_displacement_threshold`
//! falls back to its nominal position. All sweeps run in index order.

#[cfg(test)]
mod tests;

use glam::DVec2;
use strum_macros::{Display, EnumString};

use crate::config::SolverConfig;
use crate::error::StitchWarning;
use crate::graph::OverlapGraph;
use crate::grouping::accepted_components;
use crate::tile::GridPos;

const CG_TOLERANCE: f64 = 1e-12;

/// How a tile's final position was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum PlacementMethod {
    /// Solved from accepted registrations.
    Registered,
    /// Nominal grid position, registration unreliable or unavailable.
    Fallback,
    /// Tile could not be loaded; nominal position reported for reference.
    Missing,
}

/// Solved position of one tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilePlacement {
    pub pos: GridPos,
    pub file_index: usize,
    pub nominal: DVec2,
    pub position: DVec2,
    pub method: PlacementMethod,
}

impl TilePlacement {
    pub fn correction(&self) -> DVec2 {
        self.position - self.nominal
    }
}

/// Solver output: one placement per node, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub placements: Vec<TilePlacement>,
    pub warnings: Vec<StitchWarning>,
}

impl Solution {
    pub fn count(&self, method: PlacementMethod) -> usize {
        self.placements.iter().filter(|p| p.method == method).count()
    }
}

/// Solve absolute positions, clearing `accepted` on every rejected edge.
pub fn solve(graph: &mut OverlapGraph, config: &SolverConfig) -> Solution {
    let mut warnings = Vec::new();

    reject_low_confidence(graph, config.regression_threshold, &mut warnings);

    // Each round drops one accepted edge, so this terminates
    let mut corrections = solve_corrections(graph);
    while reject_worst_edge(
        graph,
        &corrections,
        config.absolute_displacement_threshold,
        &mut warnings,
    ) {
        corrections = solve_corrections(graph);
    }

    let mut placements: Vec<TilePlacement> = graph
        .nodes()
        .iter()
        .map(|node| TilePlacement {
            pos: node.pos,
            file_index: node.file_index,
            nominal: node.nominal,
            position: node.nominal,
            method: if node.present {
                PlacementMethod::Fallback
            } else {
                PlacementMethod::Missing
            },
        })
        .collect();

    for tiles in accepted_components(graph) {
        if tiles.len() < 2 {
            continue;
        }
        let mean_correction =
            tiles.iter().map(|&i| corrections[i].length()).sum::<f64>() / tiles.len() as f64;
        if mean_correction > config.max_avg_displacement_threshold {
            let warning = StitchWarning::SystemicRegistrationFailure {
                anchor: graph.node(tiles[0]).pos,
                tiles: tiles.len(),
                mean_correction,
            };
            tracing::warn!("{warning}");
            warnings.push(warning);
            continue;
        }

        for &i in &tiles {
            let correction = corrections[i].length();
            if correction > config.absolute_displacement_threshold {
                let warning = StitchWarning::TileFallback {
                    tile: graph.node(i).pos,
                    correction,
                };
                tracing::warn!("{warning}");
                warnings.push(warning);
                continue;
            }
            placements[i].position = placements[i].nominal + corrections[i];
            placements[i].method = PlacementMethod::Registered;
        }
    }

    tracing::info!(
        registered = placements
            .iter()
            .filter(|p| p.method == PlacementMethod::Registered)
            .count(),
        accepted_edges = graph.accepted_edges().count(),
        edges = graph.edges().len(),
        "Solved tile positions"
    );

    Solution {
        placements,
        warnings,
    }
}

fn reject_low_confidence(
    graph: &mut OverlapGraph,
    threshold: f64,
    warnings: &mut Vec<StitchWarning>,
) {
    let positions: Vec<GridPos> = graph.nodes().iter().map(|n| n.pos).collect();
    for edge in graph.edges_mut() {
        let usable = edge.confidence.is_finite()
            && edge.displacement.is_finite()
            && edge.confidence >= threshold;
        if edge.accepted && !usable {
            edge.accepted = false;
            let warning = StitchWarning::LowConfidenceRegistration {
                from: positions[edge.from],
                to: positions[edge.to],
                confidence: edge.confidence,
            };
            tracing::warn!("{warning}");
            warnings.push(warning);
        }
    }
}

/// Reject the accepted edge with the largest residual if it exceeds
/// `threshold`. Ties go to the lowest edge index.
fn reject_worst_edge(
    graph: &mut OverlapGraph,
    corrections: &[DVec2],
    threshold: f64,
    warnings: &mut Vec<StitchWarning>,
) -> bool {
    let mut worst: Option<(usize, f64)> = None;
    for (i, edge) in graph.edges().iter().enumerate() {
        if !edge.accepted {
            continue;
        }
        let residual =
            (corrections[edge.to] - corrections[edge.from] - edge.displacement).length();
        if residual > threshold && worst.map_or(true, |(_, r)| residual > r) {
            worst = Some((i, residual));
        }
    }

    let Some((i, residual)) = worst else {
        return false;
    };
    let edge = &mut graph.edges_mut()[i];
    edge.accepted = false;
    let (from, to) = (edge.from, edge.to);
    let warning = StitchWarning::InconsistentEdge {
        from: graph.node(from).pos,
        to: graph.node(to).pos,
        residual,
    };
    tracing::warn!("{warning}");
    warnings.push(warning);
    true
}

/// Corrections of every node from the accepted edges. Zero for nodes
/// without accepted edges.
fn solve_corrections(graph: &OverlapGraph) -> Vec<DVec2> {
    let mut corrections = vec![DVec2::ZERO; graph.nodes().len()];
    for tiles in accepted_components(graph) {
        if tiles.len() < 2 {
            continue;
        }
        let solved = solve_component(graph, &tiles);
        for (&i, c) in tiles.iter().zip(solved) {
            corrections[i] = c;
        }
    }
    corrections
}

/// Weighted least squares for one component, zero-mean gauge.
fn solve_component(graph: &OverlapGraph, tiles: &[usize]) -> Vec<DVec2> {
    let n = tiles.len();
    let local = |node: usize| tiles.binary_search(&node).ok();

    // (a, b, weight, displacement) with local indices
    let equations: Vec<(usize, usize, f64, DVec2)> = graph
        .accepted_edges()
        .filter_map(|e| {
            let a = local(e.from)?;
            let b = local(e.to)?;
            Some((a, b, e.confidence.max(1e-6), e.displacement))
        })
        .collect();

    let mut rhs = vec![DVec2::ZERO; n];
    for &(a, b, w, d) in &equations {
        rhs[b] += d * w;
        rhs[a] -= d * w;
    }

    let mut x = conjugate_gradient(n, &equations, &rhs);
    let mean = x.iter().copied().sum::<DVec2>() / n as f64;
    for c in &mut x {
        *c -= mean;
    }
    x
}

/// Solves `L x = rhs` with `x[0] = 0`, both axes at once.
fn conjugate_gradient(
    n: usize,
    equations: &[(usize, usize, f64, DVec2)],
    rhs: &[DVec2],
) -> Vec<DVec2> {
    let apply = |p: &[DVec2], out: &mut [DVec2]| {
        out.fill(DVec2::ZERO);
        for &(a, b, w, _) in equations {
            let diff = (p[b] - p[a]) * w;
            out[b] += diff;
            out[a] -= diff;
        }
        out[0] = DVec2::ZERO;
    };
    let dot = |u: &[DVec2], v: &[DVec2]| -> DVec2 { u.iter().zip(v).map(|(a, b)| *a * *b).sum() };

    let mut x = vec![DVec2::ZERO; n];
    let mut r = rhs.to_vec();
    r[0] = DVec2::ZERO;
    let mut p = r.clone();
    let mut ap = vec![DVec2::ZERO; n];
    let mut rr = dot(&r, &r);

    for _ in 0..4 * n {
        if rr.max_element() < CG_TOLERANCE {
            break;
        }
        apply(&p, &mut ap);
        let pap = dot(&p, &ap);
        let alpha = DVec2::new(safe_div(rr.x, pap.x), safe_div(rr.y, pap.y));
        for i in 0..n {
            x[i] += alpha * p[i];
            r[i] -= alpha * ap[i];
        }
        let rr_next = dot(&r, &r);
        let beta = DVec2::new(safe_div(rr_next.x, rr.x), safe_div(rr_next.y, rr.y));
        for i in 0..n {
            p[i] = r[i] + beta * p[i];
        }
        rr = rr_next;
    }
    x
}

fn safe_div(num: f64, den: f64) -> f64 {
    if den.abs() > 1e-300 { num / den } else { 0.0 }
}
