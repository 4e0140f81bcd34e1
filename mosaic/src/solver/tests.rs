use glam::DVec2;

use super::*;
use crate::graph::{TileNode, grid_nodes};
use crate::registration::{Direction, PairRegistration};
use crate::tile::GridLayout;

fn layout(rows: usize, cols: usize) -> GridLayout {
    GridLayout::new(rows, cols, 100, 100, 0.2)
}

fn present(layout: &GridLayout) -> Vec<TileNode> {
    grid_nodes(layout, |pos| (layout.index(pos), true))
}

/// Lattice graph whose edge `from -> to` measures `edge(from, to)`.
fn graph_with(
    rows: usize,
    cols: usize,
    edge: impl Fn(usize, usize, Direction) -> (DVec2, f64) + Sync,
) -> OverlapGraph {
    let layout = layout(rows, cols);
    OverlapGraph::build(layout, present(&layout), |from, to, direction| {
        let (displacement, confidence) = edge(from, to, direction);
        PairRegistration {
            displacement,
            confidence,
            low_confidence: false,
        }
    })
}

fn assert_near(actual: DVec2, expected: DVec2, tol: f64, what: &str) {
    assert!(
        (actual - expected).length() < tol,
        "{what}: expected {expected}, got {actual}"
    );
}

#[test]
fn test_single_tile_stays_nominal() {
    let mut graph = graph_with(1, 1, |_, _, _| unreachable!());
    let solution = solve(&mut graph, &SolverConfig::default());

    assert_eq!(solution.placements.len(), 1);
    assert_eq!(solution.placements[0].position, DVec2::ZERO);
    assert_eq!(solution.placements[0].position, solution.placements[0].nominal);
    assert_eq!(solution.placements[0].method, PlacementMethod::Fallback);
    assert!(solution.warnings.is_empty());
}

#[test]
fn test_consistent_displacements_are_recovered() {
    let truth = [
        DVec2::ZERO,
        DVec2::new(0.3, -0.2),
        DVec2::new(0.7, 0.1),
        DVec2::new(-0.4, 0.5),
        DVec2::new(0.25, 0.9),
        DVec2::new(-0.6, -0.35),
    ];
    let mut graph = graph_with(2, 3, |from, to, _| (truth[to] - truth[from], 0.9));
    let solution = solve(&mut graph, &SolverConfig::default());

    assert_eq!(solution.count(PlacementMethod::Registered), 6);
    assert!(solution.warnings.is_empty(), "{:?}", solution.warnings);
    let origin = solution.placements[0].correction();
    for (i, placement) in solution.placements.iter().enumerate() {
        assert_near(
            placement.correction() - origin,
            truth[i],
            1e-6,
            &format!("tile {i}"),
        );
    }
}

#[test]
fn test_corrections_have_zero_mean() {
    let mut graph = graph_with(1, 3, |_, _, _| (DVec2::new(1.0, 0.0), 0.9));
    let solution = solve(&mut graph, &SolverConfig::default());
    let sum: DVec2 = solution.placements.iter().map(|p| p.correction()).sum();
    assert_near(sum, DVec2::ZERO, 1e-9, "sum of corrections");
    assert_near(solution.placements[0].correction(), DVec2::new(-1.0, 0.0), 1e-9, "tile 0");
    assert_near(solution.placements[2].correction(), DVec2::new(1.0, 0.0), 1e-9, "tile 2");
}

#[test]
fn test_low_confidence_edge_does_not_move_neighbor() {
    let mut graph = graph_with(1, 2, |_, _, _| (DVec2::new(2.0, 1.0), 0.1));
    let solution = solve(&mut graph, &SolverConfig::default());

    assert!(!graph.edges()[0].accepted);
    for placement in &solution.placements {
        assert_eq!(placement.position, placement.nominal);
        assert_eq!(placement.method, PlacementMethod::Fallback);
    }
    assert!(matches!(
        solution.warnings.as_slice(),
        [StitchWarning::LowConfidenceRegistration { .. }]
    ));
}

#[test]
fn test_low_confidence_edge_is_excluded_from_propagation() {
    // Edge (0, 0) -> (0, 1) claims a large shift with low confidence; the
    // other path around the square says tile 1 sits at nominal.
    let mut graph = graph_with(2, 2, |from, to, _| {
        if (from, to) == (0, 1) {
            (DVec2::new(2.5, -1.5), 0.2)
        } else {
            (DVec2::ZERO, 0.8)
        }
    });
    let solution = solve(&mut graph, &SolverConfig::default());

    assert!(!graph.edges()[0].accepted);
    assert_eq!(solution.count(PlacementMethod::Registered), 4);
    for placement in &solution.placements {
        assert_near(placement.position, placement.nominal, 1e-9, "position");
    }
}

#[test]
fn test_all_zero_confidence_grid_falls_back_to_nominal() {
    let mut graph = graph_with(3, 3, |_, _, _| (DVec2::ZERO, 0.0));
    let solution = solve(&mut graph, &SolverConfig::default());

    assert_eq!(solution.count(PlacementMethod::Fallback), 9);
    for placement in &solution.placements {
        assert_eq!(placement.position, placement.nominal);
    }
    assert_eq!(solution.warnings.len(), 12);
    assert!(graph.edges().iter().all(|e| !e.accepted));
}

#[test]
fn test_systemic_failure_places_component_nominally() {
    // Consistent but implausibly large shifts
    let mut graph = graph_with(1, 3, |_, _, _| (DVec2::new(10.0, 0.0), 0.9));
    let solution = solve(&mut graph, &SolverConfig::default());

    assert_eq!(solution.count(PlacementMethod::Fallback), 3);
    for placement in &solution.placements {
        assert_eq!(placement.position, placement.nominal);
    }
    assert!(graph.edges().iter().all(|e| e.accepted));
    match solution.warnings.as_slice() {
        [StitchWarning::SystemicRegistrationFailure {
            anchor,
            tiles,
            mean_correction,
        }] => {
            assert_eq!(*anchor, GridPos::new(0, 0));
            assert_eq!(*tiles, 3);
            assert!((mean_correction - 20.0 / 3.0).abs() < 1e-6);
        }
        other => panic!("unexpected warnings {other:?}"),
    }
}

#[test]
fn test_inconsistent_edge_is_pruned() {
    // The bottom edge of the square disagrees with the other three. With its
    // lower weight it takes most of the loop error and is the only one over
    // the residual bound.
    let mut graph = graph_with(2, 2, |from, to, _| {
        if (from, to) == (2, 3) {
            (DVec2::new(12.0, 0.0), 0.4)
        } else {
            (DVec2::ZERO, 0.9)
        }
    });
    let solution = solve(&mut graph, &SolverConfig::default());

    let accepted: Vec<bool> = graph.edges().iter().map(|e| e.accepted).collect();
    assert_eq!(accepted, vec![true, true, true, false]);
    assert!(matches!(
        solution.warnings.as_slice(),
        [StitchWarning::InconsistentEdge { from, to, .. }]
            if *from == GridPos::new(1, 0) && *to == GridPos::new(1, 1)
    ));
    assert_eq!(solution.count(PlacementMethod::Registered), 4);
    for placement in &solution.placements {
        assert_near(placement.position, placement.nominal, 1e-9, "position");
    }
}

#[test]
fn test_large_single_correction_falls_back() {
    // Tile 3 is consistently 5 px to the right; with the zero-mean gauge it
    // ends up 3.75 px from nominal, the others 1.25 px.
    let mut graph = graph_with(2, 2, |_, to, _| {
        if to == 3 {
            (DVec2::new(5.0, 0.0), 0.9)
        } else {
            (DVec2::ZERO, 0.9)
        }
    });
    let solution = solve(&mut graph, &SolverConfig::default());

    let tile3 = solution.placements[3];
    assert_eq!(tile3.method, PlacementMethod::Fallback);
    assert_eq!(tile3.position, tile3.nominal);
    assert_eq!(solution.count(PlacementMethod::Registered), 3);
    assert_near(
        solution.placements[0].correction(),
        DVec2::new(-1.25, 0.0),
        1e-6,
        "tile 0",
    );
    assert!(matches!(
        solution.warnings.as_slice(),
        [StitchWarning::TileFallback { tile, .. }] if *tile == GridPos::new(1, 1)
    ));
}

#[test]
fn test_missing_tile_reported_at_nominal() {
    let layout = layout(1, 3);
    let nodes = grid_nodes(&layout, |pos| (layout.index(pos), pos.col != 2));
    let mut graph = OverlapGraph::build(layout, nodes, |_, _, _| PairRegistration {
        displacement: DVec2::new(0.5, 0.0),
        confidence: 0.9,
        low_confidence: false,
    });
    let solution = solve(&mut graph, &SolverConfig::default());

    assert_eq!(solution.placements[2].method, PlacementMethod::Missing);
    assert_eq!(solution.placements[2].position, solution.placements[2].nominal);
    assert_eq!(solution.count(PlacementMethod::Registered), 2);
}

#[test]
fn test_solution_is_deterministic() {
    let edge = |from: usize, to: usize, _: Direction| {
        let v = (from * 7 + to * 3) as f64 * 0.1;
        (DVec2::new(v.sin(), v.cos() * 0.5), 0.5 + 0.04 * to as f64)
    };
    let mut a = graph_with(3, 4, edge);
    let mut b = graph_with(3, 4, edge);
    let first = solve(&mut a, &SolverConfig::default());
    let second = solve(&mut b, &SolverConfig::default());
    assert_eq!(first, second);
}

#[test]
fn test_placement_method_names() {
    assert_eq!(PlacementMethod::Registered.to_string(), "registered");
    assert_eq!(PlacementMethod::Fallback.to_string(), "fallback");
    assert_eq!("missing".parse::<PlacementMethod>().unwrap(), PlacementMethod::Missing);
}
