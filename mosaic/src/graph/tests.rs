use std::sync::Mutex;

use glam::DVec2;

use super::*;

fn layout(rows: usize, cols: usize) -> GridLayout {
    GridLayout::new(rows, cols, 100, 80, 0.2)
}

fn all_present(layout: &GridLayout) -> Vec<TileNode> {
    grid_nodes(layout, |pos| (layout.index(pos), true))
}

fn fixed(displacement: DVec2, confidence: f64) -> PairRegistration {
    PairRegistration {
        displacement,
        confidence,
        low_confidence: false,
    }
}

#[test]
fn test_lattice_edge_count() {
    let layout = layout(3, 4);
    let graph = OverlapGraph::new(layout, all_present(&layout));
    let pairs = graph.lattice_pairs();
    // rows * (cols - 1) + (rows - 1) * cols
    assert_eq!(pairs.len(), 3 * 3 + 2 * 4);
}

#[test]
fn test_lattice_order_is_row_major_right_first() {
    let layout = layout(2, 2);
    let graph = OverlapGraph::new(layout, all_present(&layout));
    assert_eq!(
        graph.lattice_pairs(),
        vec![
            (0, 1, Direction::Right),
            (0, 2, Direction::Down),
            (1, 3, Direction::Down),
            (2, 3, Direction::Right),
        ]
    );
}

#[test]
fn test_single_tile_has_no_edges() {
    let layout = layout(1, 1);
    let graph = OverlapGraph::build(layout, all_present(&layout), |_, _, _| {
        panic!("no pairs to register")
    });
    assert!(graph.edges().is_empty());
    assert_eq!(graph.nodes().len(), 1);
}

#[test]
fn test_missing_tile_is_isolated() {
    let layout = layout(3, 3);
    let nodes = grid_nodes(&layout, |pos| (layout.index(pos), pos != GridPos::new(1, 1)));
    let graph = OverlapGraph::new(layout, nodes);
    let center = layout.index(GridPos::new(1, 1));

    assert!(!graph.node(center).present);
    assert!(graph
        .lattice_pairs()
        .iter()
        .all(|&(a, b, _)| a != center && b != center));
    // 12 lattice pairs minus the 4 touching the center
    assert_eq!(graph.lattice_pairs().len(), 8);
}

#[test]
fn test_build_keeps_edge_order_and_values() {
    let layout = layout(3, 3);
    let calls = Mutex::new(0usize);
    let graph = OverlapGraph::build(layout, all_present(&layout), |from, to, _| {
        *calls.lock().unwrap() += 1;
        fixed(DVec2::new(from as f64, to as f64), 0.5)
    });

    assert_eq!(*calls.lock().unwrap(), 12);
    let expected = graph.lattice_pairs();
    assert_eq!(graph.edges().len(), expected.len());
    for (edge, &(from, to, direction)) in graph.edges().iter().zip(&expected) {
        assert_eq!((edge.from, edge.to, edge.direction), (from, to, direction));
        assert_eq!(edge.displacement, DVec2::new(from as f64, to as f64));
        assert_eq!(edge.confidence, 0.5);
        assert!(edge.accepted, "builder must not filter edges");
    }
}

#[test]
fn test_every_tile_has_at_most_one_right_and_one_down_edge() {
    let layout = layout(4, 3);
    let graph = OverlapGraph::build(layout, all_present(&layout), |_, _, _| {
        fixed(DVec2::ZERO, 1.0)
    });
    for node in 0..graph.nodes().len() {
        let right = graph
            .edges()
            .iter()
            .filter(|e| e.from == node && e.direction == Direction::Right)
            .count();
        let down = graph
            .edges()
            .iter()
            .filter(|e| e.from == node && e.direction == Direction::Down)
            .count();
        assert!(right <= 1 && down <= 1, "node {node}: {right} right, {down} down");
    }
}

#[test]
fn test_edges_carry_low_confidence_flag() {
    let layout = layout(1, 3);
    let graph = OverlapGraph::build(layout, all_present(&layout), |from, _, _| {
        let mut registration = fixed(DVec2::ZERO, 0.1);
        registration.low_confidence = from == 1;
        registration
    });
    let flags: Vec<bool> = graph.edges().iter().map(|e| e.low_confidence).collect();
    assert_eq!(flags, vec![false, true]);
    assert!(graph.edges().iter().all(|e| e.accepted));
}

#[test]
fn test_nominal_positions() {
    let layout = layout(2, 3);
    let nodes = all_present(&layout);
    assert_eq!(nodes[5].pos, GridPos::new(1, 2));
    assert!((nodes[5].nominal - DVec2::new(160.0, 64.0)).length() < 1e-9);
}
