//! Partition of the tiles into independently fused components.
//!
//! A component is a maximal set of present tiles joined by accepted edges.
//! Tiles left with no accepted edge at all do not each become a panorama of
//! their own: they are joined along the plain grid lattice with every other
//! such tile they touch, so a low-confidence patch still fuses as one piece.


use crate::graph::OverlapGraph;

/// Union-find over node indices with path halving and union by size.
#[derive(Debug, Clone)]
pub struct DisjointSet {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSet {
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            size: vec![1; len],
        }
    }

    pub fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Merge the sets of `a` and `b`. Returns false if already joined.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let (mut ra, mut rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
        true
    }

    /// Sets of the selected elements, each sorted, ordered by smallest member.
    pub fn groups(&mut self, include: impl Fn(usize) -> bool) -> Vec<Vec<usize>> {
        let len = self.parent.len();
        let mut slot_of_root = vec![usize::MAX; len];
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for i in (0..len).filter(|&i| include(i)) {
            let root = self.find(i);
            if slot_of_root[root] == usize::MAX {
                slot_of_root[root] = groups.len();
                groups.push(Vec::new());
            }
            groups[slot_of_root[root]].push(i);
        }
        groups
    }
}

/// Tiles of one independently fused panorama fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    /// Position in the output order, used in file names.
    pub index: usize,
    /// Node indices, ascending.
    pub tiles: Vec<usize>,
}

/// Components over accepted edges only. Missing tiles are excluded.
pub fn accepted_components(graph: &OverlapGraph) -> Vec<Vec<usize>> {
    let mut set = DisjointSet::new(graph.nodes().len());
    for edge in graph.accepted_edges() {
        set.union(edge.from, edge.to);
    }
    set.groups(|i| graph.node(i).present)
}

/// Fusion components of the solved graph, ordered by smallest tile index.
pub fn connected_components(graph: &OverlapGraph) -> Vec<Component> {
    let n = graph.nodes().len();
    let mut set = DisjointSet::new(n);
    let mut has_accepted = vec![false; n];
    for edge in graph.accepted_edges() {
        set.union(edge.from, edge.to);
        has_accepted[edge.from] = true;
        has_accepted[edge.to] = true;
    }

    // Isolated tiles fall back to grid adjacency among themselves
    for edge in graph.edges() {
        if !has_accepted[edge.from] && !has_accepted[edge.to] {
            set.union(edge.from, edge.to);
        }
    }

    set.groups(|i| graph.node(i).present)
        .into_iter()
        .enumerate()
        .map(|(index, tiles)| Component { index, tiles })
        .collect()
}
