//! Layered (Sugiyama-style) placement of a directed graph.
//!
//! The engine knows nothing about families: it takes sized nodes and weighted
//! edges with a minimum rank span, and returns a center point per node in
//! "layer space" (`cross` runs along a rank, `depth` runs across ranks).

use std::collections::{HashMap, VecDeque};

use super::{Direction, Size};

/// Spacing contributed by a virtual (edge) point in a row.
const EDGE_SEP: f64 = 10.0;
const ORDER_SWEEPS: usize = 24;
const ORDER_PATIENCE: usize = 4;
const COORD_SWEEPS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineOptions {
    pub direction: Direction,
    pub node_sep: f64,
    pub rank_sep: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Center along the rank.
    pub cross: f64,
    /// Center across ranks.
    pub depth: f64,
    pub rank: usize,
}

#[derive(Debug, Clone)]
struct Node {
    id: String,
    size: Size,
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    from: usize,
    to: usize,
    minlen: usize,
    weight: f64,
}

#[derive(Debug, Default, Clone)]
pub struct LayeredGraph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    edges: Vec<Edge>,
    same_rank: Vec<(usize, usize)>,
}

impl LayeredGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node, or resizes it when the id is already known.
    pub fn set_node(&mut self, id: &str, size: Size) {
        match self.index.get(id) {
            Some(&i) => self.nodes[i].size = size,
            None => {
                self.index.insert(id.to_string(), self.nodes.len());
                self.nodes.push(Node {
                    id: id.to_string(),
                    size,
                });
            }
        }
    }

    /// Returns false (and adds nothing) for unknown endpoints or self loops.
    pub fn set_edge(&mut self, from: &str, to: &str, minlen: usize, weight: f64) -> bool {
        let (Some(&from), Some(&to)) = (self.index.get(from), self.index.get(to)) else {
            return false;
        };
        if from == to {
            return false;
        }
        self.edges.push(Edge {
            from,
            to,
            minlen: minlen.max(1),
            weight,
        });
        true
    }

    /// Keeps `a` and `b` on one rank. Constraints chain, so a person married
    /// twice pulls both partners onto their row.
    pub fn set_same_rank(&mut self, a: &str, b: &str) -> bool {
        let (Some(&a), Some(&b)) = (self.index.get(a), self.index.get(b)) else {
            return false;
        };
        if a != b {
            self.same_rank.push((a, b));
        }
        true
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn layout(&self, options: &EngineOptions) -> HashMap<String, Placement> {
        if self.nodes.is_empty() {
            return HashMap::new();
        }
        let group = self.rank_groups();
        let edges = self.acyclic_edges(&group);
        let ranks = rank_nodes(&group, &edges);
        let mut layers = Layers::build(self, &edges, &ranks, options.direction);
        layers.order();
        let cross = layers.assign_cross(options.node_sep);
        let depth = layers.assign_depth(options.rank_sep);

        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| {
                (
                    node.id.clone(),
                    Placement {
                        cross: cross[i],
                        depth: depth[i],
                        rank: ranks[i],
                    },
                )
            })
            .collect()
    }

    /// Representative node per same-rank group.
    fn rank_groups(&self) -> Vec<usize> {
        fn find(parent: &mut [usize], mut v: usize) -> usize {
            while parent[v] != v {
                parent[v] = parent[parent[v]];
                v = parent[v];
            }
            v
        }

        let mut parent: Vec<usize> = (0..self.nodes.len()).collect();
        for &(a, b) in &self.same_rank {
            let (ra, rb) = (find(&mut parent, a), find(&mut parent, b));
            if ra != rb {
                parent[ra.max(rb)] = ra.min(rb);
            }
        }
        (0..parent.len()).map(|v| find(&mut parent, v)).collect()
    }

    /// Edge list with every DFS back edge reversed, searching the graph with
    /// each same-rank group collapsed to one node. Edges inside a group are
    /// dropped.
    fn acyclic_edges(&self, group: &[usize]) -> Vec<Edge> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        let n = self.nodes.len();
        let mut out: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, e) in self.edges.iter().enumerate() {
            if group[e.from] != group[e.to] {
                out[group[e.from]].push(i);
            }
        }

        let mut mark = vec![Mark::New; n];
        let mut reversed = vec![false; self.edges.len()];
        for root in (0..n).filter(|&v| group[v] == v) {
            if mark[root] != Mark::New {
                continue;
            }
            mark[root] = Mark::Active;
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
            while let Some(top) = stack.last_mut() {
                let (v, cursor) = *top;
                match out[v].get(cursor) {
                    Some(&ei) => {
                        top.1 += 1;
                        let w = group[self.edges[ei].to];
                        match mark[w] {
                            Mark::Active => reversed[ei] = true,
                            Mark::New => {
                                mark[w] = Mark::Active;
                                stack.push((w, 0));
                            }
                            Mark::Done => {}
                        }
                    }
                    None => {
                        mark[v] = Mark::Done;
                        stack.pop();
                    }
                }
            }
        }

        self.edges
            .iter()
            .zip(reversed)
            .filter(|(e, _)| group[e.from] != group[e.to])
            .map(|(e, flip)| {
                if flip {
                    Edge {
                        from: e.to,
                        to: e.from,
                        ..*e
                    }
                } else {
                    *e
                }
            })
            .collect()
    }
}

/// Longest-path ranking over the same-rank groups, then source groups are
/// pulled down to sit just above their nearest successor. `edges` must be
/// acyclic once grouped. Every member of a group gets the group's rank.
fn rank_nodes(group: &[usize], edges: &[Edge]) -> Vec<usize> {
    let n = group.len();
    let edges: Vec<Edge> = edges
        .iter()
        .map(|e| Edge {
            from: group[e.from],
            to: group[e.to],
            ..*e
        })
        .collect();
    let mut indegree = vec![0usize; n];
    let mut succ: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, e) in edges.iter().enumerate() {
        indegree[e.to] += 1;
        succ[e.from].push(i);
    }

    let mut remaining = indegree.clone();
    let mut queue: VecDeque<usize> = (0..n)
        .filter(|&v| group[v] == v && indegree[v] == 0)
        .collect();
    let mut topo = Vec::with_capacity(n);
    while let Some(v) = queue.pop_front() {
        topo.push(v);
        for &ei in &succ[v] {
            let w = edges[ei].to;
            remaining[w] -= 1;
            if remaining[w] == 0 {
                queue.push_back(w);
            }
        }
    }

    let mut rank = vec![0i64; n];
    for &v in &topo {
        for &ei in &succ[v] {
            let e = edges[ei];
            rank[e.to] = rank[e.to].max(rank[v] + e.minlen as i64);
        }
    }

    for &v in topo.iter().rev() {
        if indegree[v] == 0 {
            if let Some(tight) = succ[v]
                .iter()
                .map(|&ei| rank[edges[ei].to] - edges[ei].minlen as i64)
                .min()
            {
                rank[v] = tight;
            }
        }
    }

    let rank: Vec<i64> = group.iter().map(|&g| rank[g]).collect();
    let min = rank.iter().copied().min().unwrap_or(0);
    rank.into_iter().map(|r| (r - min) as usize).collect()
}

/// Places `desired.len()` points in order, as close as possible (least
/// squares) to `desired`, with `gaps[i]` the minimum distance between point
/// `i` and point `i + 1`.
pub(super) fn spread(desired: &[f64], gaps: &[f64]) -> Vec<f64> {
    let n = desired.len();
    let mut offsets = Vec::with_capacity(n);
    let mut acc = 0.0;
    for i in 0..n {
        if i > 0 {
            acc += gaps.get(i - 1).copied().unwrap_or(0.0);
        }
        offsets.push(acc);
    }

    // Pool adjacent violators over `desired - offset`.
    let mut blocks: Vec<(f64, usize)> = Vec::new();
    for i in 0..n {
        blocks.push((desired[i] - offsets[i], 1));
        while blocks.len() >= 2 {
            let (s2, c2) = blocks[blocks.len() - 1];
            let (s1, c1) = blocks[blocks.len() - 2];
            if s1 / c1 as f64 <= s2 / c2 as f64 {
                break;
            }
            blocks.pop();
            if let Some(last) = blocks.last_mut() {
                *last = (s1 + s2, c1 + c2);
            }
        }
    }

    let mut out = Vec::with_capacity(n);
    for (sum, count) in blocks {
        let base = sum / count as f64;
        for _ in 0..count {
            out.push(base + offsets[out.len()]);
        }
    }
    out
}

#[derive(Debug, Clone, Copy)]
struct LayerNode {
    real: bool,
    cross_extent: f64,
    depth_extent: f64,
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Up,
    Down,
    Both,
}

/// Proper layered graph: every edge joins adjacent ranks, long edges are
/// broken up by virtual nodes. Indices below `real_count` are the caller's
/// nodes.
struct Layers {
    nodes: Vec<LayerNode>,
    rank_of: Vec<usize>,
    rows: Vec<Vec<usize>>,
    up: Vec<Vec<(usize, f64)>>,
    down: Vec<Vec<(usize, f64)>>,
}

impl Layers {
    fn build(
        graph: &LayeredGraph,
        edges: &[Edge],
        ranks: &[usize],
        direction: Direction,
    ) -> Self {
        let mut nodes: Vec<LayerNode> = graph
            .nodes
            .iter()
            .map(|n| {
                let (cross_extent, depth_extent) = direction.extents(n.size);
                LayerNode {
                    real: true,
                    cross_extent,
                    depth_extent,
                }
            })
            .collect();
        let mut rank_of = ranks.to_vec();
        let mut up: Vec<Vec<(usize, f64)>> = vec![Vec::new(); nodes.len()];
        let mut down: Vec<Vec<(usize, f64)>> = vec![Vec::new(); nodes.len()];

        for e in edges {
            let mut prev = e.from;
            for r in ranks[e.from] + 1..ranks[e.to] {
                let v = nodes.len();
                nodes.push(LayerNode {
                    real: false,
                    cross_extent: 0.0,
                    depth_extent: 0.0,
                });
                rank_of.push(r);
                up.push(vec![(prev, e.weight)]);
                down.push(Vec::new());
                down[prev].push((v, e.weight));
                prev = v;
            }
            down[prev].push((e.to, e.weight));
            up[e.to].push((prev, e.weight));
        }

        let rank_count = rank_of.iter().copied().max().unwrap_or(0) + 1;
        let mut rows: Vec<Vec<usize>> = vec![Vec::new(); rank_count];

        // Initial order: depth-first from the caller's nodes, top rank first.
        let mut starts: Vec<usize> = (0..graph.nodes.len()).collect();
        starts.sort_by_key(|&v| rank_of[v]);
        let mut visited = vec![false; nodes.len()];
        for start in starts {
            if visited[start] {
                continue;
            }
            let mut stack = vec![start];
            while let Some(v) = stack.pop() {
                if visited[v] {
                    continue;
                }
                visited[v] = true;
                rows[rank_of[v]].push(v);
                for &(w, _) in down[v].iter().rev() {
                    if !visited[w] {
                        stack.push(w);
                    }
                }
            }
        }

        Self {
            nodes,
            rank_of,
            rows,
            up,
            down,
        }
    }

    fn positions(&self) -> Vec<usize> {
        let mut pos = vec![0; self.nodes.len()];
        for row in &self.rows {
            for (i, &v) in row.iter().enumerate() {
                pos[v] = i;
            }
        }
        pos
    }

    fn crossings(&self) -> f64 {
        let pos = self.positions();
        let mut total = 0.0;
        for row in &self.rows {
            let segments: Vec<(usize, usize, f64)> = row
                .iter()
                .flat_map(|&u| self.down[u].iter().map(move |&(v, w)| (u, v, w)))
                .map(|(u, v, w)| (pos[u], pos[v], w))
                .collect();
            for (i, &(a1, b1, w1)) in segments.iter().enumerate() {
                for &(a2, b2, w2) in &segments[i + 1..] {
                    if (a1 < a2 && b1 > b2) || (a1 > a2 && b1 < b2) {
                        total += w1 * w2;
                    }
                }
            }
        }
        total
    }

    fn order(&mut self) {
        let mut best = self.rows.clone();
        let mut best_crossings = self.crossings();
        let mut stale = 0;
        for sweep in 0..ORDER_SWEEPS {
            if best_crossings == 0.0 || stale >= ORDER_PATIENCE {
                break;
            }
            self.sweep(if sweep % 2 == 0 { Side::Up } else { Side::Down });
            let crossings = self.crossings();
            if crossings < best_crossings {
                best = self.rows.clone();
                best_crossings = crossings;
                stale = 0;
            } else {
                stale += 1;
            }
        }
        self.rows = best;
    }

    /// Reorders each row by the weighted barycenter of its neighbors on
    /// `side`, walking away from that side.
    fn sweep(&mut self, side: Side) {
        let rank_count = self.rows.len();
        let ranks: Vec<usize> = match side {
            Side::Down => (0..rank_count.saturating_sub(1)).rev().collect(),
            _ => (1..rank_count).collect(),
        };
        for r in ranks {
            let pos = self.positions();
            let mut keyed: Vec<(f64, usize)> = self.rows[r]
                .iter()
                .map(|&v| {
                    let key = self
                        .barycenter(v, side, |u| pos[u] as f64)
                        .unwrap_or(pos[v] as f64);
                    (key, v)
                })
                .collect();
            keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
            self.rows[r] = keyed.into_iter().map(|(_, v)| v).collect();
        }
    }

    fn barycenter(&self, v: usize, side: Side, at: impl Fn(usize) -> f64) -> Option<f64> {
        let (first, second): (&[(usize, f64)], &[(usize, f64)]) = match side {
            Side::Up => (&self.up[v], &[]),
            Side::Down => (&self.down[v], &[]),
            Side::Both => (&self.up[v], &self.down[v]),
        };
        let (sum, total) = first
            .iter()
            .chain(second)
            .fold((0.0, 0.0), |(sum, total), &(u, w)| {
                (sum + at(u) * w, total + w)
            });
        (total > 0.0).then(|| sum / total)
    }

    fn gap(&self, a: usize, b: usize, node_sep: f64) -> f64 {
        let sep = |v: usize| if self.nodes[v].real { node_sep } else { EDGE_SEP };
        (self.nodes[a].cross_extent + self.nodes[b].cross_extent) / 2.0 + (sep(a) + sep(b)) / 2.0
    }

    fn assign_cross(&self, node_sep: f64) -> Vec<f64> {
        let mut x = vec![0.0; self.nodes.len()];
        for row in &self.rows {
            let mut cursor = 0.0;
            for (i, &v) in row.iter().enumerate() {
                if i > 0 {
                    cursor += self.gap(row[i - 1], v, node_sep);
                }
                x[v] = cursor;
            }
        }

        let rank_count = self.rows.len();
        for sweep in 0..COORD_SWEEPS {
            if sweep % 2 == 0 {
                for r in 1..rank_count {
                    self.relax_row(r, Side::Up, node_sep, &mut x);
                }
            } else {
                for r in (0..rank_count.saturating_sub(1)).rev() {
                    self.relax_row(r, Side::Down, node_sep, &mut x);
                }
            }
        }
        for r in 0..rank_count {
            self.relax_row(r, Side::Both, node_sep, &mut x);
        }

        let left = (0..self.nodes.len())
            .map(|v| x[v] - self.nodes[v].cross_extent / 2.0)
            .fold(f64::INFINITY, f64::min);
        if left.is_finite() {
            for value in &mut x {
                *value -= left;
            }
        }
        x
    }

    fn relax_row(&self, r: usize, side: Side, node_sep: f64, x: &mut [f64]) {
        let row = &self.rows[r];
        if row.is_empty() {
            return;
        }
        let desired: Vec<f64> = row
            .iter()
            .map(|&v| self.barycenter(v, side, |u| x[u]).unwrap_or(x[v]))
            .collect();
        let gaps: Vec<f64> = row
            .windows(2)
            .map(|pair| self.gap(pair[0], pair[1], node_sep))
            .collect();
        for (&v, placed) in row.iter().zip(spread(&desired, &gaps)) {
            x[v] = placed;
        }
    }

    fn assign_depth(&self, rank_sep: f64) -> Vec<f64> {
        let mut centers = Vec::with_capacity(self.rows.len());
        let mut cursor = 0.0;
        for row in &self.rows {
            let thickness = row
                .iter()
                .map(|&v| self.nodes[v].depth_extent)
                .fold(0.0, f64::max);
            centers.push(cursor + thickness / 2.0);
            cursor += thickness + rank_sep;
        }
        self.rank_of.iter().map(|&r| centers[r]).collect()
    }
}
