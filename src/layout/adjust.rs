//! Corrections applied on top of the engine's placement: marriage nodes
//! between spouses, sibling groups under their parents. Spouses already
//! share a rank when they get here.

use std::collections::{BTreeMap, HashMap};

use super::LayoutOptions;
use super::engine::{Placement, spread};
use super::graph::{FamilyGraph, GraphNode, NodeData};

pub(super) fn adjust(
    graph: &FamilyGraph,
    placements: &mut HashMap<String, Placement>,
    options: &LayoutOptions,
) {
    let nodes: HashMap<&str, &GraphNode> =
        graph.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    // Rows are finalized top-down so every anchor is settled before the row
    // that hangs off it.
    let mut rows: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
    for node in &graph.nodes {
        if let Some(placed) = placements.get(&node.id) {
            rows.entry(placed.rank).or_default().push(&node.id);
        }
    }
    let anchors = child_anchors(graph);

    for row in rows.values() {
        if options.center_marriages {
            center_marriages(row, &nodes, placements);
        }
        if options.center_children {
            center_children(row, &anchors, placements);
        }
        separate(row, &nodes, placements, options);
    }
}

/// Child id to the one node its descent edge comes from. Children with
/// several direct parents have no single anchor and are left alone.
fn child_anchors(graph: &FamilyGraph) -> HashMap<&str, &str> {
    let mut incoming: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in graph.edges.iter().filter(|e| e.kind.is_descent()) {
        incoming
            .entry(edge.target.as_str())
            .or_default()
            .push(edge.source.as_str());
    }
    incoming
        .into_iter()
        .filter_map(|(child, sources)| match sources.as_slice() {
            [anchor] => Some((child, *anchor)),
            _ => None,
        })
        .collect()
}

fn center_marriages(
    row: &[&str],
    nodes: &HashMap<&str, &GraphNode>,
    placements: &mut HashMap<String, Placement>,
) {
    for id in row {
        let Some(NodeData::Marriage { spouses, .. }) = nodes.get(id).map(|n| &n.data) else {
            continue;
        };
        let spouse_cross: Vec<f64> = spouses
            .iter()
            .filter_map(|s| placements.get(&s.to_string()).map(|p| p.cross))
            .collect();
        if let ([a, b], Some(placed)) = (spouse_cross.as_slice(), placements.get_mut(*id)) {
            placed.cross = (a + b) / 2.0;
        }
    }
}

fn center_children(
    row: &[&str],
    anchors: &HashMap<&str, &str>,
    placements: &mut HashMap<String, Placement>,
) {
    let mut groups: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for id in row {
        if let Some(&anchor) = anchors.get(id) {
            groups.entry(anchor).or_default().push(*id);
        }
    }

    for (anchor, children) in groups {
        let Some(target) = placements.get(anchor).map(|p| p.cross) else {
            continue;
        };
        let mean = children
            .iter()
            .filter_map(|c| placements.get(*c).map(|p| p.cross))
            .sum::<f64>()
            / children.len() as f64;
        let shift = target - mean;
        for child in children {
            if let Some(placed) = placements.get_mut(child) {
                placed.cross += shift;
            }
        }
    }
}

/// Pushes apart whatever the nudges made overlap, moving nodes as little as
/// possible.
fn separate(
    row: &[&str],
    nodes: &HashMap<&str, &GraphNode>,
    placements: &mut HashMap<String, Placement>,
    options: &LayoutOptions,
) {
    let mut ordered: Vec<(&str, f64, f64)> = row
        .iter()
        .filter_map(|id| {
            let node = nodes.get(id)?;
            let placed = placements.get(*id)?;
            let (extent, _) = options.direction.extents(options.size_of(&node.data));
            Some((*id, placed.cross, extent))
        })
        .collect();
    ordered.sort_by(|a, b| a.1.total_cmp(&b.1));

    let desired: Vec<f64> = ordered.iter().map(|&(_, cross, _)| cross).collect();
    let gaps: Vec<f64> = ordered
        .windows(2)
        .map(|pair| (pair[0].2 + pair[1].2) / 2.0 + options.node_sep)
        .collect();
    for (&(id, _, _), cross) in ordered.iter().zip(spread(&desired, &gaps)) {
        if let Some(placed) = placements.get_mut(id) {
            placed.cross = cross;
        }
    }
}
