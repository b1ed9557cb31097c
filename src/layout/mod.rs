//! Family tree to diagram: graph construction, layered placement and the
//! post-layout nudges that keep couples together and children under them.

mod adjust;
pub mod engine;
pub mod graph;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::entity::{persons, relationships};
use engine::{EngineOptions, LayeredGraph};
pub use graph::{EdgeKind, FamilyGraph, GraphEdge, NodeData};

const DUMMY_SIZE: Size = Size {
    width: 1.0,
    height: 1.0,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    #[serde(rename = "TB")]
    TopBottom,
    #[serde(rename = "LR")]
    LeftRight,
}

impl Direction {
    /// `(along a rank, across ranks)` for a node of `size`.
    pub fn extents(self, size: Size) -> (f64, f64) {
        match self {
            Direction::TopBottom => (size.width, size.height),
            Direction::LeftRight => (size.height, size.width),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown layout direction '{0}', expected TB or LR")]
pub struct UnknownDirection(String);

impl FromStr for Direction {
    type Err = UnknownDirection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TB" => Ok(Direction::TopBottom),
            "LR" => Ok(Direction::LeftRight),
            _ => Err(UnknownDirection(s.to_string())),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::TopBottom => "TB",
            Direction::LeftRight => "LR",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutOptions {
    pub direction: Direction,
    pub node_sep: f64,
    pub rank_sep: f64,
    pub person_size: Size,
    pub marriage_size: Size,
    /// Route spouse edges through a hidden node when one spouse has no
    /// parents in the tree.
    pub spouse_dummy: bool,
    /// Rank both spouses of every marriage together.
    pub align_spouses: bool,
    pub center_marriages: bool,
    pub center_children: bool,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            direction: Direction::TopBottom,
            node_sep: 70.0,
            rank_sep: 70.0,
            person_size: Size {
                width: 180.0,
                height: 100.0,
            },
            marriage_size: Size {
                width: 50.0,
                height: 50.0,
            },
            spouse_dummy: true,
            align_spouses: true,
            center_marriages: true,
            center_children: true,
        }
    }
}

impl LayoutOptions {
    pub fn size_of(&self, data: &NodeData) -> Size {
        match data {
            NodeData::Person { .. } => self.person_size,
            NodeData::Marriage { .. } => self.marriage_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Handle {
    Top,
    Bottom,
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagramNode {
    pub id: String,
    pub data: NodeData,
    /// Top-left corner.
    pub position: Point,
    pub width: f64,
    pub height: f64,
    pub source_position: Handle,
    pub target_position: Handle,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FamilyDiagram {
    pub direction: Direction,
    pub nodes: Vec<DiagramNode>,
    pub edges: Vec<GraphEdge>,
    pub width: f64,
    pub height: f64,
    pub warnings: Vec<String>,
}

/// Runs the whole pipeline over the full person and relationship tables.
pub fn layout_family(
    persons: &[persons::Model],
    relationships: &[relationships::Model],
    options: &LayoutOptions,
) -> FamilyDiagram {
    let graph = FamilyGraph::build(persons, relationships);
    for warning in &graph.warnings {
        warn!("{warning}");
    }

    let mut engine = LayeredGraph::new();
    for node in &graph.nodes {
        engine.set_node(&node.id, options.size_of(&node.data));
    }
    if options.spouse_dummy {
        add_spouse_dummies(&graph, &mut engine);
    }
    for edge in &graph.edges {
        engine.set_edge(&edge.source, &edge.target, 1, edge.kind.weight());
    }
    if options.align_spouses {
        for node in &graph.nodes {
            if let NodeData::Marriage { spouses: [a, b], .. } = &node.data {
                engine.set_same_rank(&a.to_string(), &b.to_string());
            }
        }
    }
    debug!(
        "Laying out {} diagram nodes ({} with helpers), {} edges",
        graph.nodes.len(),
        engine.node_count(),
        graph.edges.len()
    );

    let mut placements = engine.layout(&EngineOptions {
        direction: options.direction,
        node_sep: options.node_sep,
        rank_sep: options.rank_sep,
    });
    placements.retain(|id, _| graph.node(id).is_some());
    adjust::adjust(&graph, &mut placements, options);

    let (source_position, target_position) = match options.direction {
        Direction::TopBottom => (Handle::Bottom, Handle::Top),
        Direction::LeftRight => (Handle::Right, Handle::Left),
    };
    let mut nodes: Vec<DiagramNode> = graph
        .nodes
        .iter()
        .filter_map(|node| {
            let placed = placements.get(&node.id)?;
            let size = options.size_of(&node.data);
            let (x, y) = match options.direction {
                Direction::TopBottom => (placed.cross, placed.depth),
                Direction::LeftRight => (placed.depth, placed.cross),
            };
            Some(DiagramNode {
                id: node.id.clone(),
                data: node.data.clone(),
                position: Point {
                    x: x - size.width / 2.0,
                    y: y - size.height / 2.0,
                },
                width: size.width,
                height: size.height,
                source_position,
                target_position,
            })
        })
        .collect();

    let left = nodes
        .iter()
        .map(|n| n.position.x)
        .fold(f64::INFINITY, f64::min);
    let top = nodes
        .iter()
        .map(|n| n.position.y)
        .fold(f64::INFINITY, f64::min);
    let (mut width, mut height) = (0.0_f64, 0.0_f64);
    if left.is_finite() && top.is_finite() {
        for node in &mut nodes {
            node.position.x -= left;
            node.position.y -= top;
            width = width.max(node.position.x + node.width);
            height = height.max(node.position.y + node.height);
        }
    }

    FamilyDiagram {
        direction: options.direction,
        nodes,
        edges: graph.edges,
        width,
        height,
        warnings: graph.warnings,
    }
}

/// Gives a marriage an extra hidden predecessor fed by both spouses when at
/// least one of them has no parents in the tree.
fn add_spouse_dummies(graph: &FamilyGraph, engine: &mut LayeredGraph) {
    let children: HashSet<&str> = graph
        .edges
        .iter()
        .filter(|e| e.kind.is_descent())
        .map(|e| e.target.as_str())
        .collect();

    for node in graph.nodes.iter().filter(|n| n.is_marriage()) {
        let spouses: Vec<&str> = graph
            .edges
            .iter()
            .filter(|e| e.kind == EdgeKind::Spouse && e.target == node.id)
            .map(|e| e.source.as_str())
            .collect();
        if spouses.len() != 2 || spouses.iter().all(|s| children.contains(s)) {
            continue;
        }
        let dummy = format!("dummy-{}", node.id);
        engine.set_node(&dummy, DUMMY_SIZE);
        for spouse in &spouses {
            engine.set_edge(spouse, &dummy, 1, EdgeKind::Descent.weight());
        }
        engine.set_edge(&dummy, &node.id, 1, EdgeKind::Descent.weight());
    }
}

#[cfg(test)]
mod tests {
    use super::graph::marriage_id;
    use super::graph::tests::{person, rel};
    use super::*;
    use crate::entity::relationships::RelationshipType;

    impl DiagramNode {
        fn center(&self) -> Point {
            Point {
                x: self.position.x + self.width / 2.0,
                y: self.position.y + self.height / 2.0,
            }
        }
    }

    impl FamilyDiagram {
        fn node(&self, id: &str) -> Option<&DiagramNode> {
            self.nodes.iter().find(|n| n.id == id)
        }

        fn y_of(&self, id: impl ToString) -> f64 {
            self.node(&id.to_string()).unwrap().position.y
        }
    }

    fn overlaps(a: &DiagramNode, b: &DiagramNode) -> bool {
        a.position.x < b.position.x + b.width
            && b.position.x < a.position.x + a.width
            && a.position.y < b.position.y + b.height
            && b.position.y < a.position.y + a.height
    }

    /// Grandparents, a couple where only one spouse has parents in the tree,
    /// and their two children.
    fn three_generations() -> (Vec<persons::Model>, Vec<relationships::Model>) {
        let gp1 = person("Ravi");
        let gp2 = person("Sita");
        let dad = person("Arjun");
        let mum = person("Meera");
        let kid1 = person("Kavya");
        let kid2 = person("Rohan");
        let rels = vec![
            rel(gp1.id, gp2.id, RelationshipType::Spouse),
            rel(gp1.id, dad.id, RelationshipType::Parent),
            rel(gp2.id, dad.id, RelationshipType::Parent),
            rel(dad.id, mum.id, RelationshipType::Spouse),
            rel(dad.id, kid1.id, RelationshipType::Parent),
            rel(mum.id, kid1.id, RelationshipType::Parent),
            rel(kid2.id, dad.id, RelationshipType::Child),
            rel(kid2.id, mum.id, RelationshipType::Child),
        ];
        (vec![gp1, gp2, dad, mum, kid1, kid2], rels)
    }

    #[test]
    fn spouses_share_a_row_with_the_marriage_between_them() {
        let (people, rels) = three_generations();
        let diagram = layout_family(&people, &rels, &LayoutOptions::default());
        let dad = diagram.node(&people[2].id.to_string()).unwrap();
        let mum = diagram.node(&people[3].id.to_string()).unwrap();
        let marriage = diagram
            .node(&marriage_id(people[2].id, people[3].id))
            .unwrap();

        assert_eq!(dad.position.y, mum.position.y);
        let midpoint = (dad.center().x + mum.center().x) / 2.0;
        assert!((marriage.center().x - midpoint).abs() < 1e-6);
        assert!(marriage.position.y > dad.position.y);
    }

    #[test]
    fn a_spouse_pulled_down_takes_their_children_along() {
        // Asha sits one generation under her parent, Bala four under his
        // ancestors. Asha's own child must stay below her.
        let gp = person("Ravi");
        let asha = person("Asha");
        let kid = person("Kavya");
        let x0 = person("Gopal");
        let x1 = person("Hari");
        let x2 = person("Indra");
        let bala = person("Bala");
        let rels = vec![
            rel(gp.id, asha.id, RelationshipType::Parent),
            rel(asha.id, kid.id, RelationshipType::Parent),
            rel(x0.id, x1.id, RelationshipType::Parent),
            rel(x1.id, x2.id, RelationshipType::Parent),
            rel(x2.id, bala.id, RelationshipType::Parent),
            rel(asha.id, bala.id, RelationshipType::Spouse),
        ];
        let people = vec![
            gp.clone(),
            asha.clone(),
            kid.clone(),
            x0,
            x1,
            x2,
            bala.clone(),
        ];
        let diagram = layout_family(&people, &rels, &LayoutOptions::default());

        assert_eq!(diagram.y_of(asha.id), diagram.y_of(bala.id));
        assert!(diagram.y_of(kid.id) > diagram.y_of(asha.id));
        assert!(diagram.y_of(asha.id) > diagram.y_of(gp.id));
        assert!(diagram.y_of(marriage_id(asha.id, bala.id)) > diagram.y_of(asha.id));
    }

    #[test]
    fn both_marriages_of_a_remarried_person_stay_on_one_row() {
        let asha = person("Asha");
        let chitra = person("Chitra");
        let x0 = person("Gopal");
        let x1 = person("Hari");
        let bala = person("Bala");
        let rels = vec![
            rel(asha.id, chitra.id, RelationshipType::Spouse),
            rel(x0.id, x1.id, RelationshipType::Parent),
            rel(x1.id, bala.id, RelationshipType::Parent),
            rel(asha.id, bala.id, RelationshipType::Spouse),
        ];
        let people = vec![asha.clone(), chitra.clone(), x0, x1, bala.clone()];
        let diagram = layout_family(&people, &rels, &LayoutOptions::default());

        let row = diagram.y_of(asha.id);
        assert_eq!(diagram.y_of(bala.id), row);
        assert_eq!(diagram.y_of(chitra.id), row);
        for (a, b) in [(asha.id, chitra.id), (asha.id, bala.id)] {
            assert!(diagram.y_of(marriage_id(a, b)) > row);
        }
        for (i, a) in diagram.nodes.iter().enumerate() {
            for b in &diagram.nodes[i + 1..] {
                assert!(!overlaps(a, b), "{} overlaps {}", a.id, b.id);
            }
        }
    }

    #[test]
    fn children_are_centered_under_their_parents() {
        let (people, rels) = three_generations();
        let diagram = layout_family(&people, &rels, &LayoutOptions::default());
        let marriage = diagram
            .node(&marriage_id(people[2].id, people[3].id))
            .unwrap();
        let k1 = diagram.node(&people[4].id.to_string()).unwrap();
        let k2 = diagram.node(&people[5].id.to_string()).unwrap();

        assert_eq!(k1.position.y, k2.position.y);
        assert!(k1.position.y > marriage.position.y);
        let mean = (k1.center().x + k2.center().x) / 2.0;
        assert!((mean - marriage.center().x).abs() < 1e-6);
    }

    #[test]
    fn no_two_nodes_overlap() {
        let (mut people, mut rels) = three_generations();
        // an unrelated family alongside
        let a = person("Lakshmi");
        let b = person("Gopal");
        let c = person("Nila");
        rels.push(rel(a.id, b.id, RelationshipType::Spouse));
        rels.push(rel(a.id, c.id, RelationshipType::Parent));
        people.extend([a, b, c]);

        for direction in [Direction::TopBottom, Direction::LeftRight] {
            let options = LayoutOptions {
                direction,
                ..LayoutOptions::default()
            };
            let diagram = layout_family(&people, &rels, &options);
            assert_eq!(diagram.nodes.len(), people.len() + 3);
            for (i, a) in diagram.nodes.iter().enumerate() {
                for b in &diagram.nodes[i + 1..] {
                    assert!(!overlaps(a, b), "{} overlaps {}", a.id, b.id);
                }
            }
        }
    }

    #[test]
    fn diagram_is_anchored_at_the_origin() {
        let (people, rels) = three_generations();
        let diagram = layout_family(&people, &rels, &LayoutOptions::default());
        let left = diagram
            .nodes
            .iter()
            .map(|n| n.position.x)
            .fold(f64::MAX, f64::min);
        let top = diagram
            .nodes
            .iter()
            .map(|n| n.position.y)
            .fold(f64::MAX, f64::min);
        assert_eq!((left, top), (0.0, 0.0));
        assert!(diagram.width >= 180.0 && diagram.height >= 100.0);
    }

    #[test]
    fn left_right_puts_generations_in_columns() {
        let (people, rels) = three_generations();
        let options = LayoutOptions {
            direction: Direction::LeftRight,
            ..LayoutOptions::default()
        };
        let diagram = layout_family(&people, &rels, &options);
        let gp = diagram.node(&people[0].id.to_string()).unwrap();
        let kid = diagram.node(&people[4].id.to_string()).unwrap();
        assert!(kid.position.x > gp.position.x);
        assert_eq!(kid.target_position, Handle::Left);
    }

    #[test]
    fn empty_tree_lays_out_to_nothing() {
        let diagram = layout_family(&[], &[], &LayoutOptions::default());
        assert!(diagram.nodes.is_empty());
        assert_eq!((diagram.width, diagram.height), (0.0, 0.0));
    }

    #[test]
    fn direction_parses_either_case() {
        assert_eq!("lr".parse::<Direction>().unwrap(), Direction::LeftRight);
        assert_eq!("TB".parse::<Direction>().unwrap(), Direction::TopBottom);
        assert!("up".parse::<Direction>().is_err());
    }
}
