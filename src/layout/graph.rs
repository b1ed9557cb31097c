use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::entity::{persons, relationships};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NodeData {
    Person {
        person_id: Uuid,
        label: String,
        nickname: Option<String>,
        birthday: Option<NaiveDate>,
        gender: Option<String>,
    },
    Marriage {
        spouses: [Uuid; 2],
        color: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub data: NodeData,
}

impl GraphNode {
    pub fn is_marriage(&self) -> bool {
        matches!(self.data, NodeData::Marriage { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// spouse -> marriage
    Spouse,
    /// marriage -> child
    Descent,
    /// parent -> child, no marriage to route through
    SingleParent,
}

impl EdgeKind {
    pub fn weight(self) -> f64 {
        match self {
            EdgeKind::Spouse => 1.0,
            EdgeKind::Descent | EdgeKind::SingleParent => 5.0,
        }
    }

    pub fn is_descent(self) -> bool {
        !matches!(self, EdgeKind::Spouse)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
    pub color: Option<String>,
}

/// Persons and relationships turned into diagram nodes and edges, with one
/// synthetic marriage node per distinct spouse pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FamilyGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub warnings: Vec<String>,
}

struct Marriage {
    node_id: String,
    color: String,
}

fn pair_key(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b { (a, b) } else { (b, a) }
}

pub fn marriage_id(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = pair_key(a, b);
    format!("marriage-{lo}-{hi}")
}

fn edge_id(source: &str, target: &str) -> String {
    format!("edge-{source}-{target}")
}

/// A dark `#RRGGBB` color picked from the marriage id, stable across runs.
fn marriage_color(key: &str) -> String {
    const DIGITS: &[u8] = b"0123456789ABC";
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in key.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    let mut color = String::from("#");
    for _ in 0..6 {
        color.push(DIGITS[(hash % DIGITS.len() as u64) as usize] as char);
        hash /= DIGITS.len() as u64;
    }
    color
}

impl FamilyGraph {
    pub fn build(persons: &[persons::Model], relationships: &[relationships::Model]) -> Self {
        let mut graph = FamilyGraph::default();
        let known: HashSet<Uuid> = persons.iter().map(|p| p.id).collect();

        for person in persons {
            graph.nodes.push(GraphNode {
                id: person.id.to_string(),
                data: NodeData::Person {
                    person_id: person.id,
                    label: person.name.clone(),
                    nickname: person.nickname.clone(),
                    birthday: person.birthday,
                    gender: person.gender.clone(),
                },
            });
        }

        let mut marriages: HashMap<(Uuid, Uuid), Marriage> = HashMap::new();
        for rel in relationships
            .iter()
            .filter(|r| r.relationship_type == relationships::RelationshipType::Spouse)
        {
            if rel.person1_id == rel.person2_id {
                graph.warnings.push(format!(
                    "Ignoring spouse relationship {} of a person to themselves",
                    rel.id
                ));
                continue;
            }
            if !known.contains(&rel.person1_id) || !known.contains(&rel.person2_id) {
                graph.warnings.push(format!(
                    "Ignoring spouse relationship {} to an unknown person",
                    rel.id
                ));
                continue;
            }
            let key = pair_key(rel.person1_id, rel.person2_id);
            if marriages.contains_key(&key) {
                continue;
            }
            let node_id = marriage_id(key.0, key.1);
            let color = marriage_color(&node_id);
            graph.nodes.push(GraphNode {
                id: node_id.clone(),
                data: NodeData::Marriage {
                    spouses: [key.0, key.1],
                    color: color.clone(),
                },
            });
            for spouse in [key.0, key.1] {
                let spouse = spouse.to_string();
                graph.push_edge(&spouse, &node_id, EdgeKind::Spouse, Some(&color));
            }
            marriages.insert(key, Marriage { node_id, color });
        }

        let mut parents_of: BTreeMap<Uuid, Vec<Uuid>> = BTreeMap::new();
        for rel in relationships {
            let Some((parent, child)) = rel.parent_and_child() else {
                continue;
            };
            if parent == child || !known.contains(&parent) || !known.contains(&child) {
                graph.warnings.push(format!(
                    "Ignoring parent relationship {} with an unknown or repeated person",
                    rel.id
                ));
                continue;
            }
            let parents = parents_of.entry(child).or_default();
            if !parents.contains(&parent) {
                parents.push(parent);
            }
        }

        for (child, parents) in &parents_of {
            let child_id = child.to_string();
            if let [a, b] = parents.as_slice() {
                if let Some(marriage) = marriages.get(&pair_key(*a, *b)) {
                    let (source, color) = (marriage.node_id.clone(), marriage.color.clone());
                    graph.push_edge(&source, &child_id, EdgeKind::Descent, Some(&color));
                    continue;
                }
                graph.warnings.push(format!(
                    "Parents {a} and {b} of {child} are not married; linking each parent directly"
                ));
            } else if parents.len() > 2 {
                graph.warnings.push(format!(
                    "{child} has {} parents listed; linking each parent directly",
                    parents.len()
                ));
            }
            for parent in parents {
                graph.push_edge(&parent.to_string(), &child_id, EdgeKind::SingleParent, None);
            }
        }

        graph
    }

    fn push_edge(&mut self, source: &str, target: &str, kind: EdgeKind, color: Option<&str>) {
        self.edges.push(GraphEdge {
            id: edge_id(source, target),
            source: source.to_string(),
            target: target.to_string(),
            kind,
            color: color.map(str::to_string),
        });
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}
