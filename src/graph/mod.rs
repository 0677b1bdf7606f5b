//! Static constraint relationship graph.
//!
//! Built once from the catalog. MUTEX is a symmetric pair set; REQUIRES and
//! IMPLIES are directed edges followed by [`DependencyGraph::requirement_closure`];
//! LIMITS, CONFLICTS and ENHANCES are directed edges kept for explanations
//! only.

mod progressive;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::Catalog;
use crate::constraint::ConstraintId;
use crate::store::MutexTable;

pub use progressive::threshold_violation;

/// Relationship kinds between two constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    /// Mutually exclusive.
    Mutex,
    /// The source cannot hold without the target.
    Requires,
    /// The source brings the target along.
    Implies,
    /// Soft conflict.
    Conflicts,
    /// Works better together.
    Enhances,
    /// The source restricts the target.
    Limits,
}

impl RelationType {
    /// Returns true for edges followed by the requirement closure.
    #[must_use]
    pub const fn is_requirement(self) -> bool {
        matches!(self, Self::Requires | Self::Implies)
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Mutex => "mutex",
            Self::Requires => "requires",
            Self::Implies => "implies",
            Self::Conflicts => "conflicts",
            Self::Enhances => "enhances",
            Self::Limits => "limits",
        };
        f.write_str(s)
    }
}

/// Threshold values declared for a constraint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Lower bound.
    pub min: Option<f64>,
    /// Upper bound.
    pub max: Option<f64>,
}

/// A node of the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintNode {
    /// Constraint id.
    pub id: ConstraintId,
    /// Display name.
    pub name: String,
    /// Category used for alternatives.
    pub category: String,
    /// Outgoing edges by kind.
    pub relationships: BTreeMap<RelationType, Vec<ConstraintId>>,
    /// Declared thresholds.
    pub threshold_values: Thresholds,
}

/// A constraint whose own requirement closure contains a mutex pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitiveConflict {
    /// The constraint whose closure is inconsistent.
    pub root: ConstraintId,
    /// One side of the pair.
    pub a: ConstraintId,
    /// Other side of the pair.
    pub b: ConstraintId,
}

/// Relationship graph over constraint ids.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<ConstraintId, ConstraintNode>,
    adjacency: HashMap<ConstraintId, Vec<(ConstraintId, RelationType)>>,
    mutex: MutexTable,
    transitive: Vec<TransitiveConflict>,
}

impl DependencyGraph {
    /// Builds the graph from a catalog.
    #[must_use]
    pub fn from_catalog(catalog: &Catalog) -> Self {
        let mut graph = Self {
            mutex: MutexTable::from_catalog(catalog),
            ..Self::default()
        };

        for (id, def) in &catalog.constraints {
            graph.nodes.insert(
                id.clone(),
                ConstraintNode {
                    id: id.clone(),
                    name: def.name.clone().unwrap_or_default(),
                    category: def.category.clone().unwrap_or_else(|| "general".to_string()),
                    relationships: BTreeMap::new(),
                    threshold_values: Thresholds {
                        min: def.min_value,
                        max: def.max_value,
                    },
                },
            );
        }

        for (a, b) in catalog.mutex_pairs() {
            graph.ensure_node(&a);
            graph.ensure_node(&b);
            graph.add_edge(&a, &b, RelationType::Mutex);
            graph.add_edge(&b, &a, RelationType::Mutex);
        }

        let rel = &catalog.relationships;
        for (table, kind) in [
            (&rel.requires, RelationType::Requires),
            (&rel.implies, RelationType::Implies),
            (&rel.limits, RelationType::Limits),
            (&rel.conflicts, RelationType::Conflicts),
            (&rel.enhances, RelationType::Enhances),
        ] {
            for (source, targets) in table {
                for target in targets {
                    graph.add_edge(source, target, kind);
                }
            }
        }

        graph.transitive = graph.compute_transitive_conflicts();
        for conflict in &graph.transitive {
            info!(
                root = %conflict.root,
                a = %conflict.a,
                b = %conflict.b,
                "transitive conflict in catalog"
            );
        }
        graph
    }

    fn ensure_node(&mut self, id: &ConstraintId) {
        self.nodes.entry(id.clone()).or_insert_with(|| ConstraintNode {
            id: id.clone(),
            name: id.to_string(),
            category: "general".to_string(),
            relationships: BTreeMap::new(),
            threshold_values: Thresholds::default(),
        });
    }

    fn add_edge(&mut self, source: &ConstraintId, target: &ConstraintId, kind: RelationType) {
        let edges = self.adjacency.entry(source.clone()).or_default();
        if edges.iter().any(|(t, k)| t == target && *k == kind) {
            return;
        }
        edges.push((target.clone(), kind));
        if let Some(node) = self.nodes.get_mut(source) {
            node.relationships
                .entry(kind)
                .or_default()
                .push(target.clone());
        }
    }

    fn compute_transitive_conflicts(&self) -> Vec<TransitiveConflict> {
        let mut found = Vec::new();
        for root in self.nodes.keys() {
            let closure: Vec<ConstraintId> = self.requirement_closure(root).into_iter().collect();
            for (i, a) in closure.iter().enumerate() {
                for b in &closure[i + 1..] {
                    if self.is_mutex(a, b) {
                        found.push(TransitiveConflict {
                            root: root.clone(),
                            a: a.clone(),
                            b: b.clone(),
                        });
                    }
                }
            }
        }
        found
    }

    /// Returns true if `a` and `b` are mutually exclusive. Symmetric.
    #[must_use]
    pub fn is_mutex(&self, a: &ConstraintId, b: &ConstraintId) -> bool {
        self.mutex.is_mutex(a, b)
    }

    /// Every id reachable from `id` over REQUIRES and IMPLIES edges,
    /// including `id` itself. Cycle-safe.
    #[must_use]
    pub fn requirement_closure(&self, id: &ConstraintId) -> BTreeSet<ConstraintId> {
        let mut visited = BTreeSet::new();
        visited.insert(id.clone());
        let mut queue = VecDeque::from([id.clone()]);

        while let Some(current) = queue.pop_front() {
            let Some(edges) = self.adjacency.get(&current) else {
                continue;
            };
            for (next, kind) in edges {
                if kind.is_requirement() && visited.insert(next.clone()) {
                    queue.push_back(next.clone());
                }
            }
        }
        visited
    }

    /// Same-category constraints that are not mutex with any other member
    /// of `conflicting`. Hints only.
    #[must_use]
    pub fn find_alternatives(&self, conflicting: &[ConstraintId]) -> Vec<ConstraintId> {
        let mut alternatives = Vec::new();
        let mut seen: HashSet<&ConstraintId> = conflicting.iter().collect();

        for constraint in conflicting {
            let Some(node) = self.nodes.get(constraint) else {
                continue;
            };
            for (candidate, other) in &self.nodes {
                if other.category != node.category || seen.contains(candidate) {
                    continue;
                }
                let clashes = conflicting
                    .iter()
                    .any(|c| c != constraint && self.is_mutex(candidate, c));
                if !clashes {
                    seen.insert(candidate);
                    alternatives.push(candidate.clone());
                }
            }
        }
        alternatives
    }

    /// Constraints whose own closure holds a mutex pair. Computed at build
    /// time.
    #[must_use]
    pub fn transitive_conflicts(&self) -> &[TransitiveConflict] {
        &self.transitive
    }

    /// Explains how `a` reaches `b`, following every edge kind.
    #[must_use]
    pub fn explain_relationship(&self, a: &ConstraintId, b: &ConstraintId) -> String {
        if self.is_mutex(a, b) {
            return format!("{a} ⊗ {b}: direct mutual exclusion");
        }

        let mut visited = HashSet::from([a.clone()]);
        let mut queue = VecDeque::from([vec![(a.clone(), None::<RelationType>)]]);

        while let Some(path) = queue.pop_front() {
            let Some((current, _)) = path.last() else {
                continue;
            };
            let Some(edges) = self.adjacency.get(current) else {
                continue;
            };
            for (next, kind) in edges {
                if next == b {
                    let mut full = path.clone();
                    full.push((next.clone(), Some(*kind)));
                    return format_path(&full);
                }
                if visited.insert(next.clone()) {
                    let mut extended = path.clone();
                    extended.push((next.clone(), Some(*kind)));
                    queue.push_back(extended);
                }
            }
        }

        format!("No relationship found between {a} and {b}")
    }

    /// Looks up a node.
    #[must_use]
    pub fn node(&self, id: &ConstraintId) -> Option<&ConstraintNode> {
        self.nodes.get(id)
    }

    /// Targets limited by `id`.
    #[must_use]
    pub fn limits(&self, id: &ConstraintId) -> Vec<ConstraintId> {
        self.adjacency
            .get(id)
            .map(|edges| {
                edges
                    .iter()
                    .filter(|(_, kind)| *kind == RelationType::Limits)
                    .map(|(target, _)| target.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn format_path(path: &[(ConstraintId, Option<RelationType>)]) -> String {
    let (Some((start, _)), Some((end, _))) = (path.first(), path.last()) else {
        return String::new();
    };
    if path.len() == 2 {
        let kind = path[1].1.map_or_else(String::new, |k| format!(" ({k})"));
        return format!("{start} → {end}: direct relationship{kind}");
    }

    let mut out = format!("Path from {start} to {end}:");
    for pair in path.windows(2) {
        let kind = pair[1].1.map_or_else(String::new, |k| format!(" [{k}]"));
        out.push_str(&format!("\n  {} → {}{kind}", pair[0].0, pair[1].0));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ConstraintId {
        ConstraintId::new(s)
    }

    fn graph() -> DependencyGraph {
        DependencyGraph::from_catalog(&Catalog::builtin())
    }

    #[test]
    fn mutex_is_symmetric() {
        let g = graph();
        assert!(g.is_mutex(&id("CNST_FANLESS"), &id("CNST_GPU_REQUIRED")));
        assert!(g.is_mutex(&id("CNST_GPU_REQUIRED"), &id("CNST_FANLESS")));
        assert!(!g.is_mutex(&id("CNST_FANLESS"), &id("CNST_MODULAR")));
    }

    #[test]
    fn closure_follows_requires_and_implies() {
        let g = graph();
        let closure = g.requirement_closure(&id("CNST_GPU_REQUIRED"));
        assert!(closure.contains(&id("CNST_GPU_REQUIRED")));
        assert!(closure.contains(&id("CNST_COOLING_ACTIVE")));
        assert!(closure.contains(&id("CNST_POWER_MIN_100W")));
        assert!(!closure.contains(&id("CNST_FANLESS")));

        let limited = g.requirement_closure(&id("CNST_COMPACT_FORM"));
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn closure_survives_cycles() {
        let catalog = Catalog::from_json(
            r#"{"relationships": {"requires": {"A": ["B"], "B": ["C"], "C": ["A"]}}}"#,
        )
        .unwrap();
        let g = DependencyGraph::from_catalog(&catalog);
        assert_eq!(g.requirement_closure(&id("A")).len(), 3);
    }

    #[test]
    fn transitive_conflicts_found_at_build() {
        let catalog = Catalog::from_json(
            r#"{
                "relationships": {
                    "requires": {"CNST_EDGE_AI": ["CNST_GPU_REQUIRED", "CNST_FANLESS"]},
                    "mutex_pairs": [["CNST_GPU_REQUIRED", "CNST_FANLESS"]]
                },
                "constraints": {"CNST_EDGE_AI": {"category": "processing"}}
            }"#,
        )
        .unwrap();
        let g = DependencyGraph::from_catalog(&catalog);
        let found = g.transitive_conflicts();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].root, id("CNST_EDGE_AI"));
        assert!(graph().transitive_conflicts().is_empty());
    }

    #[test]
    fn alternatives_share_category_and_avoid_mutex() {
        let g = graph();
        let alts = g.find_alternatives(&[id("CNST_COMPACT_FORM"), id("CNST_DIGITAL_IO_MIN_128")]);
        assert!(alts.contains(&id("CNST_MODULAR")));
        assert!(alts.contains(&id("CNST_LARGE_FORM")));
        assert!(alts.contains(&id("CNST_EXPANSION_SLOTS")));
        assert!(!alts.contains(&id("CNST_DIGITAL_IO_MIN_64")));
        assert!(!alts.contains(&id("CNST_COMPACT_FORM")));
    }

    #[test]
    fn explain_paths() {
        let g = graph();
        let direct = g.explain_relationship(&id("CNST_WIFI"), &id("CNST_LATENCY_MAX_1MS"));
        assert!(direct.contains("mutual exclusion"));

        let one_hop = g.explain_relationship(&id("CNST_GPU_REQUIRED"), &id("CNST_COOLING_ACTIVE"));
        assert!(one_hop.contains("direct relationship"));
        assert!(one_hop.contains("requires"));

        let two_hop = g.explain_relationship(&id("CNST_FANLESS"), &id("CNST_COOLING_ACTIVE"));
        assert!(two_hop.starts_with("Path from CNST_FANLESS"));

        let none = g.explain_relationship(&id("CNST_RTOS"), &id("CNST_WIFI"));
        assert!(none.starts_with("No relationship"));
    }

    #[test]
    fn limits_and_nodes() {
        let g = graph();
        assert_eq!(g.limits(&id("CNST_COMPACT_FORM")), vec![id("CNST_IO_LIMITED")]);
        let node = g.node(&id("CNST_COMPACT_FORM")).unwrap();
        assert_eq!(node.category, "form_factor");
        assert!(node.relationships.contains_key(&RelationType::Mutex));
        assert!(!g.is_empty());
    }
}
