//! Stage dependency graph.
//!
//! Nodes are stage requirement ids; edges are [`StageDependency`] values
//! pointing from a dependent to its prerequisite. The graph is an arena of
//! ids plus edge indexes, so requirements never hold references to each
//! other.
//!
//! # Algorithm
//! - Cycle detection: DFS with white/gray/black coloring over hard
//!   (non-optional) edges. Reaching a gray node is a back edge; the gray
//!   path from that node to the current one is the cycle. O(V + E).
//! - Ordering: Kahn's algorithm with a ready set ordered by
//!   `(execution_order, id)`, so equal-rank stages come out in authoring
//!   order and the result is deterministic.
//!
//! Optional edges are advisory. They are kept for display but never take
//! part in ordering, cycle detection or start-time math.
//!
//! # Reference
//! Cormen et al. (2009), "Introduction to Algorithms", Ch. 22.3-22.4
//! Kahn (1962), "Topological sorting of large networks"

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{CycleEdge, CycleError, GraphError};
use crate::models::{DependencyType, StageDependency, TimeWindow};

#[derive(Debug, Clone)]
struct Node {
    part_id: String,
    execution_order: i32,
}

/// Dependency graph over stage requirements.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, Node>,
    edges: Vec<StageDependency>,
    /// dependent id → indexes into `edges`
    outgoing: HashMap<String, Vec<usize>>,
    /// prerequisite id → indexes into `edges`
    incoming: HashMap<String, Vec<usize>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a stage requirement node.
    pub fn add_stage(
        &mut self,
        requirement_id: impl Into<String>,
        part_id: impl Into<String>,
        execution_order: i32,
    ) -> Result<(), GraphError> {
        let id = requirement_id.into();
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateStage(id));
        }
        self.nodes.insert(
            id,
            Node {
                part_id: part_id.into(),
                execution_order,
            },
        );
        Ok(())
    }

    /// Adds a dependency edge between two registered stages.
    pub fn add_edge(&mut self, edge: StageDependency) -> Result<(), GraphError> {
        if edge.dependent == edge.prerequisite {
            return Err(GraphError::SelfDependency(edge.dependent));
        }
        for id in [&edge.dependent, &edge.prerequisite] {
            if !self.nodes.contains_key(id) {
                return Err(GraphError::UnknownStage(id.clone()));
            }
        }
        let idx = self.edges.len();
        self.outgoing
            .entry(edge.dependent.clone())
            .or_default()
            .push(idx);
        self.incoming
            .entry(edge.prerequisite.clone())
            .or_default()
            .push(idx);
        self.edges.push(edge);
        Ok(())
    }

    pub fn contains(&self, requirement_id: &str) -> bool {
        self.nodes.contains_key(requirement_id)
    }

    pub fn part_of(&self, requirement_id: &str) -> Option<&str> {
        self.nodes.get(requirement_id).map(|n| n.part_id.as_str())
    }

    pub fn execution_order(&self, requirement_id: &str) -> Option<i32> {
        self.nodes.get(requirement_id).map(|n| n.execution_order)
    }

    /// All edges in insertion order.
    pub fn edges(&self) -> &[StageDependency] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Stage ids of a part, ordered by `(execution_order, id)`.
    pub fn stages_of(&self, part_id: &str) -> Vec<&str> {
        let mut ids: Vec<(&i32, &str)> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.part_id == part_id)
            .map(|(id, n)| (&n.execution_order, id.as_str()))
            .collect();
        ids.sort();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// Hard edges on which `requirement_id` waits.
    pub fn prerequisites_of(&self, requirement_id: &str) -> Vec<&StageDependency> {
        self.edges_from(&self.outgoing, requirement_id)
            .filter(|e| !e.optional)
            .collect()
    }

    /// Optional edges of `requirement_id`. Display only, never enforced.
    pub fn advisory_prerequisites_of(&self, requirement_id: &str) -> Vec<&StageDependency> {
        self.edges_from(&self.outgoing, requirement_id)
            .filter(|e| e.optional)
            .collect()
    }

    /// Hard edges waiting on `requirement_id`.
    pub fn dependents_of(&self, requirement_id: &str) -> Vec<&StageDependency> {
        self.edges_from(&self.incoming, requirement_id)
            .filter(|e| !e.optional)
            .collect()
    }

    fn edges_from<'a>(
        &'a self,
        index: &'a HashMap<String, Vec<usize>>,
        requirement_id: &str,
    ) -> impl Iterator<Item = &'a StageDependency> + 'a {
        index
            .get(requirement_id)
            .into_iter()
            .flatten()
            .map(move |&i| &self.edges[i])
    }

    /// Hard edges with both endpoints inside `part_id`.
    fn hard_edges_within<'a>(
        &'a self,
        part_id: &'a str,
    ) -> impl Iterator<Item = &'a StageDependency> + 'a {
        self.edges.iter().filter(move |e| {
            !e.optional
                && self.part_of(&e.dependent) == Some(part_id)
                && self.part_of(&e.prerequisite) == Some(part_id)
        })
    }

    /// Returns a linear extension of the part's hard dependencies.
    ///
    /// Every prerequisite appears before its dependents. Ties are broken by
    /// `(execution_order, id)`.
    ///
    /// # Errors
    /// [`CycleError`] carrying every edge of the first cycle found.
    pub fn topological_order(&self, part_id: &str) -> Result<Vec<String>, CycleError> {
        let stages = self.stages_of(part_id);

        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut in_degree: HashMap<&str, usize> = stages.iter().map(|&id| (id, 0)).collect();
        let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in self.hard_edges_within(part_id) {
            adjacency
                .entry(edge.dependent.as_str())
                .or_default()
                .push(edge.prerequisite.as_str());
            successors
                .entry(edge.prerequisite.as_str())
                .or_default()
                .push(edge.dependent.as_str());
            *in_degree.entry(edge.dependent.as_str()).or_insert(0) += 1;
        }

        if let Some(edges) = find_cycle(&stages, &adjacency) {
            return Err(CycleError {
                part_id: part_id.to_string(),
                edges,
            });
        }

        let rank = |id: &str| self.execution_order(id).unwrap_or(i32::MAX);
        let mut ready: BTreeSet<(i32, &str)> = in_degree
            .iter()
            .filter(|&(_, &d)| d == 0)
            .map(|(&id, _)| (rank(id), id))
            .collect();

        let mut order = Vec::with_capacity(stages.len());
        while let Some((_, id)) = ready.pop_first() {
            order.push(id.to_string());
            for &next in successors.get(id).into_iter().flatten() {
                if let Some(d) = in_degree.get_mut(next) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert((rank(next), next));
                    }
                }
            }
        }
        Ok(order)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// DFS over `adjacency` (dependent → prerequisites) from each root in order.
fn find_cycle(roots: &[&str], adjacency: &HashMap<&str, Vec<&str>>) -> Option<Vec<CycleEdge>> {
    let mut color: HashMap<&str, Color> = roots.iter().map(|&id| (id, Color::White)).collect();
    let mut path: Vec<&str> = Vec::new();

    for &root in roots {
        if color.get(root) == Some(&Color::White) {
            if let Some(cycle) = visit(root, adjacency, &mut color, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

fn visit<'a>(
    node: &'a str,
    adjacency: &HashMap<&'a str, Vec<&'a str>>,
    color: &mut HashMap<&'a str, Color>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<CycleEdge>> {
    color.insert(node, Color::Gray);
    path.push(node);

    for &next in adjacency.get(node).into_iter().flatten() {
        match color.get(next).copied().unwrap_or(Color::White) {
            Color::Gray => {
                // Back edge: the cycle is path[pos..] closed by node -> next.
                let pos = path.iter().position(|&p| p == next).unwrap_or(0);
                let mut edges: Vec<CycleEdge> = path[pos..]
                    .windows(2)
                    .map(|w| CycleEdge {
                        dependent: w[0].to_string(),
                        prerequisite: w[1].to_string(),
                    })
                    .collect();
                edges.push(CycleEdge {
                    dependent: node.to_string(),
                    prerequisite: next.to_string(),
                });
                return Some(edges);
            }
            Color::White => {
                if let Some(cycle) = visit(next, adjacency, color, path) {
                    return Some(cycle);
                }
            }
            Color::Black => {}
        }
    }

    path.pop();
    color.insert(node, Color::Black);
    None
}

/// Earliest-start bound a dependency imposes on its dependent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartBound {
    /// Dependent may not start before this instant.
    Start(i64),
    /// Dependent may not finish before this instant.
    Finish(i64),
}

impl StartBound {
    /// Converts to a start bound for a dependent lasting `duration_ms`.
    pub fn to_start(self, duration_ms: i64) -> i64 {
        match self {
            Self::Start(t) => t,
            Self::Finish(t) => t - duration_ms,
        }
    }
}

/// Bound imposed by a prerequisite occupying `prerequisite`.
///
/// | Type | Constraint |
/// |------|------------|
/// | FS | dependent.start ≥ prereq.end + lag |
/// | SS | dependent.start ≥ prereq.start + lag |
/// | FF | dependent.end ≥ prereq.end + lag |
/// | SF | dependent.end ≥ prereq.start + lag |
pub fn minimum_start(
    prerequisite: TimeWindow,
    dependency_type: DependencyType,
    lag_ms: i64,
) -> StartBound {
    match dependency_type {
        DependencyType::FinishToStart => StartBound::Start(prerequisite.end_ms + lag_ms),
        DependencyType::StartToStart => StartBound::Start(prerequisite.start_ms + lag_ms),
        DependencyType::FinishToFinish => StartBound::Finish(prerequisite.end_ms + lag_ms),
        DependencyType::StartToFinish => StartBound::Finish(prerequisite.start_ms + lag_ms),
    }
}
