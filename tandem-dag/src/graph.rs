//! Append-only coordination DAG.
//!
//! Vertices are stored in a petgraph `StableDiGraph` with edges pointing from
//! predecessor to successor. The graph keeps a bounded history: at most
//! `max_vertices` are retained (oldest evicted first), and every traversal
//! (distance, ancestry, conflict scans) only looks at the newest
//! `lookback_window` vertices, so each query costs O(window).

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use chrono::Utc;
use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::operation::{Operation, Vertex, VertexId};
use crate::{DEFAULT_LOOKBACK_WINDOW, DEFAULT_MAX_VERTICES, DagError};

/// Returned by [`CoordinationGraph::distance`] when no path exists inside the
/// lookback window.
pub const UNRELATED_DISTANCE: usize = usize::MAX;

/// Summary counters for status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStats {
    pub vertices: usize,
    pub tips: usize,
    pub edges: usize,
    pub lookback_window: usize,
    pub max_vertices: usize,
    pub oldest: Option<VertexId>,
    pub newest: Option<VertexId>,
}

#[derive(Debug)]
pub struct CoordinationGraph {
    graph: StableDiGraph<Vertex, ()>,
    index: HashMap<VertexId, NodeIndex>,
    /// Retained vertex ids in insertion order.
    order: VecDeque<VertexId>,
    tips: BTreeSet<VertexId>,
    next_id: i64,
    lookback_window: usize,
    max_vertices: usize,
}

impl Default for CoordinationGraph {
    fn default() -> Self {
        Self::empty(DEFAULT_LOOKBACK_WINDOW, DEFAULT_MAX_VERTICES)
    }
}

impl CoordinationGraph {
    /// Create an empty graph with custom bounds.
    pub fn with_limits(lookback_window: usize, max_vertices: usize) -> crate::Result<Self> {
        validate_limits(lookback_window, max_vertices)?;
        Ok(Self::empty(lookback_window, max_vertices))
    }

    fn empty(lookback_window: usize, max_vertices: usize) -> Self {
        Self {
            graph: StableDiGraph::new(),
            index: HashMap::new(),
            order: VecDeque::new(),
            tips: BTreeSet::new(),
            next_id: 1,
            lookback_window,
            max_vertices,
        }
    }

    /// Rebuild a graph from persisted vertices.
    ///
    /// Edges come from each vertex's predecessor set (predecessors that are
    /// no longer present are skipped). Tips are recomputed from the edges.
    /// `next_id` keeps ids monotonic across restarts even when the newest
    /// vertices were evicted before the snapshot was taken.
    pub fn restore(
        mut vertices: Vec<Vertex>,
        next_id: i64,
        lookback_window: usize,
        max_vertices: usize,
    ) -> crate::Result<Self> {
        validate_limits(lookback_window, max_vertices)?;
        let mut graph = Self::empty(lookback_window, max_vertices);

        vertices.sort_by_key(|v| v.id);
        vertices.dedup_by_key(|v| v.id);

        for vertex in vertices {
            let id = vertex.id;
            let predecessors = vertex.predecessors.clone();
            let node = graph.graph.add_node(vertex);
            for pred in &predecessors {
                if let Some(&pred_node) = graph.index.get(pred) {
                    graph.graph.add_edge(pred_node, node, ());
                }
            }
            graph.index.insert(id, node);
            graph.order.push_back(id);
        }

        graph.tips = graph
            .order
            .iter()
            .copied()
            .filter(|id| {
                graph.index.get(id).is_some_and(|&node| {
                    graph
                        .graph
                        .neighbors_directed(node, Direction::Outgoing)
                        .next()
                        .is_none()
                })
            })
            .collect();

        let newest = graph.order.back().map_or(0, |id| id.0);
        graph.next_id = next_id.max(newest + 1);
        graph.evict_overflow();
        Ok(graph)
    }

    // ── Mutation ───────────────────────────────────────────────────

    /// Insert an operation as a new vertex and return its id.
    ///
    /// Predecessors are the current tips that touch any of the operation's
    /// files; when none do, the most recent tip is used so the graph stays
    /// connected.
    pub fn register_vertex(&mut self, operation: Operation) -> crate::Result<VertexId> {
        let operation = operation.normalized();
        operation.validate()?;

        let predecessors = self.predecessors_for(&operation.affected_files);
        let id = VertexId(self.next_id);
        self.next_id += 1;

        let vertex = Vertex {
            id,
            kind: operation.kind,
            agent_id: operation.agent_id,
            affected_files: operation.affected_files,
            predecessors: predecessors.clone(),
            fingerprint: operation.fingerprint,
            created_at: Utc::now(),
        };

        let node = self.graph.add_node(vertex);
        for pred in &predecessors {
            if let Some(&pred_node) = self.index.get(pred) {
                self.graph.add_edge(pred_node, node, ());
            }
            self.tips.remove(pred);
        }
        self.index.insert(id, node);
        self.order.push_back(id);
        self.tips.insert(id);

        debug!(
            vertex = %id,
            predecessors = predecessors.len(),
            tips = self.tips.len(),
            "Registered vertex"
        );

        self.evict_overflow();
        Ok(id)
    }

    /// Predecessors a new vertex touching `files` would receive.
    pub fn predecessors_for(&self, files: &BTreeSet<String>) -> BTreeSet<VertexId> {
        let overlapping: BTreeSet<VertexId> = self
            .tips
            .iter()
            .copied()
            .filter(|tip| self.vertex(*tip).is_some_and(|v| v.touches_any(files)))
            .collect();

        if overlapping.is_empty() {
            self.tips.iter().next_back().copied().into_iter().collect()
        } else {
            overlapping
        }
    }

    fn evict_overflow(&mut self) {
        while self.order.len() > self.max_vertices {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if let Some(node) = self.index.remove(&oldest) {
                self.graph.remove_node(node);
            }
            self.tips.remove(&oldest);
            debug!(vertex = %oldest, "Evicted vertex beyond retention bound");
        }
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Current frontier, ascending.
    pub fn tips(&self) -> Vec<VertexId> {
        self.tips.iter().copied().collect()
    }

    pub fn vertex(&self, id: VertexId) -> Option<&Vertex> {
        self.index.get(&id).map(|&node| &self.graph[node])
    }

    pub fn contains(&self, id: VertexId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn lookback_window(&self) -> usize {
        self.lookback_window
    }

    /// The id the next inserted vertex will receive.
    pub fn next_id(&self) -> i64 {
        self.next_id
    }

    /// Direct successors of a vertex, ascending.
    pub fn successors(&self, id: VertexId) -> Vec<VertexId> {
        let Some(&node) = self.index.get(&id) else {
            return Vec::new();
        };
        let mut out: Vec<VertexId> = self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .map(|n| self.graph[n].id)
            .collect();
        out.sort_unstable();
        out
    }

    /// Vertices inside the lookback window, newest first.
    pub fn window_vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.order
            .iter()
            .rev()
            .take(self.lookback_window)
            .filter_map(|id| self.vertex(*id))
    }

    /// All retained vertices in insertion order.
    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.order.iter().filter_map(|id| self.vertex(*id))
    }

    fn in_window(&self, id: VertexId) -> bool {
        let window = i64::try_from(self.lookback_window).unwrap_or(i64::MAX);
        let floor = (self.next_id - 1).saturating_sub(window);
        id.0 > floor && self.index.contains_key(&id)
    }

    /// Undirected hop count between two vertices, searching only the
    /// lookback window. Returns [`UNRELATED_DISTANCE`] when no such path
    /// exists (including when either vertex is outside the window).
    pub fn distance(&self, a: VertexId, b: VertexId) -> usize {
        if a == b {
            return 0;
        }
        self.bounded_distance(a, b).unwrap_or(UNRELATED_DISTANCE)
    }

    fn bounded_distance(&self, a: VertexId, b: VertexId) -> Option<usize> {
        if !self.in_window(a) || !self.in_window(b) {
            return None;
        }
        let start = *self.index.get(&a)?;
        let goal = *self.index.get(&b)?;

        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([(start, 0usize)]);
        while let Some((node, hops)) = queue.pop_front() {
            for next in self.graph.neighbors_undirected(node) {
                if next == goal {
                    return Some(hops + 1);
                }
                if self.in_window(self.graph[next].id) && seen.insert(next) {
                    queue.push_back((next, hops + 1));
                }
            }
        }
        None
    }

    /// True iff `a` is reachable from `b` by following predecessor edges
    /// inside the lookback window. A vertex is never its own ancestor.
    pub fn is_ancestor(&self, a: VertexId, b: VertexId) -> bool {
        // Predecessors always carry smaller ids than their successors.
        if a >= b || !self.in_window(a) || !self.in_window(b) {
            return false;
        }
        let (Some(&start), Some(&goal)) = (self.index.get(&b), self.index.get(&a)) else {
            return false;
        };

        let mut seen = HashSet::from([start]);
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            for pred in self.graph.neighbors_directed(node, Direction::Incoming) {
                if pred == goal {
                    return true;
                }
                let pred_id = self.graph[pred].id;
                if pred_id > a && self.in_window(pred_id) && seen.insert(pred) {
                    stack.push(pred);
                }
            }
        }
        false
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            vertices: self.order.len(),
            tips: self.tips.len(),
            edges: self.graph.edge_count(),
            lookback_window: self.lookback_window,
            max_vertices: self.max_vertices,
            oldest: self.order.front().copied(),
            newest: self.order.back().copied(),
        }
    }
}

fn validate_limits(lookback_window: usize, max_vertices: usize) -> crate::Result<()> {
    if lookback_window == 0 {
        return Err(DagError::InvalidSettings(
            "lookback window must be at least 1".to_string(),
        ));
    }
    if max_vertices < lookback_window {
        return Err(DagError::InvalidSettings(format!(
            "max_vertices ({max_vertices}) must be >= lookback window ({lookback_window})"
        )));
    }
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────
