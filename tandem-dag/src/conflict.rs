//! Conflict classification for a candidate operation against the recent
//! window of the coordination graph.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::graph::{CoordinationGraph, UNRELATED_DISTANCE};
use crate::operation::{Operation, VertexId, normalize_agent_id};

/// Distances strictly below this are high severity.
pub const HIGH_SEVERITY_DISTANCE: usize = 5;
/// Distances strictly below this (and not high) are medium severity.
pub const MEDIUM_SEVERITY_DISTANCE: usize = 20;

// ── Severity ───────────────────────────────────────────────────────

/// Conflict urgency, serialized as 1 (low) to 3 (high).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Severity {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl Severity {
    /// Closer operations conflict more severely.
    pub fn from_distance(distance: usize) -> Self {
        if distance < HIGH_SEVERITY_DISTANCE {
            Self::High
        } else if distance < MEDIUM_SEVERITY_DISTANCE {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn level(self) -> u8 {
        self as u8
    }
}

impl From<Severity> for u8 {
    fn from(severity: Severity) -> Self {
        severity.level()
    }
}

impl TryFrom<u8> for Severity {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            1 => Ok(Self::Low),
            2 => Ok(Self::Medium),
            3 => Ok(Self::High),
            other => Err(format!("severity must be 1, 2 or 3, got {other}")),
        }
    }
}

// ── Resolution strategy ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// The other operation is already behind the candidate's base.
    AutoMerge,
    /// Close concurrent edits; a human or agent must reconcile them.
    ManualResolution,
    /// Distant overlap; run the operations one after the other.
    SequentialExecution,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoMerge => "auto_merge",
            Self::ManualResolution => "manual_resolution",
            Self::SequentialExecution => "sequential_execution",
        }
    }
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Conflicts ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    /// The candidate vertex, or `None` for a proposal that was never inserted.
    pub op_a: Option<VertexId>,
    pub op_b: VertexId,
    /// `[candidate agent, other agent]`.
    pub agents: Vec<String>,
    pub conflicting_files: Vec<String>,
    pub severity: Severity,
    pub dag_distance: usize,
    pub is_ancestor: bool,
    pub resolution_strategy: ResolutionStrategy,
    pub description: String,
}

/// What to check: an operation already in the graph, or one about to be
/// registered.
#[derive(Debug, Clone)]
pub enum ConflictCandidate {
    Registered(VertexId),
    Proposed(Operation),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    pub conflicts: Vec<Conflict>,
    /// Vertices that were referenced but could not be found (unknown or
    /// evicted). Each is treated as "no conflict".
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_vertices: Vec<VertexId>,
}

impl ConflictReport {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.conflicts.iter().map(|c| c.severity).max()
    }
}

/// Classify every overlapping operation by another agent inside the
/// lookback window.
///
/// For a registered candidate the distance is measured from the candidate
/// vertex itself; for a proposal it is one hop past the predecessors the
/// graph would assign on insertion. Never fails: unknown vertices end up in
/// [`ConflictReport::missing_vertices`].
pub fn check_conflicts(graph: &CoordinationGraph, candidate: &ConflictCandidate) -> ConflictReport {
    let mut report = ConflictReport::default();

    let (candidate_id, agent_id, files, anchors) = match candidate {
        ConflictCandidate::Registered(id) => {
            let Some(vertex) = graph.vertex(*id) else {
                debug!(vertex = %id, "Conflict check for unknown vertex");
                report.missing_vertices.push(*id);
                return report;
            };
            (
                Some(vertex.id),
                vertex.agent_id.as_str(),
                &vertex.affected_files,
                vertex.predecessors.clone(),
            )
        }
        ConflictCandidate::Proposed(op) => (
            None,
            normalize_agent_id(&op.agent_id),
            &op.affected_files,
            graph.predecessors_for(&op.affected_files),
        ),
    };

    if files.is_empty() {
        return report;
    }

    let live_anchors: BTreeSet<VertexId> = anchors
        .into_iter()
        .filter(|anchor| {
            let present = graph.contains(*anchor);
            if !present {
                report.missing_vertices.push(*anchor);
            }
            present
        })
        .collect();

    for other in graph.window_vertices() {
        if Some(other.id) == candidate_id || other.agent_id == agent_id {
            continue;
        }
        let shared = other.overlapping_files(files);
        if shared.is_empty() {
            continue;
        }

        let distance = match candidate_id {
            Some(id) => graph.distance(id, other.id),
            None => live_anchors
                .iter()
                .map(|anchor| graph.distance(*anchor, other.id))
                .min()
                .map_or(UNRELATED_DISTANCE, |d| d.saturating_add(1)),
        };
        let is_ancestor = live_anchors
            .iter()
            .any(|anchor| graph.is_ancestor(other.id, *anchor));
        let severity = Severity::from_distance(distance);
        let resolution_strategy = if is_ancestor {
            ResolutionStrategy::AutoMerge
        } else if distance < HIGH_SEVERITY_DISTANCE {
            ResolutionStrategy::ManualResolution
        } else {
            ResolutionStrategy::SequentialExecution
        };

        let description = describe(
            &other.agent_id,
            other.kind.as_str(),
            &shared,
            distance,
            resolution_strategy,
        );

        report.conflicts.push(Conflict {
            op_a: candidate_id,
            op_b: other.id,
            agents: vec![agent_id.to_string(), other.agent_id.clone()],
            conflicting_files: shared,
            severity,
            dag_distance: distance,
            is_ancestor,
            resolution_strategy,
            description,
        });
    }

    report.conflicts.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then(a.dag_distance.cmp(&b.dag_distance))
            .then(a.op_b.cmp(&b.op_b))
    });

    debug!(
        agent = agent_id,
        conflicts = report.conflicts.len(),
        missing = report.missing_vertices.len(),
        "Conflict check complete"
    );
    report
}

fn describe(
    other_agent: &str,
    other_kind: &str,
    shared: &[String],
    distance: usize,
    strategy: ResolutionStrategy,
) -> String {
    let noun = if shared.len() == 1 { "file" } else { "files" };
    let files = shared.join(", ");
    let proximity = if distance == UNRELATED_DISTANCE {
        "outside the lookback window".to_string()
    } else {
        format!("{distance} step(s) away")
    };
    let advice = match strategy {
        ResolutionStrategy::AutoMerge => "already integrated upstream, safe to merge",
        ResolutionStrategy::ManualResolution => "concurrent edit, reconcile manually",
        ResolutionStrategy::SequentialExecution => "run after the other operation completes",
    };
    format!("Agent '{other_agent}' ran {other_kind} on {noun} {files} ({proximity}); {advice}")
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationKind;

    fn edit(agent: &str, files: &[&str]) -> Operation {
        Operation::new(OperationKind::Edit, agent, files.iter().copied())
    }

    #[test]
    fn severity_bands() {
        assert_eq!(Severity::from_distance(0), Severity::High);
        assert_eq!(Severity::from_distance(4), Severity::High);
        assert_eq!(Severity::from_distance(5), Severity::Medium);
        assert_eq!(Severity::from_distance(19), Severity::Medium);
        assert_eq!(Severity::from_distance(20), Severity::Low);
        assert_eq!(Severity::from_distance(UNRELATED_DISTANCE), Severity::Low);
    }

    #[test]
    fn severity_never_increases_with_distance() {
        let mut previous = Severity::High;
        for distance in 0..200 {
            let severity = Severity::from_distance(distance);
            assert!(severity <= previous, "distance {distance}");
            previous = severity;
        }
    }

    #[test]
    fn severity_serializes_as_number() {
        assert_eq!(serde_json::to_string(&Severity::High).unwrap(), "3");
        let back: Severity = serde_json::from_str("1").unwrap();
        assert_eq!(back, Severity::Low);
        assert!(serde_json::from_str::<Severity>("4").is_err());
    }

    #[test]
    fn adjacent_edits_by_two_agents_need_manual_resolution() {
        let mut graph = CoordinationGraph::default();
        let first = graph.register_vertex(edit("agent-a", &["a.txt"])).unwrap();
        let second = graph.register_vertex(edit("agent-b", &["a.txt"])).unwrap();

        let report = check_conflicts(&graph, &ConflictCandidate::Registered(second));
        assert_eq!(report.conflicts.len(), 1);
        let conflict = &report.conflicts[0];
        assert_eq!(conflict.op_a, Some(second));
        assert_eq!(conflict.op_b, first);
        assert_eq!(conflict.dag_distance, 1);
        assert_eq!(conflict.severity, Severity::High);
        assert!(!conflict.is_ancestor);
        assert_eq!(conflict.resolution_strategy, ResolutionStrategy::ManualResolution);
        assert_eq!(conflict.conflicting_files, vec!["a.txt".to_string()]);
        assert_eq!(conflict.agents, vec!["agent-b".to_string(), "agent-a".to_string()]);
    }

    #[test]
    fn older_integrated_work_auto_merges() {
        let mut graph = CoordinationGraph::default();
        let base = graph.register_vertex(edit("agent-a", &["a.txt"])).unwrap();
        graph.register_vertex(edit("agent-c", &["b.txt"])).unwrap();
        let mine = graph.register_vertex(edit("agent-b", &["a.txt"])).unwrap();

        let report = check_conflicts(&graph, &ConflictCandidate::Registered(mine));
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].op_b, base);
        assert!(report.conflicts[0].is_ancestor);
        assert_eq!(report.conflicts[0].resolution_strategy, ResolutionStrategy::AutoMerge);
    }

    #[test]
    fn distant_overlap_is_sequential_and_low() {
        let mut graph = CoordinationGraph::default();
        let old = graph.register_vertex(edit("agent-a", &["shared.rs"])).unwrap();
        for i in 0..25 {
            graph
                .register_vertex(edit("agent-a", &[format!("own-{i}.rs").as_str()]))
                .unwrap();
        }
        let proposal = edit("agent-b", &["shared.rs"]);
        let report = check_conflicts(&graph, &ConflictCandidate::Proposed(proposal));
        let conflict = report.conflicts.iter().find(|c| c.op_b == old).unwrap();
        assert_eq!(conflict.op_a, None);
        assert_eq!(conflict.dag_distance, 26);
        assert_eq!(conflict.severity, Severity::Low);
        // old is an ancestor of the proposal's base, so the merge is automatic.
        assert_eq!(conflict.resolution_strategy, ResolutionStrategy::AutoMerge);
    }

    #[test]
    fn same_agent_never_conflicts() {
        let mut graph = CoordinationGraph::default();
        graph.register_vertex(edit("agent-a", &["a.txt"])).unwrap();
        let again = graph.register_vertex(edit("agent-a", &["a.txt"])).unwrap();
        let report = check_conflicts(&graph, &ConflictCandidate::Registered(again));
        assert!(report.is_clean());
    }

    #[test]
    fn padded_agent_id_is_the_same_agent() {
        let mut graph = CoordinationGraph::default();
        graph.register_vertex(edit("alpha", &["a.txt"])).unwrap();

        let mut raw = edit("alpha", &["a.txt"]);
        raw.agent_id = "alpha ".to_string();
        let report = check_conflicts(&graph, &ConflictCandidate::Proposed(raw.clone()));
        assert!(report.is_clean());

        let id = graph.register_vertex(raw).unwrap();
        assert_eq!(graph.vertex(id).unwrap().agent_id, "alpha");
        assert!(check_conflicts(&graph, &ConflictCandidate::Registered(id)).is_clean());
    }

    #[test]
    fn empty_file_set_never_conflicts() {
        let mut graph = CoordinationGraph::default();
        graph.register_vertex(edit("agent-a", &["a.txt"])).unwrap();
        let report = check_conflicts(
            &graph,
            &ConflictCandidate::Proposed(edit("agent-b", &[])),
        );
        assert!(report.is_clean());
        assert!(report.missing_vertices.is_empty());
    }

    #[test]
    fn unknown_candidate_degrades_to_no_conflict() {
        let mut graph = CoordinationGraph::default();
        graph.register_vertex(edit("agent-a", &["a.txt"])).unwrap();
        let report = check_conflicts(&graph, &ConflictCandidate::Registered(VertexId(42)));
        assert!(report.is_clean());
        assert_eq!(report.missing_vertices, vec![VertexId(42)]);
    }

    #[test]
    fn proposal_next_to_tip_is_high_severity() {
        let mut graph = CoordinationGraph::default();
        let tip = graph.register_vertex(edit("agent-a", &["a.txt"])).unwrap();
        let report = check_conflicts(
            &graph,
            &ConflictCandidate::Proposed(edit("agent-b", &["a.txt", "b.txt"])),
        );
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].op_b, tip);
        assert_eq!(report.conflicts[0].dag_distance, 1);
        assert_eq!(report.conflicts[0].severity, Severity::High);
        assert_eq!(
            report.conflicts[0].resolution_strategy,
            ResolutionStrategy::ManualResolution
        );
    }

    #[test]
    fn results_are_sorted_by_severity_then_distance() {
        let mut graph = CoordinationGraph::default();
        graph.register_vertex(edit("agent-a", &["a.txt"])).unwrap();
        for i in 0..8 {
            graph
                .register_vertex(edit("agent-c", &[format!("pad-{i}.rs").as_str()]))
                .unwrap();
        }
        graph.register_vertex(edit("agent-d", &["a.txt"])).unwrap();
        graph.register_vertex(edit("agent-e", &["a.txt"])).unwrap();

        let report = check_conflicts(
            &graph,
            &ConflictCandidate::Proposed(edit("agent-b", &["a.txt"])),
        );
        assert_eq!(report.conflicts.len(), 3);
        let distances: Vec<usize> = report.conflicts.iter().map(|c| c.dag_distance).collect();
        assert_eq!(distances, vec![1, 2, 11]);
        assert_eq!(report.highest_severity(), Some(Severity::High));
        assert!(
            report
                .conflicts
                .windows(2)
                .all(|w| w[0].severity >= w[1].severity)
        );
    }

    #[test]
    fn conflict_json_uses_camel_case() {
        let mut graph = CoordinationGraph::default();
        graph.register_vertex(edit("agent-a", &["a.txt"])).unwrap();
        let b = graph.register_vertex(edit("agent-b", &["a.txt"])).unwrap();
        let report = check_conflicts(&graph, &ConflictCandidate::Registered(b));
        let json = serde_json::to_value(&report).unwrap();
        let conflict = &json["conflicts"][0];
        assert_eq!(conflict["severity"], 3);
        assert_eq!(conflict["resolutionStrategy"], "manual_resolution");
        assert_eq!(conflict["dagDistance"], 1);
        assert_eq!(conflict["opA"], 2);
        assert_eq!(conflict["conflictingFiles"][0], "a.txt");
        assert!(json.get("missingVertices").is_none());
    }
}
