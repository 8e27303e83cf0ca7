//! Trajectories: ordered operation sequences recorded for one task.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tandem_dag::OperationKind;
use tracing::debug;
use uuid::Uuid;

use crate::journal::OperationSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrajectoryId(pub Uuid);

impl TrajectoryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TrajectoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TrajectoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TrajectoryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrajectoryState {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trajectory {
    pub id: TrajectoryId,
    pub task: String,
    /// Set for agent-scoped trajectories, which only capture that agent's
    /// operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub operations: Vec<OperationSnapshot>,
    /// Number of `add_to_trajectory` calls, including empty ones.
    pub steps: u32,
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critique: Option<String>,
    pub reward: Option<f64>,
    pub state: TrajectoryState,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub auto_closed: bool,
    /// Journal sequence number of the last captured entry.
    #[serde(default)]
    pub cursor: u64,
}

impl Trajectory {
    pub fn open(
        task: impl Into<String>,
        agent_id: Option<String>,
        cursor: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TrajectoryId::new(),
            task: task.into(),
            agent_id,
            operations: Vec::new(),
            steps: 0,
            score: None,
            critique: None,
            reward: None,
            state: TrajectoryState::Open,
            started_at: now,
            last_activity: now,
            finalized_at: None,
            auto_closed: false,
            cursor,
        }
    }

    /// Ordered operation kinds, the input to pattern mining.
    pub fn signature(&self) -> Vec<OperationKind> {
        self.operations.iter().map(|op| op.kind).collect()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn is_open(&self) -> bool {
        self.state == TrajectoryState::Open
    }

    pub fn is_successful(&self, threshold: f64) -> bool {
        self.score.is_some_and(|s| s >= threshold)
    }

    pub fn is_stale(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        self.is_open() && now - self.last_activity >= timeout
    }

    /// Whether `op` belongs in this trajectory.
    pub fn captures(&self, op: &OperationSnapshot) -> bool {
        self.agent_id.as_deref().is_none_or(|agent| agent == op.agent_id)
    }

    pub(crate) fn close(
        &mut self,
        score: f64,
        critique: Option<String>,
        reward: f64,
        now: DateTime<Utc>,
    ) {
        self.score = Some(score);
        self.critique = critique;
        self.reward = Some(reward);
        self.state = TrajectoryState::Closed;
        self.finalized_at = Some(now);
        self.last_activity = now;
    }
}

/// Closed trajectories, oldest first, bounded by capacity.
#[derive(Debug)]
pub struct TrajectoryBuffer {
    entries: VecDeque<Trajectory>,
    capacity: usize,
}

impl TrajectoryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append a trajectory, returning the one evicted to make room.
    pub fn push(&mut self, trajectory: Trajectory) -> Option<Trajectory> {
        self.entries.push_back(trajectory);
        if self.entries.len() > self.capacity {
            let evicted = self.entries.pop_front();
            if let Some(t) = &evicted {
                debug!(trajectory = %t.id, "Trajectory buffer full, evicted oldest");
            }
            return evicted;
        }
        None
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Trajectory> + ExactSizeIterator {
        self.entries.iter()
    }

    pub fn get(&self, id: TrajectoryId) -> Option<&Trajectory> {
        self.entries.iter().find(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use tandem_dag::VertexId;

    use super::*;

    fn closed(task: &str) -> Trajectory {
        let now = Utc::now();
        let mut t = Trajectory::open(task, None, 0, now);
        t.close(1.0, None, 1.0, now);
        t
    }

    #[test]
    fn buffer_evicts_oldest_when_full() {
        let mut buffer = TrajectoryBuffer::new(2);
        let first = closed("one");
        let first_id = first.id;
        assert!(buffer.push(first).is_none());
        assert!(buffer.push(closed("two")).is_none());
        let evicted = buffer.push(closed("three")).unwrap();
        assert_eq!(evicted.id, first_id);
        assert_eq!(buffer.len(), 2);
        assert!(buffer.get(first_id).is_none());
    }

    #[test]
    fn agent_scoped_trajectory_filters_operations() {
        let t = Trajectory::open("task", Some("alpha".into()), 0, Utc::now());
        let op = |agent: &str| OperationSnapshot {
            vertex_id: VertexId(1),
            kind: OperationKind::Edit,
            agent_id: agent.into(),
            affected_files: BTreeSet::new(),
            timestamp: Utc::now(),
        };
        assert!(t.captures(&op("alpha")));
        assert!(!t.captures(&op("beta")));

        let shared = Trajectory::open("task", None, 0, Utc::now());
        assert!(shared.captures(&op("beta")));
    }

    #[test]
    fn staleness_is_measured_from_last_activity() {
        let start = Utc::now();
        let t = Trajectory::open("task", None, 0, start);
        let timeout = chrono::Duration::seconds(60);
        assert!(!t.is_stale(start + chrono::Duration::seconds(59), timeout));
        assert!(t.is_stale(start + chrono::Duration::seconds(60), timeout));
    }

    #[test]
    fn trajectory_id_parses_back() {
        let id = TrajectoryId::new();
        let parsed: TrajectoryId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
