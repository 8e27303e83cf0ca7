pub mod schema;
pub mod sqlite;
pub mod traits;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tandem_dag::Vertex;

use crate::agents::AgentRecord;
use crate::journal::JournalEntry;
use crate::learn::{Pattern, Trajectory};

pub use sqlite::SqliteStore;
pub use traits::SnapshotStore;

/// Everything needed to rebuild a `CoordinationStore`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinationSnapshot {
    pub vertices: Vec<Vertex>,
    pub next_vertex_id: i64,
    pub agents: Vec<AgentRecord>,
    pub journal: Vec<JournalEntry>,
    pub journal_head: u64,
    pub open_trajectory: Option<Trajectory>,
    /// Closed trajectories, oldest first.
    pub trajectories: Vec<Trajectory>,
    pub patterns: Vec<Pattern>,
    pub saved_at: Option<DateTime<Utc>>,
}
