pub mod conflict;
pub mod graph;
pub mod operation;

pub use conflict::{
    Conflict, ConflictCandidate, ConflictReport, ResolutionStrategy, Severity, check_conflicts,
};
pub use graph::{CoordinationGraph, GraphStats, UNRELATED_DISTANCE};
pub use operation::{Operation, OperationKind, Vertex, VertexId, normalize_agent_id};

/// Error type for the coordination graph.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DagError {
    /// The operation was rejected before any side effect (blank agent id,
    /// malformed file entry).
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Graph settings are out of range (zero window, retention below window).
    #[error("Invalid graph settings: {0}")]
    InvalidSettings(String),
}

pub type Result<T> = std::result::Result<T, DagError>;

// ── Window defaults ────────────────────────────────────────────────

/// Number of most recent vertices that distance, ancestry and conflict
/// queries look at.
pub const DEFAULT_LOOKBACK_WINDOW: usize = 100;

/// Number of vertices retained before the oldest is evicted.
pub const DEFAULT_MAX_VERTICES: usize = 1000;
