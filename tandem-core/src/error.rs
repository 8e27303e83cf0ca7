/// Top-level Tandem error type.
///
/// All fallible operations in `tandem-core` return [`Result<T, TandemError>`](Result).
/// Each variant wraps a store-specific error enum, so callers can match on
/// the failing store without losing type information.
#[derive(thiserror::Error, Debug)]
pub enum TandemError {
    /// Rejected by the coordination graph (invalid operation, bad limits).
    #[error("Graph error: {0}")]
    Graph(#[from] tandem_dag::DagError),

    /// Rejected by the agent registry.
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    /// Trajectory state-machine violation or invalid learning input.
    #[error("Learning error: {0}")]
    Learning(#[from] LearningError),

    /// Error from the snapshot persistence layer.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Error in configuration parsing or validation.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl TandemError {
    /// True for input the caller can fix (as opposed to store or config
    /// failures).
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Graph(_) | Self::Agent(_) | Self::Learning(_))
    }
}

/// Errors from the agent registry.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// Agent id is blank.
    #[error("Invalid operation: agent id must not be empty")]
    InvalidId,

    /// The id is already registered with a different capability set.
    #[error("Duplicate agent: {agent_id} is already registered with different capabilities")]
    Duplicate { agent_id: String },

    /// Registration is required and the agent is unknown.
    #[error("Invalid operation: agent {agent_id} is not registered")]
    Unregistered { agent_id: String },
}

/// Errors from the trajectory recorder.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LearningError {
    /// `start_trajectory` while another trajectory is open.
    #[error("Trajectory already open: {id}")]
    AlreadyOpen { id: String },

    /// `add_to_trajectory` / `finalize_trajectory` with nothing open.
    #[error("No trajectory is open")]
    NotOpen,

    /// Task description is blank.
    #[error("Invalid operation: task must not be empty")]
    InvalidTask,

    /// Score is NaN or outside [0, 1].
    #[error("Invalid operation: score must be within [0, 1], got {0}")]
    InvalidScore(String),
}

/// Errors from the SQLite-backed snapshot store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Underlying `SQLite` operation failed.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Stored schema version is newer than this build understands.
    #[error("Migration failed: {0}")]
    Migration(String),

    /// JSON serialization/deserialization of a record failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The persistence collaborator did not answer in time.
    #[error("Persistence timed out after {0} ms")]
    Timeout(u64),

    /// The blocking persistence task panicked or was cancelled.
    #[error("Persistence task failed: {0}")]
    Task(String),
}

/// Errors in Tandem configuration parsing and validation.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Config file not readable: {0}")]
    NotFound(String),

    /// Configuration values are present but semantically invalid.
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Configuration file syntax could not be parsed (TOML error).
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Convenience alias for `Result<T, TandemError>`.
pub type Result<T> = std::result::Result<T, TandemError>;
