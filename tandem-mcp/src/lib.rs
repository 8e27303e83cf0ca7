// Tandem MCP server: exposes multi-agent coordination as MCP tools.
//
// Tools:
//   tandem_register_operation / tandem_check_conflicts: coordination graph
//   tandem_register_agent / tandem_list_agents / tandem_deregister_agent
//   tandem_start_trajectory / tandem_add_to_trajectory / tandem_finalize_trajectory
//   tandem_get_suggestion / tandem_get_patterns / tandem_query_trajectories
//   tandem_get_learning_stats / tandem_reset_learning
//   tandem_get_tips / tandem_get_stats / tandem_verify_proof

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{ServerCapabilities, ServerInfo};
use rmcp::{ServerHandler, ServiceExt, schemars, tool, tool_handler, tool_router};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use tandem_core::CoordinationStore;
use tandem_core::config::TandemConfig;
use tandem_core::store::{SnapshotStore, SqliteStore};
use tandem_dag::{ConflictCandidate, Operation, OperationKind, VertexId};

/// Workspace directory holding `config.toml` and `tandem.db`.
pub const TANDEM_DIR: &str = ".tandem";
pub const DB_FILE: &str = "tandem.db";
pub const CONFIG_FILE: &str = "config.toml";

const DEFAULT_QUERY_LIMIT: usize = 10;
/// Upper bound on how often the stale-trajectory sweeper runs.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// ── Tool parameter types ──────────────────────────────────────────

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct OperationParams {
    #[schemars(
        description = "Operation type: commit, describe, new, abandon, edit, merge, branch, bookmark, rebase, resolve, restore, status, log, diff, show, config (anything else is recorded as unknown)"
    )]
    pub operation_type: String,
    #[schemars(description = "Id of the agent performing the operation")]
    pub agent_id: String,
    #[schemars(description = "Files the operation touches (omit for metadata-only operations)")]
    pub affected_files: Option<Vec<String>>,
}

impl OperationParams {
    fn into_operation(self) -> Operation {
        Operation::new(
            OperationKind::parse(&self.operation_type),
            self.agent_id,
            self.affected_files.unwrap_or_default(),
        )
    }
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CheckConflictsParams {
    #[schemars(description = "Id of an already registered vertex to check")]
    pub vertex_id: Option<i64>,
    #[schemars(description = "Proposed operation to check without registering it")]
    pub operation: Option<OperationParams>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct RegisterAgentParams {
    #[schemars(description = "Unique agent id")]
    pub agent_id: String,
    #[schemars(description = "Capabilities the agent advertises")]
    pub capabilities: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct AgentIdParams {
    #[schemars(description = "Agent id")]
    pub agent_id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct StartTrajectoryParams {
    #[schemars(description = "Task description, used for similarity matching")]
    pub task: String,
    #[schemars(description = "Only capture this agent's operations (omit to capture every agent)")]
    pub agent_id: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct FinalizeParams {
    #[schemars(description = "Success score in [0, 1]; >= 0.7 counts as a success")]
    pub score: f64,
    #[schemars(description = "Optional free-text critique of the run")]
    pub critique: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct TaskParams {
    #[schemars(description = "Task description")]
    pub task: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct QueryTrajectoriesParams {
    #[schemars(description = "Task description to compare against")]
    pub task: String,
    #[schemars(description = "Maximum trajectories to return (default: 10)")]
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct PatternsParams {
    #[schemars(description = "Maximum patterns to return, highest confidence first (omit for all)")]
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct VertexParams {
    #[schemars(description = "Vertex id")]
    pub vertex_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProofVerdict {
    vertex_id: VertexId,
    verified: bool,
}

// ── Server struct ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TandemMcpServer {
    store: Arc<CoordinationStore>,
    /// Snapshot target; state is saved after every mutating tool call.
    snapshots: Option<Arc<dyn SnapshotStore>>,
    tool_router: ToolRouter<Self>,
}

impl TandemMcpServer {
    /// Create a server over an in-memory store with no persistence.
    pub fn new(store: CoordinationStore) -> Self {
        Self::from_shared(Arc::new(store), None)
    }

    pub fn from_shared(
        store: Arc<CoordinationStore>,
        snapshots: Option<Arc<dyn SnapshotStore>>,
    ) -> Self {
        Self {
            store,
            snapshots,
            tool_router: Self::tool_router(),
        }
    }

    /// Restore state from a workspace database and persist back to it.
    pub async fn open(config: TandemConfig, db_path: &Path) -> Result<Self, ServeError> {
        let db: Arc<dyn SnapshotStore> = Arc::new(SqliteStore::open(db_path)?);
        let store = CoordinationStore::restore(config, Arc::clone(&db)).await?;
        Ok(Self::from_shared(Arc::new(store), Some(db)))
    }

    pub fn store(&self) -> &Arc<CoordinationStore> {
        &self.store
    }
}

// ── Tool implementations ──────────────────────────────────────────

#[tool_router]
impl TandemMcpServer {
    #[tool(
        name = "tandem_register_operation",
        description = "Record an agent operation in the coordination graph. Returns the new vertex id, current tips, and conflicts with recent work by other agents."
    )]
    async fn register_operation(&self, Parameters(params): Parameters<OperationParams>) -> String {
        reply(self.do_register_operation(params).await)
    }

    #[tool(
        name = "tandem_check_conflicts",
        description = "Check a registered vertex (vertex_id) or a proposed operation (operation) for conflicts with other agents' recent work. Use before touching shared files."
    )]
    async fn check_conflicts(
        &self,
        Parameters(params): Parameters<CheckConflictsParams>,
    ) -> String {
        reply(self.do_check_conflicts(params))
    }

    #[tool(
        name = "tandem_register_agent",
        description = "Register an agent and its capabilities. Re-registering with the same capabilities is a no-op."
    )]
    async fn register_agent(&self, Parameters(params): Parameters<RegisterAgentParams>) -> String {
        reply(self.do_register_agent(params).await)
    }

    #[tool(name = "tandem_list_agents", description = "List registered agents.")]
    async fn list_agents(&self) -> String {
        reply(to_json(&self.store.list_agents()))
    }

    #[tool(
        name = "tandem_deregister_agent",
        description = "Remove an agent from the registry. Its past operations stay in the graph."
    )]
    async fn deregister_agent(&self, Parameters(params): Parameters<AgentIdParams>) -> String {
        reply(self.do_deregister_agent(params).await)
    }

    #[tool(
        name = "tandem_start_trajectory",
        description = "Start recording a trajectory for a task. Fails if one is already open."
    )]
    async fn start_trajectory(
        &self,
        Parameters(params): Parameters<StartTrajectoryParams>,
    ) -> String {
        reply(self.do_start_trajectory(params).await)
    }

    #[tool(
        name = "tandem_add_to_trajectory",
        description = "Append the operations registered since the last step to the open trajectory."
    )]
    async fn add_to_trajectory(&self) -> String {
        reply(self.do_add_to_trajectory().await)
    }

    #[tool(
        name = "tandem_finalize_trajectory",
        description = "Close the open trajectory with a success score and mine patterns from it."
    )]
    async fn finalize_trajectory(&self, Parameters(params): Parameters<FinalizeParams>) -> String {
        reply(self.do_finalize_trajectory(params).await)
    }

    #[tool(
        name = "tandem_get_suggestion",
        description = "Suggest an operation sequence for a task, based on patterns from similar past trajectories."
    )]
    async fn get_suggestion(&self, Parameters(params): Parameters<TaskParams>) -> String {
        reply(to_json(&self.store.get_suggestion(&params.task)))
    }

    #[tool(
        name = "tandem_get_learning_stats",
        description = "Trajectory and pattern counts, average reward, and improvement rate."
    )]
    async fn get_learning_stats(&self) -> String {
        reply(to_json(&self.store.get_learning_stats()))
    }

    #[tool(
        name = "tandem_get_patterns",
        description = "Mined operation patterns, highest confidence first."
    )]
    async fn get_patterns(&self, Parameters(params): Parameters<PatternsParams>) -> String {
        reply(self.do_get_patterns(&params))
    }

    #[tool(
        name = "tandem_query_trajectories",
        description = "Past trajectories for similar tasks, most similar first."
    )]
    async fn query_trajectories(
        &self,
        Parameters(params): Parameters<QueryTrajectoriesParams>,
    ) -> String {
        reply(self.do_query_trajectories(&params))
    }

    #[tool(
        name = "tandem_reset_learning",
        description = "Forget every trajectory and pattern. The coordination graph is kept."
    )]
    async fn reset_learning(&self) -> String {
        reply(self.do_reset_learning().await)
    }

    #[tool(
        name = "tandem_get_tips",
        description = "Current frontier of the coordination graph (vertices with no successor)."
    )]
    async fn get_tips(&self) -> String {
        reply(to_json(&serde_json::json!({ "tips": self.store.get_tips() })))
    }

    #[tool(
        name = "tandem_get_stats",
        description = "Counters for the graph, agents, journal, and learning stores."
    )]
    async fn get_stats(&self) -> String {
        reply(to_json(&self.store.get_stats()))
    }

    #[tool(
        name = "tandem_verify_proof",
        description = "Verify the proof attached to a vertex. Returns verified=false for unknown vertices or missing proofs."
    )]
    async fn verify_proof(&self, Parameters(params): Parameters<VertexParams>) -> String {
        reply(self.do_verify_proof(params).await)
    }
}

#[tool_handler]
impl ServerHandler for TandemMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Tandem MCP server: coordination for concurrent agents sharing a repository. \
                 Register each operation with tandem_register_operation and act on the returned \
                 conflicts; use tandem_check_conflicts before touching shared files. Record task \
                 runs with tandem_start_trajectory / tandem_add_to_trajectory / \
                 tandem_finalize_trajectory, then ask tandem_get_suggestion for similar tasks."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

// ── Tool logic (separated for testability) ────────────────────────

impl TandemMcpServer {
    async fn do_register_operation(&self, params: OperationParams) -> Result<String, String> {
        let receipt = self
            .store
            .register_operation(params.into_operation())
            .map_err(|e| e.to_string())?;
        self.persist().await?;
        to_json(&receipt)
    }

    fn do_check_conflicts(&self, params: CheckConflictsParams) -> Result<String, String> {
        let candidate = match (params.vertex_id, params.operation) {
            (Some(id), None) => ConflictCandidate::Registered(VertexId(id)),
            (None, Some(op)) => {
                let operation = op.into_operation();
                operation.validate().map_err(|e| e.to_string())?;
                ConflictCandidate::Proposed(operation)
            }
            (Some(_), Some(_)) => {
                return Err("Pass either vertex_id or operation, not both".to_string());
            }
            (None, None) => return Err("Pass vertex_id or operation".to_string()),
        };
        to_json(&self.store.check_conflicts(&candidate))
    }

    async fn do_register_agent(&self, params: RegisterAgentParams) -> Result<String, String> {
        let record = self
            .store
            .register_agent(&params.agent_id, &params.capabilities.unwrap_or_default())
            .map_err(|e| e.to_string())?;
        self.persist().await?;
        to_json(&record)
    }

    async fn do_deregister_agent(&self, params: AgentIdParams) -> Result<String, String> {
        let removed = self.store.deregister_agent(&params.agent_id);
        if removed {
            self.persist().await?;
        }
        to_json(&serde_json::json!({ "agentId": params.agent_id, "removed": removed }))
    }

    async fn do_start_trajectory(&self, params: StartTrajectoryParams) -> Result<String, String> {
        let id = match params.agent_id.as_deref() {
            Some(agent) => self.store.start_agent_trajectory(&params.task, agent),
            None => self.store.start_trajectory(&params.task),
        }
        .map_err(|e| e.to_string())?;
        self.persist().await?;
        to_json(&serde_json::json!({ "trajectoryId": id, "task": params.task.trim() }))
    }

    async fn do_add_to_trajectory(&self) -> Result<String, String> {
        let step = self.store.add_to_trajectory().map_err(|e| e.to_string())?;
        self.persist().await?;
        to_json(&step)
    }

    async fn do_finalize_trajectory(&self, params: FinalizeParams) -> Result<String, String> {
        let trajectory = self
            .store
            .finalize_trajectory(params.score, params.critique)
            .map_err(|e| e.to_string())?;
        self.persist().await?;
        to_json(&trajectory)
    }

    fn do_get_patterns(&self, params: &PatternsParams) -> Result<String, String> {
        let mut patterns = self.store.get_patterns();
        if let Some(limit) = params.limit {
            patterns.truncate(limit as usize);
        }
        to_json(&patterns)
    }

    fn do_query_trajectories(&self, params: &QueryTrajectoriesParams) -> Result<String, String> {
        let limit = params.limit.map_or(DEFAULT_QUERY_LIMIT, |l| l as usize);
        to_json(&self.store.query_trajectories(&params.task, limit))
    }

    async fn do_reset_learning(&self) -> Result<String, String> {
        self.store.reset_learning();
        self.persist().await?;
        to_json(&self.store.get_learning_stats())
    }

    /// Verification may call out to a slow verifier, so it runs on the
    /// blocking pool under the configured timeout.
    async fn do_verify_proof(&self, params: VertexParams) -> Result<String, String> {
        let vertex_id = VertexId(params.vertex_id);
        let store = Arc::clone(&self.store);
        let timeout = store.config().proof.verify_timeout();
        let task = tokio::task::spawn_blocking(move || store.verify_quantum_proof(vertex_id));
        let verified = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(verified)) => verified,
            Ok(Err(e)) => return Err(format!("Proof verification failed: {e}")),
            Err(_) => {
                warn!(vertex = %vertex_id, "Proof verification timed out");
                false
            }
        };
        to_json(&ProofVerdict {
            vertex_id,
            verified,
        })
    }

    async fn persist(&self) -> Result<(), String> {
        let Some(snapshots) = &self.snapshots else {
            return Ok(());
        };
        self.store
            .persist(Arc::clone(snapshots))
            .await
            .map_err(|e| format!("Failed to save state: {e}"))
    }
}

// ── Helpers ───────────────────────────────────────────────────────

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON error: {e}"))
}

fn reply(result: Result<String, String>) -> String {
    match result {
        Ok(s) => s,
        Err(e) => format!("Error: {e}"),
    }
}

/// How often the sweeper checks for stale trajectories.
fn sweep_interval(config: &TandemConfig) -> Duration {
    Duration::from_secs(config.learning.stale_timeout_secs / 4)
        .clamp(Duration::from_secs(1), MAX_SWEEP_INTERVAL)
}

#[derive(thiserror::Error, Debug)]
pub enum ServeError {
    #[error("MCP store error: {0}")]
    Store(#[from] tandem_core::TandemError),

    #[error("MCP transport error: {0}")]
    Transport(String),
}

/// Resolve the workspace database path from a workspace root.
pub fn resolve_db_path(root: &Path) -> Option<PathBuf> {
    let db = root.join(TANDEM_DIR).join(DB_FILE);
    if db.exists() { Some(db) } else { None }
}

/// Start the MCP server on stdio transport.
///
/// A background task auto-closes stale trajectories while the server runs.
pub async fn serve_stdio(config: TandemConfig, db_path: &Path) -> Result<(), ServeError> {
    let interval = sweep_interval(&config);
    let server = TandemMcpServer::open(config, db_path).await?;
    info!(db = %db_path.display(), "Starting Tandem MCP server (stdio transport)");

    let sweeper = {
        let store = Arc::clone(server.store());
        let snapshots = server.snapshots.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Some(closed) = store.sweep_stale() {
                    debug!(trajectory = %closed.id, "Sweeper closed stale trajectory");
                    if let Some(snapshots) = &snapshots {
                        if let Err(e) = store.persist(Arc::clone(snapshots)).await {
                            warn!(error = %e, "Failed to save state after sweep");
                        }
                    }
                }
            }
        })
    };

    let transport = tokio::io::join(tokio::io::stdin(), tokio::io::stdout());
    let result = match server.serve(transport).await {
        Ok(service) => service
            .waiting()
            .await
            .map(|_| ())
            .map_err(|e| ServeError::Transport(e.to_string())),
        Err(e) => Err(ServeError::Transport(e.to_string())),
    };
    sweeper.abort();
    result
}

// ── Tests ─────────────────────────────────────────────────────────
