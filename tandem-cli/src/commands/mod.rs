pub mod agent;
pub mod init;
pub mod learning;
pub mod op;
pub mod serve;
pub mod status;
pub mod trajectory;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Subcommand};
use serde::Serialize;
use tracing::debug;

use tandem_core::CoordinationStore;
use tandem_core::config::TandemConfig;
use tandem_core::store::{SnapshotStore, SqliteStore};
use tandem_mcp::{CONFIG_FILE, DB_FILE, TANDEM_DIR};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a `.tandem` workspace (config + database)
    Init(init::InitArgs),
    /// Register, list, or remove agents
    #[command(subcommand)]
    Agent(agent::AgentCommand),
    /// Register an operation and print its conflicts
    Op(op::OpArgs),
    /// Check a vertex or a proposed operation for conflicts
    Conflicts(op::ConflictsArgs),
    /// Record task trajectories
    #[command(subcommand)]
    Trajectory(trajectory::TrajectoryCommand),
    /// Suggest operation steps for a task
    Suggest(learning::SuggestArgs),
    /// Show learning statistics
    LearningStats(WorkspaceArgs),
    /// List mined patterns, highest confidence first
    Patterns(learning::PatternsArgs),
    /// Find past trajectories for similar tasks
    Trajectories(learning::TrajectoriesArgs),
    /// Forget every trajectory and pattern
    ResetLearning(WorkspaceArgs),
    /// Show the current tips of the coordination graph
    Tips(WorkspaceArgs),
    /// Show counters for every store
    Status(WorkspaceArgs),
    /// Start MCP server for AI agent integration
    Serve(serve::ServeArgs),
}

pub async fn run(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Init(args) => init::run(args),
        Command::Agent(cmd) => agent::run(cmd).await,
        Command::Op(args) => op::run_op(args).await,
        Command::Conflicts(args) => op::run_conflicts(args).await,
        Command::Trajectory(cmd) => trajectory::run(cmd).await,
        Command::Suggest(args) => learning::run_suggest(args).await,
        Command::LearningStats(args) => learning::run_stats(args).await,
        Command::Patterns(args) => learning::run_patterns(args).await,
        Command::Trajectories(args) => learning::run_trajectories(args).await,
        Command::ResetLearning(args) => learning::run_reset(args).await,
        Command::Tips(args) => status::run_tips(args).await,
        Command::Status(args) => status::run(args).await,
        Command::Serve(args) => serve::run(args).await,
    }
}

/// Workspace location shared by every data command.
#[derive(Args, Debug, Clone)]
pub struct WorkspaceArgs {
    /// Workspace root containing `.tandem/` (default: current directory)
    #[arg(long, default_value = ".")]
    pub path: PathBuf,
}

/// A loaded workspace: configuration, database, and the restored store.
#[derive(Debug)]
pub struct Workspace {
    pub root: PathBuf,
    pub db: Arc<dyn SnapshotStore>,
    pub store: CoordinationStore,
}

impl Workspace {
    pub async fn open(args: &WorkspaceArgs) -> anyhow::Result<Self> {
        let root = std::fs::canonicalize(&args.path)
            .with_context(|| format!("Cannot resolve path: {}", args.path.display()))?;

        let db_path = tandem_mcp::resolve_db_path(&root).with_context(|| {
            format!(
                "Tandem is not initialized in {}. Run `tandem init` first.",
                root.display()
            )
        })?;
        let config = load_config(&root)?;

        let db: Arc<dyn SnapshotStore> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Cannot open database: {}", db_path.display()))?,
        );
        let store = CoordinationStore::restore(config, Arc::clone(&db))
            .await
            .context("Cannot load coordination state from database")?;
        debug!(root = %root.display(), vertices = store.get_stats().vertices, "Workspace loaded");
        Ok(Self { root, db, store })
    }

    pub async fn save(&self) -> anyhow::Result<()> {
        self.store
            .persist(Arc::clone(&self.db))
            .await
            .context("Cannot save coordination state to database")
    }
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(TANDEM_DIR).join(CONFIG_FILE)
}

pub fn db_path(root: &Path) -> PathBuf {
    root.join(TANDEM_DIR).join(DB_FILE)
}

pub fn load_config(root: &Path) -> anyhow::Result<TandemConfig> {
    let path = config_path(root);
    TandemConfig::load(&path).with_context(|| format!("Cannot load config: {}", path.display()))
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("Cannot serialize output")?;
    println!("{json}");
    Ok(())
}
