// Integration test utilities and fixtures for Tandem.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tandem_core::config::TandemConfig;
use tandem_core::learn::Trajectory;
use tandem_core::store::{SnapshotStore, SqliteStore};
use tandem_core::{CoordinationStore, OperationReceipt};
use tandem_dag::{Operation, OperationKind};

/// Store with default settings.
pub fn store() -> CoordinationStore {
    CoordinationStore::new(TandemConfig::default()).expect("default config is valid")
}

/// Store with a custom graph window and retention bound.
pub fn store_with_limits(lookback_window: usize, max_vertices: usize) -> CoordinationStore {
    let mut config = TandemConfig::default();
    config.graph.lookback_window = lookback_window;
    config.graph.max_vertices = max_vertices;
    CoordinationStore::new(config).expect("valid limits")
}

pub fn op(kind: OperationKind, agent: &str, files: &[&str]) -> Operation {
    Operation::new(kind, agent, files.iter().copied())
}

pub fn edit(agent: &str, files: &[&str]) -> Operation {
    op(OperationKind::Edit, agent, files)
}

/// Register an operation, panicking on rejection.
pub fn register(store: &CoordinationStore, operation: Operation) -> OperationReceipt {
    store
        .register_operation(operation)
        .expect("operation is valid")
}

/// Run one full trajectory: open it, register each operation followed by a
/// step, then finalize with `score`.
pub fn record_trajectory(
    store: &CoordinationStore,
    task: &str,
    agent: &str,
    kinds: &[OperationKind],
    score: f64,
) -> anyhow::Result<Trajectory> {
    store.start_trajectory(task)?;
    for (i, kind) in kinds.iter().enumerate() {
        let file = format!("src/{task_slug}_{i}.rs", task_slug = slug(task));
        store.register_operation(Operation::new(*kind, agent, [file]))?;
        store.add_to_trajectory()?;
    }
    Ok(store.finalize_trajectory(score, None)?)
}

fn slug(task: &str) -> String {
    task.split_whitespace().collect::<Vec<_>>().join("_")
}

/// A store persisted to a SQLite file in a temporary directory.
#[derive(Debug)]
pub struct TestWorkspace {
    pub dir: tempfile::TempDir,
    pub config: TandemConfig,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self::with_config(TandemConfig::default())
    }

    pub fn with_config(config: TandemConfig) -> Self {
        let dir = tempfile::tempdir().expect("create tempdir");
        Self { dir, config }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("tandem.db")
    }

    pub fn database(&self) -> anyhow::Result<Arc<dyn SnapshotStore>> {
        Ok(Arc::new(SqliteStore::open(&self.db_path())?))
    }

    /// Load the store as a fresh process would.
    pub async fn open(&self) -> anyhow::Result<CoordinationStore> {
        let db = self.database()?;
        Ok(CoordinationStore::restore(self.config.clone(), db).await?)
    }

    pub async fn save(&self, store: &CoordinationStore) -> anyhow::Result<()> {
        let db = self.database()?;
        store.persist(db).await?;
        Ok(())
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize any output the way the MCP tools and CLI present it.
pub fn to_json<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).expect("serializable")
}
