//! The owned coordination handle.
//!
//! [`CoordinationStore`] bundles the four logical stores (agents, graph,
//! journal, learning), each behind its own `RwLock`. Multi-store operations
//! copy what they need out of one store, drop the guard, then touch the
//! next. The one exception is registration, which appends to the journal
//! while still holding the graph guard so journal order matches vertex id
//! order; the journal is never locked before the graph. Proof signing,
//! verification and persistence run with no guard held.
//!
//! Persistence runs on the blocking pool so a store that does synchronous
//! I/O cannot stall the async workers, and saves are serialized so an older
//! snapshot never lands after a newer one.

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tandem_dag::{
    ConflictCandidate, ConflictReport, CoordinationGraph, Operation, Vertex, VertexId,
    check_conflicts, normalize_agent_id,
};
use tracing::{debug, info, instrument, warn};

use crate::agents::{AgentRecord, AgentRegistry, Registration};
use crate::config::TandemConfig;
use crate::error::{AgentError, LearningError, Result, StoreError};
use crate::journal::{OperationJournal, OperationSnapshot};
use crate::learn::{
    LearningEngine, LearningStats, Pattern, StepReport, Suggestion, Trajectory, TrajectoryId,
    TrajectoryMatch,
};
use crate::proof::ProofVerifier;
use crate::store::{CoordinationSnapshot, SnapshotStore};

/// Returned by [`CoordinationStore::register_operation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationReceipt {
    pub vertex_id: VertexId,
    pub predecessors: Vec<VertexId>,
    pub tips: Vec<VertexId>,
    /// Whether the stored vertex carries a proof.
    pub signed: bool,
    #[serde(flatten)]
    pub report: ConflictReport,
}

/// Counters across every store, for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinationStats {
    pub vertices: usize,
    pub tips: usize,
    pub edges: usize,
    pub lookback_window: usize,
    pub max_vertices: usize,
    pub oldest_vertex: Option<VertexId>,
    pub newest_vertex: Option<VertexId>,
    pub agents: usize,
    pub journal_len: usize,
    pub journal_head: u64,
    pub trajectories: usize,
    pub patterns: usize,
    pub open_trajectory: Option<TrajectoryId>,
}

#[derive(Debug)]
pub struct CoordinationStore {
    config: TandemConfig,
    agents: RwLock<AgentRegistry>,
    graph: RwLock<CoordinationGraph>,
    journal: RwLock<OperationJournal>,
    learning: RwLock<LearningEngine>,
    verifier: Option<Arc<dyn ProofVerifier>>,
    /// Held across snapshot-and-save.
    persist_lock: tokio::sync::Mutex<()>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl CoordinationStore {
    pub fn new(config: TandemConfig) -> Result<Self> {
        config.validate()?;
        let graph = CoordinationGraph::with_limits(
            config.graph.lookback_window,
            config.graph.max_vertices,
        )?;
        Ok(Self {
            agents: RwLock::new(AgentRegistry::new()),
            graph: RwLock::new(graph),
            journal: RwLock::new(OperationJournal::new(config.journal.capacity)),
            learning: RwLock::new(LearningEngine::new(config.learning.clone())),
            verifier: None,
            persist_lock: tokio::sync::Mutex::new(()),
            config,
        })
    }

    /// Attach a proof verifier. Operations registered without a fingerprint
    /// are signed with it.
    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<dyn ProofVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn config(&self) -> &TandemConfig {
        &self.config
    }

    // ── Agents ─────────────────────────────────────────────────────

    pub fn register_agent(&self, agent_id: &str, capabilities: &[String]) -> Result<AgentRecord> {
        let mut agents = write(&self.agents);
        let outcome = agents.register(agent_id, capabilities.iter().cloned(), Utc::now())?;
        if outcome == Registration::Unchanged {
            debug!(agent = agent_id, "Agent re-registered with same capabilities");
        }
        agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| AgentError::InvalidId.into())
    }

    pub fn list_agents(&self) -> Vec<AgentRecord> {
        read(&self.agents).list()
    }

    pub fn get_agent(&self, agent_id: &str) -> Option<AgentRecord> {
        read(&self.agents).get(agent_id).cloned()
    }

    /// Remove an agent. Its historical vertices stay in the graph.
    pub fn deregister_agent(&self, agent_id: &str) -> bool {
        write(&self.agents).deregister(agent_id)
    }

    // ── Coordination graph ─────────────────────────────────────────

    /// Validate, optionally sign, and insert an operation, then report the
    /// conflicts it has with recent work by other agents.
    #[instrument(skip_all, name = "register_operation", fields(agent = %operation.agent_id, kind = %operation.kind))]
    pub fn register_operation(&self, operation: Operation) -> Result<OperationReceipt> {
        let operation = operation.normalized();
        operation.validate()?;
        if self.config.agents.require_registration {
            read(&self.agents).check_known(&operation.agent_id)?;
        }

        let operation = self.sign_if_needed(operation);
        let signed = !operation.fingerprint.is_empty();

        let (vertex, report, tips) = {
            let mut graph = write(&self.graph);
            let id = graph.register_vertex(operation)?;
            let report = check_conflicts(&graph, &ConflictCandidate::Registered(id));
            let vertex = graph
                .vertex(id)
                .cloned()
                .ok_or_else(|| {
                    tandem_dag::DagError::InvalidOperation(format!("vertex {id} was evicted on insert"))
                })?;
            write(&self.journal).append(OperationSnapshot::from(&vertex));
            (vertex, report, graph.tips())
        };

        write(&self.agents).touch(&vertex.agent_id, vertex.created_at);

        if !report.is_clean() {
            info!(
                vertex = %vertex.id,
                conflicts = report.conflicts.len(),
                highest = ?report.highest_severity(),
                "Operation conflicts with concurrent work"
            );
        }

        Ok(OperationReceipt {
            vertex_id: vertex.id,
            predecessors: vertex.predecessors.iter().copied().collect(),
            tips,
            signed,
            report,
        })
    }

    fn sign_if_needed(&self, operation: Operation) -> Operation {
        let Some(verifier) = &self.verifier else {
            return operation;
        };
        if !operation.fingerprint.is_empty() {
            return operation;
        }
        match verifier.sign(&operation.signing_payload()) {
            Ok(proof) => operation.with_fingerprint(proof),
            Err(e) => {
                warn!(error = %e, "Proof signing failed, registering unsigned");
                operation
            }
        }
    }

    pub fn check_conflicts(&self, candidate: &ConflictCandidate) -> ConflictReport {
        check_conflicts(&read(&self.graph), candidate)
    }

    pub fn get_tips(&self) -> Vec<VertexId> {
        read(&self.graph).tips()
    }

    pub fn get_vertex(&self, id: VertexId) -> Option<Vertex> {
        read(&self.graph).vertex(id).cloned()
    }

    pub fn distance(&self, a: VertexId, b: VertexId) -> usize {
        read(&self.graph).distance(a, b)
    }

    pub fn is_ancestor(&self, a: VertexId, b: VertexId) -> bool {
        read(&self.graph).is_ancestor(a, b)
    }

    /// Verify the stored proof of a vertex. Unknown vertices, missing proofs
    /// and a missing verifier all yield `false`.
    pub fn verify_quantum_proof(&self, id: VertexId) -> bool {
        let Some(verifier) = &self.verifier else {
            return false;
        };
        let Some(vertex) = self.get_vertex(id) else {
            return false;
        };
        if vertex.fingerprint.is_empty() {
            return false;
        }
        let ok = verifier.verify(&vertex.signing_payload(), &vertex.fingerprint);
        debug!(vertex = %id, ok, "Proof verified");
        ok
    }

    // ── Trajectories ───────────────────────────────────────────────

    pub fn start_trajectory(&self, task: &str) -> Result<TrajectoryId> {
        self.start(task, None)
    }

    /// Start a trajectory that only captures `agent_id`'s operations.
    pub fn start_agent_trajectory(&self, task: &str, agent_id: &str) -> Result<TrajectoryId> {
        self.start(task, Some(normalize_agent_id(agent_id).to_string()))
    }

    fn start(&self, task: &str, agent_id: Option<String>) -> Result<TrajectoryId> {
        let now = Utc::now();
        let head = read(&self.journal).head();
        let mut learning = write(&self.learning);
        learning.expire_stale_at(now);
        Ok(learning.start(task, agent_id, head, now)?)
    }

    /// Pull the operations registered since the last step into the open
    /// trajectory.
    pub fn add_to_trajectory(&self) -> Result<StepReport> {
        let now = Utc::now();
        let cursor = {
            let mut learning = write(&self.learning);
            learning.expire_stale_at(now);
            learning.open_cursor().ok_or(LearningError::NotOpen)?
        };
        let (delta, head) = {
            let journal = read(&self.journal);
            (journal.since(cursor), journal.head())
        };
        Ok(write(&self.learning).append(delta, head, now)?)
    }

    /// Seal the open trajectory and mine patterns from it.
    pub fn finalize_trajectory(&self, score: f64, critique: Option<String>) -> Result<Trajectory> {
        let now = Utc::now();
        let mut learning = write(&self.learning);
        learning.expire_stale_at(now);
        Ok(learning.finalize(score, critique, now)?)
    }

    /// Auto-close the open trajectory if it went stale.
    pub fn sweep_stale(&self) -> Option<Trajectory> {
        self.sweep_stale_at(Utc::now())
    }

    pub fn sweep_stale_at(&self, now: DateTime<Utc>) -> Option<Trajectory> {
        write(&self.learning).expire_stale_at(now)
    }

    pub fn open_trajectory(&self) -> Option<Trajectory> {
        read(&self.learning).open_trajectory().cloned()
    }

    // ── Learning queries ───────────────────────────────────────────

    pub fn get_suggestion(&self, task: &str) -> Suggestion {
        read(&self.learning).suggest(task)
    }

    pub fn get_learning_stats(&self) -> LearningStats {
        read(&self.learning).stats()
    }

    pub fn get_patterns(&self) -> Vec<Pattern> {
        read(&self.learning).patterns()
    }

    pub fn query_trajectories(&self, task: &str, limit: usize) -> Vec<TrajectoryMatch> {
        read(&self.learning).query(task, limit)
    }

    pub fn get_trajectories(&self) -> Vec<Trajectory> {
        read(&self.learning).trajectories()
    }

    pub fn get_trajectory(&self, id: TrajectoryId) -> Option<Trajectory> {
        read(&self.learning).trajectory(id).cloned()
    }

    /// Clear trajectories and patterns. The graph, registry and journal are
    /// untouched.
    pub fn reset_learning(&self) {
        write(&self.learning).reset();
    }

    pub fn get_stats(&self) -> CoordinationStats {
        let graph = read(&self.graph).stats();
        let agents = read(&self.agents).len();
        let (journal_len, journal_head) = {
            let journal = read(&self.journal);
            (journal.len(), journal.head())
        };
        let learning = read(&self.learning).stats();
        CoordinationStats {
            vertices: graph.vertices,
            tips: graph.tips,
            edges: graph.edges,
            lookback_window: graph.lookback_window,
            max_vertices: graph.max_vertices,
            oldest_vertex: graph.oldest,
            newest_vertex: graph.newest,
            agents,
            journal_len,
            journal_head,
            trajectories: learning.total_trajectories,
            patterns: learning.total_patterns,
            open_trajectory: learning.open_trajectory,
        }
    }

    // ── Snapshots ──────────────────────────────────────────────────

    /// Copy every store out, one lock at a time.
    pub fn snapshot(&self) -> CoordinationSnapshot {
        let agents = read(&self.agents).list();
        let (vertices, next_vertex_id) = {
            let graph = read(&self.graph);
            (graph.vertices().cloned().collect(), graph.next_id())
        };
        let (journal, journal_head) = {
            let journal = read(&self.journal);
            (journal.entries().cloned().collect(), journal.head())
        };
        let (open_trajectory, trajectories, patterns) = {
            let learning = read(&self.learning);
            (
                learning.open_trajectory().cloned(),
                learning.trajectories(),
                learning.patterns(),
            )
        };
        CoordinationSnapshot {
            vertices,
            next_vertex_id,
            agents,
            journal,
            journal_head,
            open_trajectory,
            trajectories,
            patterns,
            saved_at: Some(Utc::now()),
        }
    }

    /// Rebuild a store from a snapshot. Tips are recomputed from edges.
    pub fn from_snapshot(config: TandemConfig, snapshot: CoordinationSnapshot) -> Result<Self> {
        config.validate()?;
        let graph = CoordinationGraph::restore(
            snapshot.vertices,
            snapshot.next_vertex_id,
            config.graph.lookback_window,
            config.graph.max_vertices,
        )?;
        let journal = OperationJournal::restore(
            snapshot.journal,
            snapshot.journal_head,
            config.journal.capacity,
        );
        let learning = LearningEngine::restore(
            config.learning.clone(),
            snapshot.open_trajectory,
            snapshot.trajectories,
            snapshot.patterns,
        );
        Ok(Self {
            agents: RwLock::new(AgentRegistry::from_records(snapshot.agents)),
            graph: RwLock::new(graph),
            journal: RwLock::new(journal),
            learning: RwLock::new(learning),
            verifier: None,
            persist_lock: tokio::sync::Mutex::new(()),
            config,
        })
    }

    /// Save a snapshot, bounded by `persistence.timeout_ms`.
    ///
    /// The store call runs on the blocking pool. On timeout the call keeps
    /// running in the background; a later save still wins because stores
    /// compare `saved_at`.
    #[instrument(skip_all, name = "persist")]
    pub async fn persist(&self, store: Arc<dyn SnapshotStore>) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.snapshot();
        let vertices = snapshot.vertices.len();
        bounded(
            self.config.persistence.timeout(),
            self.config.persistence.timeout_ms,
            store,
            move |store| async move { store.save_snapshot(&snapshot).await },
        )
        .await?;
        info!(vertices, "Coordination state persisted");
        Ok(())
    }

    /// Load the last snapshot, or start empty when none was saved.
    ///
    /// The proof verifier is not part of the snapshot: chain
    /// [`with_verifier`](Self::with_verifier) on the result to keep signing.
    #[instrument(skip_all, name = "restore")]
    pub async fn restore(config: TandemConfig, store: Arc<dyn SnapshotStore>) -> Result<Self> {
        let loaded = bounded(
            config.persistence.timeout(),
            config.persistence.timeout_ms,
            store,
            |store| async move { store.load_snapshot().await },
        )
        .await?;
        match loaded {
            Some(snapshot) => {
                let restored = Self::from_snapshot(config, snapshot)?;
                let stats = restored.get_stats();
                info!(
                    vertices = stats.vertices,
                    trajectories = stats.trajectories,
                    patterns = stats.patterns,
                    "Coordination state restored"
                );
                Ok(restored)
            }
            None => Self::new(config),
        }
    }
}

/// Run a store call on the blocking pool and give up after `timeout`.
async fn bounded<T, F, Fut>(
    timeout: Duration,
    timeout_ms: u64,
    store: Arc<dyn SnapshotStore>,
    call: F,
) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(Arc<dyn SnapshotStore>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>>,
{
    let handle = tokio::runtime::Handle::current();
    let task = tokio::task::spawn_blocking(move || handle.block_on(call(store)));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(StoreError::Task(e.to_string()).into()),
        Err(_) => {
            warn!(timeout_ms, "Persistence timed out");
            Err(StoreError::Timeout(timeout_ms).into())
        }
    }
}
