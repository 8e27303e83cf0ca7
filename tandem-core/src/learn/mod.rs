//! Trajectory recording, pattern mining and suggestions.
//!
//! [`LearningEngine`] owns the open trajectory, the ring buffer of closed
//! trajectories and the pattern table. Every method runs to completion on
//! `&mut self`, so mining happens inline inside whatever critical section
//! the caller holds and never calls back out.

pub mod pattern;
pub mod suggest;
pub mod trajectory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::LearningSection;
use crate::error::LearningError;
use crate::journal::JournalEntry;

pub use pattern::{Pattern, PatternTable};
pub use suggest::{Suggestion, SuggestionSource, TrajectoryMatch};
pub use trajectory::{Trajectory, TrajectoryBuffer, TrajectoryId, TrajectoryState};

/// Efficiency bonus used when no successful reference trajectory exists.
const NEUTRAL_EFFICIENCY_BONUS: f64 = 0.5;
const SCORE_WEIGHT: f64 = 0.7;
const EFFICIENCY_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningStats {
    pub total_trajectories: usize,
    pub total_patterns: usize,
    pub avg_reward: f64,
    pub improvement_rate: f64,
    /// Share of buffered trajectories at or above the success threshold.
    pub success_rate: f64,
    pub open_trajectory: Option<TrajectoryId>,
}

/// Result of [`LearningEngine::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub trajectory_id: TrajectoryId,
    pub step: u32,
    pub captured: usize,
    pub total_operations: usize,
}

#[derive(Debug)]
pub struct LearningEngine {
    settings: LearningSection,
    open: Option<Trajectory>,
    closed: TrajectoryBuffer,
    patterns: PatternTable,
}

impl LearningEngine {
    pub fn new(settings: LearningSection) -> Self {
        Self {
            closed: TrajectoryBuffer::new(settings.trajectory_capacity),
            settings,
            open: None,
            patterns: PatternTable::new(),
        }
    }

    /// Rebuild from persisted state. An open trajectory that is actually
    /// closed is moved into the buffer.
    pub fn restore(
        settings: LearningSection,
        open: Option<Trajectory>,
        closed: Vec<Trajectory>,
        patterns: Vec<Pattern>,
    ) -> Self {
        let mut engine = Self::new(settings);
        for trajectory in closed.into_iter().chain(open.clone()) {
            if trajectory.is_open() {
                continue;
            }
            engine.closed.push(trajectory);
        }
        engine.open = open.filter(Trajectory::is_open);
        engine.patterns = PatternTable::from_patterns(patterns);
        engine
    }

    pub fn settings(&self) -> &LearningSection {
        &self.settings
    }

    // ── Recorder ───────────────────────────────────────────────────

    /// Open a trajectory whose journal cursor starts at `cursor`.
    pub fn start(
        &mut self,
        task: &str,
        agent_id: Option<String>,
        cursor: u64,
        now: DateTime<Utc>,
    ) -> Result<TrajectoryId, LearningError> {
        let task = task.trim();
        if task.is_empty() {
            return Err(LearningError::InvalidTask);
        }
        if let Some(open) = &self.open {
            return Err(LearningError::AlreadyOpen {
                id: open.id.to_string(),
            });
        }
        let agent_id = agent_id.map(|a| a.trim().to_string()).filter(|a| !a.is_empty());
        let trajectory = Trajectory::open(task, agent_id, cursor, now);
        let id = trajectory.id;
        debug!(trajectory = %id, task, "Trajectory started");
        self.open = Some(trajectory);
        Ok(id)
    }

    /// The open trajectory's journal cursor, if any.
    pub fn open_cursor(&self) -> Option<u64> {
        self.open.as_ref().map(|t| t.cursor)
    }

    pub fn open_trajectory(&self) -> Option<&Trajectory> {
        self.open.as_ref()
    }

    /// Append a journal delta to the open trajectory. Entries at or before
    /// the cursor and entries from other agents (for agent-scoped
    /// trajectories) are skipped. `head` advances the cursor even when
    /// nothing is captured.
    pub fn append(
        &mut self,
        mut delta: Vec<JournalEntry>,
        head: u64,
        now: DateTime<Utc>,
    ) -> Result<StepReport, LearningError> {
        let trajectory = self.open.as_mut().ok_or(LearningError::NotOpen)?;
        let cursor = trajectory.cursor;
        delta.sort_by_key(|e| e.operation.vertex_id);
        let mut captured = 0;
        for entry in delta {
            if entry.seq <= cursor || !trajectory.captures(&entry.operation) {
                continue;
            }
            trajectory.operations.push(entry.operation);
            captured += 1;
        }
        trajectory.cursor = cursor.max(head);
        trajectory.steps = trajectory.steps.saturating_add(1);
        trajectory.last_activity = now;
        debug!(
            trajectory = %trajectory.id,
            step = trajectory.steps,
            captured,
            "Trajectory step"
        );
        Ok(StepReport {
            trajectory_id: trajectory.id,
            step: trajectory.steps,
            captured,
            total_operations: trajectory.operations.len(),
        })
    }

    /// Seal the open trajectory, compute its reward and mine patterns.
    pub fn finalize(
        &mut self,
        score: f64,
        critique: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Trajectory, LearningError> {
        if !score.is_finite() || !(0.0..=1.0).contains(&score) {
            return Err(LearningError::InvalidScore(score.to_string()));
        }
        let trajectory = self.open.take().ok_or(LearningError::NotOpen)?;
        let critique = critique.filter(|c| !c.trim().is_empty());
        Ok(self.close(trajectory, score, critique, false, now))
    }

    /// Auto-close the open trajectory if it has been idle past the
    /// configured timeout. Returns the closed trajectory.
    pub fn expire_stale_at(&mut self, now: DateTime<Utc>) -> Option<Trajectory> {
        let timeout = self.settings.stale_timeout();
        if !self.open.as_ref().is_some_and(|t| t.is_stale(now, timeout)) {
            return None;
        }
        let trajectory = self.open.take()?;
        let critique = format!(
            "auto-closed after {}s without activity",
            self.settings.stale_timeout_secs
        );
        let score = self.settings.stale_score;
        let closed = self.close(trajectory, score, Some(critique), true, now);
        warn!(trajectory = %closed.id, task = %closed.task, "Stale trajectory auto-closed");
        Some(closed)
    }

    fn close(
        &mut self,
        mut trajectory: Trajectory,
        score: f64,
        critique: Option<String>,
        auto_closed: bool,
        now: DateTime<Utc>,
    ) -> Trajectory {
        let success = score >= self.settings.success_threshold;
        let bonus = self.efficiency_bonus(&trajectory, success);
        let reward = (score * SCORE_WEIGHT + bonus * EFFICIENCY_WEIGHT).clamp(0.0, 1.0);
        trajectory.auto_closed = auto_closed;
        trajectory.close(score, critique, reward, now);

        let mined = self.patterns.mine(
            &trajectory.signature(),
            success,
            self.settings.max_signature_len,
            now,
        );
        info!(
            trajectory = %trajectory.id,
            score,
            reward,
            operations = trajectory.len(),
            mined,
            "Trajectory finalized"
        );
        self.closed.push(trajectory.clone());
        trajectory
    }

    /// `min(Lmin / L, 1)` against the shortest successful similar
    /// trajectory, the one being closed included.
    fn efficiency_bonus(&self, trajectory: &Trajectory, success: bool) -> f64 {
        let threshold = self.settings.success_threshold;
        let words = suggest::task_words(&trajectory.task);
        let own_len = effective_len(trajectory);
        let reference = self
            .closed
            .iter()
            .filter(|t| t.is_successful(threshold))
            .filter(|t| {
                suggest::jaccard(&words, &suggest::task_words(&t.task))
                    >= self.settings.similarity_threshold
            })
            .map(effective_len)
            .chain(success.then_some(own_len))
            .min();
        reference.map_or(NEUTRAL_EFFICIENCY_BONUS, |shortest| {
            ratio(shortest, own_len).min(1.0)
        })
    }

    // ── Queries ────────────────────────────────────────────────────

    pub fn suggest(&self, task: &str) -> Suggestion {
        suggest::suggest(
            task,
            self.closed.iter(),
            &self.patterns,
            suggest::SuggestParams {
                similarity_threshold: self.settings.similarity_threshold,
                fallback_discount: self.settings.fallback_discount,
            },
        )
    }

    pub fn query(&self, task: &str, limit: usize) -> Vec<TrajectoryMatch> {
        suggest::rank_trajectories(task, self.closed.iter(), limit)
    }

    pub fn patterns(&self) -> Vec<Pattern> {
        self.patterns.sorted()
    }

    pub fn trajectories(&self) -> Vec<Trajectory> {
        self.closed.iter().cloned().collect()
    }

    pub fn trajectory(&self, id: TrajectoryId) -> Option<&Trajectory> {
        self.open
            .as_ref()
            .filter(|t| t.id == id)
            .or_else(|| self.closed.get(id))
    }

    pub fn stats(&self) -> LearningStats {
        let rewards: Vec<f64> = self.closed.iter().filter_map(|t| t.reward).collect();
        let successes = self
            .closed
            .iter()
            .filter(|t| t.is_successful(self.settings.success_threshold))
            .count();
        LearningStats {
            total_trajectories: self.closed.len(),
            total_patterns: self.patterns.len(),
            avg_reward: mean(&rewards),
            improvement_rate: improvement_rate(&rewards),
            success_rate: ratio(successes, self.closed.len()),
            open_trajectory: self.open.as_ref().map(|t| t.id),
        }
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn trajectory_count(&self) -> usize {
        self.closed.len()
    }

    /// Drop every trajectory (open and closed) and every pattern.
    pub fn reset(&mut self) {
        let trajectories = self.closed.len() + usize::from(self.open.is_some());
        let patterns = self.patterns.len();
        self.open = None;
        self.closed.clear();
        self.patterns.clear();
        info!(trajectories, patterns, "Learning state reset");
    }
}

fn effective_len(trajectory: &Trajectory) -> usize {
    trajectory.len().max(1)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    values.iter().sum::<f64>() / n
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let r = part as f64 / whole as f64;
    r
}

/// Mean of the newest quartile minus mean of the oldest quartile.
fn improvement_rate(rewards: &[f64]) -> f64 {
    if rewards.len() < 2 {
        return 0.0;
    }
    let quartile = (rewards.len() / 4).max(1);
    mean(&rewards[rewards.len() - quartile..]) - mean(&rewards[..quartile])
}
