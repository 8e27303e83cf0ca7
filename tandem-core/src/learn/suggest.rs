//! Task similarity and suggestion ranking.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tandem_dag::OperationKind;

use super::pattern::{PatternTable, contains_run};
use super::trajectory::{Trajectory, TrajectoryId};

/// Lower-cased words of a task description with punctuation removed.
pub fn task_words(task: &str) -> BTreeSet<String> {
    task.split(|c: char| c.is_whitespace() || (c.is_ascii_punctuation() && c != '_'))
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Jaccard index of two word sets. Two empty sets are unrelated.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    #[allow(clippy::cast_precision_loss)]
    let score = intersection as f64 / union as f64;
    score
}

pub fn task_similarity(a: &str, b: &str) -> f64 {
    jaccard(&task_words(a), &task_words(b))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionSource {
    /// Best pattern seen in a trajectory for a similar task.
    SimilarTrajectories,
    /// Globally best pattern, discounted for low task relevance.
    GlobalFallback,
    /// Nothing learned yet.
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub confidence: f64,
    pub expected_success_rate: f64,
    pub suggested_steps: Vec<OperationKind>,
    pub similar_trajectory_ids: Vec<TrajectoryId>,
    pub source: SuggestionSource,
}

impl Suggestion {
    fn empty(similar_trajectory_ids: Vec<TrajectoryId>) -> Self {
        Self {
            confidence: 0.0,
            expected_success_rate: 0.0,
            suggested_steps: Vec::new(),
            similar_trajectory_ids,
            source: SuggestionSource::None,
        }
    }
}

/// A trajectory returned by `query_trajectories` with its similarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrajectoryMatch {
    pub similarity: f64,
    #[serde(flatten)]
    pub trajectory: Trajectory,
}

/// Rank `trajectories` (oldest first) by similarity to `task`. Only
/// trajectories with similarity above zero are returned; ties go to the
/// newer trajectory.
pub fn rank_trajectories<'a>(
    task: &str,
    trajectories: impl DoubleEndedIterator<Item = &'a Trajectory>,
    limit: usize,
) -> Vec<TrajectoryMatch> {
    let words = task_words(task);
    let mut matches: Vec<TrajectoryMatch> = trajectories
        .rev()
        .filter_map(|t| {
            let similarity = jaccard(&words, &task_words(&t.task));
            (similarity > 0.0).then(|| TrajectoryMatch {
                similarity,
                trajectory: t.clone(),
            })
        })
        .collect();
    // Stable sort keeps newest-first order among equal similarities.
    matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    matches.truncate(limit);
    matches
}

/// Parameters the suggestion engine reads from the learning settings.
#[derive(Debug, Clone, Copy)]
pub struct SuggestParams {
    pub similarity_threshold: f64,
    pub fallback_discount: f64,
}

pub fn suggest<'a>(
    task: &str,
    trajectories: impl Iterator<Item = &'a Trajectory>,
    patterns: &PatternTable,
    params: SuggestParams,
) -> Suggestion {
    let words = task_words(task);
    let similar: Vec<&Trajectory> = trajectories
        .filter(|t| jaccard(&words, &task_words(&t.task)) >= params.similarity_threshold)
        .collect();
    let similar_ids: Vec<TrajectoryId> = similar.iter().map(|t| t.id).collect();
    let signatures: Vec<Vec<OperationKind>> = similar.iter().map(|t| t.signature()).collect();

    let local = patterns.best_where(|p| {
        signatures
            .iter()
            .any(|sig| contains_run(sig, &p.signature))
    });
    if let Some(pattern) = local {
        return Suggestion {
            confidence: pattern.confidence,
            expected_success_rate: pattern.success_rate,
            suggested_steps: pattern.signature.clone(),
            similar_trajectory_ids: similar_ids,
            source: SuggestionSource::SimilarTrajectories,
        };
    }

    match patterns.best_where(|_| true) {
        Some(pattern) => Suggestion {
            confidence: (pattern.confidence * params.fallback_discount).clamp(0.0, 1.0),
            expected_success_rate: pattern.success_rate,
            suggested_steps: pattern.signature.clone(),
            similar_trajectory_ids: similar_ids,
            source: SuggestionSource::GlobalFallback,
        },
        None => Suggestion::empty(similar_ids),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Utc;
    use tandem_dag::VertexId;

    use super::*;
    use crate::journal::OperationSnapshot;

    const PARAMS: SuggestParams = SuggestParams {
        similarity_threshold: 0.3,
        fallback_discount: 0.5,
    };

    fn trajectory(task: &str, kinds: &[OperationKind]) -> Trajectory {
        let now = Utc::now();
        let mut t = Trajectory::open(task, None, 0, now);
        t.operations = kinds
            .iter()
            .enumerate()
            .map(|(i, &kind)| OperationSnapshot {
                vertex_id: VertexId(i64::try_from(i).unwrap() + 1),
                kind,
                agent_id: "agent".into(),
                affected_files: BTreeSet::new(),
                timestamp: now,
            })
            .collect();
        t.close(1.0, None, 1.0, now);
        t
    }

    #[test]
    fn words_are_normalized() {
        let words = task_words("Build, the FEATURE x!");
        let expected: BTreeSet<String> = ["build", "the", "feature", "x"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(words, expected);
    }

    #[test]
    fn jaccard_matches_hand_computation() {
        assert!((task_similarity("fix login bug", "fix login bug") - 1.0).abs() < f64::EPSILON);
        assert!((task_similarity("fix login bug", "fix signup bug") - 0.5).abs() < f64::EPSILON);
        assert!(task_similarity("", "").abs() < f64::EPSILON);
        assert!(task_similarity("alpha", "beta").abs() < f64::EPSILON);
    }

    #[test]
    fn ranking_drops_unrelated_and_prefers_newer_on_ties() {
        let older = trajectory("deploy service", &[]);
        let newer = trajectory("deploy service", &[]);
        let other = trajectory("write docs", &[]);
        let all = [older.clone(), newer.clone(), other];
        let ranked = rank_trajectories("deploy service", all.iter(), 10);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].trajectory.id, newer.id);
        assert_eq!(ranked[1].trajectory.id, older.id);

        let ranked = rank_trajectories("deploy service", all.iter(), 1);
        assert_eq!(ranked.len(), 1);
    }

    #[test]
    fn similar_trajectory_patterns_win() {
        use OperationKind::{Commit, Edit, New, Status};
        let mut table = PatternTable::new();
        let now = Utc::now();
        let relevant = trajectory("fix login bug", &[Edit, Commit]);
        let other = trajectory("write release notes", &[New, Status]);
        table.mine(&relevant.signature(), true, 10, now);
        for _ in 0..5 {
            table.mine(&other.signature(), true, 10, now);
        }

        let all = [relevant.clone(), other];
        let suggestion = suggest("fix the login bug", all.iter(), &table, PARAMS);
        assert_eq!(suggestion.source, SuggestionSource::SimilarTrajectories);
        assert_eq!(suggestion.suggested_steps, vec![Edit, Commit]);
        assert_eq!(suggestion.similar_trajectory_ids, vec![relevant.id]);
    }

    #[test]
    fn unrelated_task_falls_back_with_discount() {
        use OperationKind::{Commit, Edit};
        let mut table = PatternTable::new();
        let t = trajectory("fix login bug", &[Edit, Commit]);
        for _ in 0..10 {
            table.mine(&t.signature(), true, 10, Utc::now());
        }
        let best = table.get(&[Edit, Commit]).unwrap().confidence;

        let suggestion = suggest("compose a symphony", [t].iter(), &table, PARAMS);
        assert_eq!(suggestion.source, SuggestionSource::GlobalFallback);
        assert!((suggestion.confidence - best * 0.5).abs() < 1e-12);
        assert!(suggestion.similar_trajectory_ids.is_empty());
    }

    #[test]
    fn nothing_learned_yields_empty_suggestion() {
        let table = PatternTable::new();
        let suggestion = suggest("anything", std::iter::empty(), &table, PARAMS);
        assert_eq!(suggestion.source, SuggestionSource::None);
        assert!(suggestion.confidence.abs() < f64::EPSILON);
        assert!(suggestion.suggested_steps.is_empty());
    }
}
