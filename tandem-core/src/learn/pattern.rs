//! Pattern mining over finalized trajectories.
//!
//! A pattern is a contiguous run of operation kinds. Every finalized
//! trajectory contributes one observation to each distinct run of length
//! `2..=min(len, max_signature_len)` it contains.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tandem_dag::OperationKind;

/// Observations at which the log term of the confidence saturates
/// (`ln(obs) / 5 >= 1`).
const CONFIDENCE_LOG_SCALE: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pattern {
    pub signature: Vec<OperationKind>,
    pub signature_hash: u64,
    pub observations: u64,
    pub successes: u64,
    pub success_rate: f64,
    pub confidence: f64,
    pub last_seen: DateTime<Utc>,
}

impl Pattern {
    fn new(signature: Vec<OperationKind>, now: DateTime<Utc>) -> Self {
        Self {
            signature_hash: signature_hash(&signature),
            signature,
            observations: 0,
            successes: 0,
            success_rate: 0.0,
            confidence: 0.0,
            last_seen: now,
        }
    }

    fn observe(&mut self, success: bool, now: DateTime<Utc>) {
        self.observations += 1;
        if success {
            self.successes += 1;
        }
        self.refresh();
        self.last_seen = now;
    }

    fn refresh(&mut self) {
        self.success_rate = success_rate(self.observations, self.successes);
        self.confidence = confidence(self.observations, self.success_rate);
    }

    /// Ranking used by suggestions: confidence, then observations, then
    /// longer signatures.
    pub(crate) fn outranks(&self, other: &Self) -> bool {
        self.confidence
            .total_cmp(&other.confidence)
            .then(self.observations.cmp(&other.observations))
            .then(self.signature.len().cmp(&other.signature.len()))
            .then(other.signature.cmp(&self.signature))
            .is_gt()
    }
}

pub fn success_rate(observations: u64, successes: u64) -> f64 {
    if observations == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let rate = successes.min(observations) as f64 / observations as f64;
    rate
}

/// `min(ln(observations) / 5, 1) * success_rate`, clamped to `[0, 1]`.
pub fn confidence(observations: u64, success_rate: f64) -> f64 {
    if observations == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let volume = ((observations as f64).ln() / CONFIDENCE_LOG_SCALE).min(1.0);
    (volume * success_rate).clamp(0.0, 1.0)
}

/// Stable FNV-1a hash of a signature's kind names.
pub fn signature_hash(signature: &[OperationKind]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for kind in signature {
        for byte in kind.as_str().bytes().chain(std::iter::once(b'/')) {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(PRIME);
        }
    }
    hash
}

/// Distinct contiguous runs of length `2..=min(len, max_len)`.
pub fn contiguous_runs(kinds: &[OperationKind], max_len: usize) -> BTreeSet<Vec<OperationKind>> {
    let longest = kinds.len().min(max_len);
    let mut runs = BTreeSet::new();
    for len in 2..=longest {
        for window in kinds.windows(len) {
            runs.insert(window.to_vec());
        }
    }
    runs
}

/// Whether `needle` occurs as a contiguous run inside `haystack`.
pub fn contains_run(haystack: &[OperationKind], needle: &[OperationKind]) -> bool {
    !needle.is_empty()
        && needle.len() <= haystack.len()
        && haystack.windows(needle.len()).any(|w| w == needle)
}

#[derive(Debug, Default)]
pub struct PatternTable {
    patterns: HashMap<Vec<OperationKind>, Pattern>,
}

impl PatternTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_patterns(patterns: impl IntoIterator<Item = Pattern>) -> Self {
        Self {
            patterns: patterns
                .into_iter()
                .map(|mut p| {
                    p.signature_hash = signature_hash(&p.signature);
                    p.refresh();
                    (p.signature.clone(), p)
                })
                .collect(),
        }
    }

    /// Record one trajectory. Returns how many distinct runs were observed.
    pub fn mine(
        &mut self,
        kinds: &[OperationKind],
        success: bool,
        max_signature_len: usize,
        now: DateTime<Utc>,
    ) -> usize {
        let runs = contiguous_runs(kinds, max_signature_len);
        let count = runs.len();
        for run in runs {
            self.patterns
                .entry(run)
                .or_insert_with_key(|sig| Pattern::new(sig.clone(), now))
                .observe(success, now);
        }
        count
    }

    pub fn get(&self, signature: &[OperationKind]) -> Option<&Pattern> {
        self.patterns.get(signature)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pattern> {
        self.patterns.values()
    }

    /// Snapshot sorted by confidence desc (ties broken by rank).
    pub fn sorted(&self) -> Vec<Pattern> {
        let mut patterns: Vec<Pattern> = self.patterns.values().cloned().collect();
        patterns.sort_by(|a, b| {
            if a.outranks(b) {
                std::cmp::Ordering::Less
            } else if b.outranks(a) {
                std::cmp::Ordering::Greater
            } else {
                std::cmp::Ordering::Equal
            }
        });
        patterns
    }

    /// Highest-ranked pattern among those accepted by `filter`.
    pub fn best_where(&self, mut filter: impl FnMut(&Pattern) -> bool) -> Option<&Pattern> {
        self.patterns
            .values()
            .filter(|p| filter(p))
            .fold(None, |best: Option<&Pattern>, p| match best {
                Some(b) if !p.outranks(b) => Some(b),
                _ => Some(p),
            })
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn clear(&mut self) {
        self.patterns.clear();
    }
}
