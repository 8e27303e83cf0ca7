//! Bounded, sequence-numbered log of registered operations.
//!
//! Trajectories keep a cursor into this log; each `add_to_trajectory` copies
//! the entries written since the cursor.

use std::collections::{BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tandem_dag::{OperationKind, Vertex, VertexId};
use tracing::debug;

/// Copy of a registered operation as captured by a trajectory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSnapshot {
    pub vertex_id: VertexId,
    #[serde(rename = "operationType")]
    pub kind: OperationKind,
    pub agent_id: String,
    pub affected_files: BTreeSet<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<&Vertex> for OperationSnapshot {
    fn from(vertex: &Vertex) -> Self {
        Self {
            vertex_id: vertex.id,
            kind: vertex.kind,
            agent_id: vertex.agent_id.clone(),
            affected_files: vertex.affected_files.clone(),
            timestamp: vertex.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub seq: u64,
    pub operation: OperationSnapshot,
}

#[derive(Debug)]
pub struct OperationJournal {
    entries: VecDeque<JournalEntry>,
    /// Sequence number of the newest entry; 0 before the first append.
    head: u64,
    capacity: usize,
}

impl OperationJournal {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            head: 0,
            capacity: capacity.max(1),
        }
    }

    pub fn restore(mut entries: Vec<JournalEntry>, head: u64, capacity: usize) -> Self {
        entries.sort_by_key(|e| e.seq);
        let newest = entries.last().map_or(0, |e| e.seq);
        let mut journal = Self {
            entries: entries.into(),
            head: head.max(newest),
            capacity: capacity.max(1),
        };
        journal.evict_overflow();
        journal
    }

    pub fn append(&mut self, operation: OperationSnapshot) -> u64 {
        self.head += 1;
        self.entries.push_back(JournalEntry {
            seq: self.head,
            operation,
        });
        self.evict_overflow();
        self.head
    }

    /// Entries with `seq > cursor`, oldest first.
    pub fn since(&self, cursor: u64) -> Vec<JournalEntry> {
        let start = self.entries.partition_point(|e| e.seq <= cursor);
        self.entries.range(start..).cloned().collect()
    }

    pub fn head(&self) -> u64 {
        self.head
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &JournalEntry> {
        self.entries.iter()
    }

    fn evict_overflow(&mut self) {
        while self.entries.len() > self.capacity {
            if let Some(evicted) = self.entries.pop_front() {
                debug!(seq = evicted.seq, "Journal entry evicted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: i64) -> OperationSnapshot {
        OperationSnapshot {
            vertex_id: VertexId(id),
            kind: OperationKind::Edit,
            agent_id: "agent".into(),
            affected_files: BTreeSet::new(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn since_returns_only_newer_entries() {
        let mut journal = OperationJournal::new(10);
        let cursor = journal.head();
        journal.append(snapshot(1));
        journal.append(snapshot(2));
        let delta = journal.since(cursor);
        assert_eq!(delta.len(), 2);
        let cursor = journal.head();
        assert!(journal.since(cursor).is_empty());
        journal.append(snapshot(3));
        let delta = journal.since(cursor);
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].operation.vertex_id, VertexId(3));
    }

    #[test]
    fn capacity_evicts_oldest_but_keeps_sequence() {
        let mut journal = OperationJournal::new(2);
        for id in 1..=5 {
            journal.append(snapshot(id));
        }
        assert_eq!(journal.len(), 2);
        assert_eq!(journal.head(), 5);
        let seqs: Vec<_> = journal.since(0).iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![4, 5]);
    }

    #[test]
    fn restore_keeps_head_monotonic() {
        let mut journal = OperationJournal::new(10);
        journal.append(snapshot(1));
        let entries: Vec<_> = journal.entries().cloned().collect();
        let restored = OperationJournal::restore(entries, 7, 10);
        assert_eq!(restored.head(), 7);
        assert_eq!(restored.len(), 1);
    }
}
