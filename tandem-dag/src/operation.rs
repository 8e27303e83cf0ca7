use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::DagError;

// ── Vertex identity ────────────────────────────────────────────────

/// Sequential identifier of a vertex. Ids start at 1 and grow by one per
/// insertion, so insertion order and id order agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VertexId(pub i64);

impl std::fmt::Display for VertexId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for VertexId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

// ── Operation vocabulary ───────────────────────────────────────────

/// Every operation an agent can report. Pattern signatures and conflict
/// checks work over this closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Commit,
    Describe,
    New,
    Abandon,
    Edit,
    Merge,
    Branch,
    Bookmark,
    Rebase,
    Resolve,
    Restore,
    Status,
    Log,
    Diff,
    Show,
    Config,
    Unknown,
}

impl OperationKind {
    pub const ALL: [Self; 17] = [
        Self::Commit,
        Self::Describe,
        Self::New,
        Self::Abandon,
        Self::Edit,
        Self::Merge,
        Self::Branch,
        Self::Bookmark,
        Self::Rebase,
        Self::Resolve,
        Self::Restore,
        Self::Status,
        Self::Log,
        Self::Diff,
        Self::Show,
        Self::Config,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Describe => "describe",
            Self::New => "new",
            Self::Abandon => "abandon",
            Self::Edit => "edit",
            Self::Merge => "merge",
            Self::Branch => "branch",
            Self::Bookmark => "bookmark",
            Self::Rebase => "rebase",
            Self::Resolve => "resolve",
            Self::Restore => "restore",
            Self::Status => "status",
            Self::Log => "log",
            Self::Diff => "diff",
            Self::Show => "show",
            Self::Config => "config",
            Self::Unknown => "unknown",
        }
    }

    /// Lenient parse: case-insensitive, accepts a few common aliases, and
    /// maps anything else to `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "commit" | "ci" => Self::Commit,
            "describe" | "desc" => Self::Describe,
            "new" => Self::New,
            "abandon" => Self::Abandon,
            "edit" => Self::Edit,
            "merge" => Self::Merge,
            "branch" => Self::Branch,
            "bookmark" => Self::Bookmark,
            "rebase" => Self::Rebase,
            "resolve" => Self::Resolve,
            "restore" => Self::Restore,
            "status" | "st" => Self::Status,
            "log" => Self::Log,
            "diff" => Self::Diff,
            "show" => Self::Show,
            "config" => Self::Config,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

// ── Operations and vertices ────────────────────────────────────────

/// Canonical form of an agent id. Surrounding whitespace is not part of it.
pub fn normalize_agent_id(agent_id: &str) -> &str {
    agent_id.trim()
}

/// An operation as reported by an agent, before it becomes a vertex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(rename = "operationType")]
    pub kind: OperationKind,
    pub agent_id: String,
    /// Empty for metadata-only operations, which never conflict.
    #[serde(default)]
    pub affected_files: BTreeSet<String>,
    /// Opaque proof bytes attached by the signing collaborator.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fingerprint: Vec<u8>,
}

impl Operation {
    pub fn new<I, S>(kind: OperationKind, agent_id: impl Into<String>, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind,
            agent_id: normalize_agent_id(&agent_id.into()).to_string(),
            affected_files: files.into_iter().map(Into::into).collect(),
            fingerprint: Vec::new(),
        }
    }

    /// Normalize the agent id of an operation built without [`Operation::new`],
    /// e.g. one deserialized from the wire.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        let trimmed = normalize_agent_id(&self.agent_id);
        if trimmed.len() != self.agent_id.len() {
            self.agent_id = trimmed.to_string();
        }
        self
    }

    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: Vec<u8>) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    /// Reject blank agent ids and malformed file entries.
    pub fn validate(&self) -> crate::Result<()> {
        if self.agent_id.trim().is_empty() {
            return Err(DagError::InvalidOperation(
                "agentId must not be empty".to_string(),
            ));
        }
        if let Some(bad) = self
            .affected_files
            .iter()
            .find(|f| f.trim().is_empty() || f.contains('\0'))
        {
            return Err(DagError::InvalidOperation(format!(
                "malformed affected file entry: {bad:?}"
            )));
        }
        Ok(())
    }

    /// Canonical bytes handed to the proof collaborator.
    pub fn signing_payload(&self) -> Vec<u8> {
        signing_payload(self.kind, &self.agent_id, &self.affected_files)
    }
}

/// Immutable record of one agent operation in the coordination graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vertex {
    pub id: VertexId,
    #[serde(rename = "operationType")]
    pub kind: OperationKind,
    pub agent_id: String,
    pub affected_files: BTreeSet<String>,
    pub predecessors: BTreeSet<VertexId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fingerprint: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl Vertex {
    /// Files this vertex shares with `files`, sorted.
    pub fn overlapping_files(&self, files: &BTreeSet<String>) -> Vec<String> {
        self.affected_files.intersection(files).cloned().collect()
    }

    pub fn touches_any(&self, files: &BTreeSet<String>) -> bool {
        !self.affected_files.is_disjoint(files)
    }

    pub fn signing_payload(&self) -> Vec<u8> {
        signing_payload(self.kind, &self.agent_id, &self.affected_files)
    }
}

fn signing_payload(kind: OperationKind, agent_id: &str, files: &BTreeSet<String>) -> Vec<u8> {
    let mut payload = Vec::with_capacity(32 + files.iter().map(String::len).sum::<usize>());
    payload.extend_from_slice(kind.as_str().as_bytes());
    payload.push(0);
    payload.extend_from_slice(agent_id.as_bytes());
    for file in files {
        payload.push(0);
        payload.extend_from_slice(file.as_bytes());
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_lenient() {
        assert_eq!(OperationKind::parse("Commit"), OperationKind::Commit);
        assert_eq!(OperationKind::parse(" st "), OperationKind::Status);
        assert_eq!(OperationKind::parse("squash"), OperationKind::Unknown);
        assert_eq!("rebase".parse::<OperationKind>(), Ok(OperationKind::Rebase));
    }

    #[test]
    fn as_str_round_trips_through_parse() {
        for kind in OperationKind::ALL {
            assert_eq!(OperationKind::parse(kind.as_str()), kind);
        }
    }

    #[test]
    fn validate_rejects_blank_agent() {
        let op = Operation::new(OperationKind::Edit, "  ", ["a.txt"]);
        assert!(matches!(op.validate(), Err(DagError::InvalidOperation(_))));
    }

    #[test]
    fn agent_id_whitespace_is_not_significant() {
        let op = Operation::new(OperationKind::Edit, " alpha ", ["a.txt"]);
        assert_eq!(op.agent_id, "alpha");

        let wire: Operation =
            serde_json::from_str(r#"{"operationType":"edit","agentId":"alpha\t"}"#).unwrap();
        assert_eq!(wire.agent_id, "alpha\t");
        assert_eq!(wire.normalized().agent_id, "alpha");
        assert_eq!(normalize_agent_id("  beta"), "beta");
    }

    #[test]
    fn validate_rejects_malformed_files() {
        let op = Operation::new(OperationKind::Edit, "agent", ["ok.txt", ""]);
        assert!(op.validate().is_err());
        let op = Operation::new(OperationKind::Edit, "agent", ["bad\0name"]);
        assert!(op.validate().is_err());
    }

    #[test]
    fn validate_accepts_metadata_only() {
        let op = Operation::new(OperationKind::Describe, "agent", Vec::<String>::new());
        assert!(op.validate().is_ok());
    }

    #[test]
    fn operation_json_uses_camel_case() {
        let op = Operation::new(OperationKind::Edit, "agent-a", ["a.txt"]);
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["operationType"], "edit");
        assert_eq!(json["agentId"], "agent-a");
        assert_eq!(json["affectedFiles"][0], "a.txt");
        assert!(json.get("fingerprint").is_none());
    }

    #[test]
    fn signing_payload_ignores_file_insertion_order() {
        let a = Operation::new(OperationKind::Edit, "x", ["b", "a"]);
        let b = Operation::new(OperationKind::Edit, "x", ["a", "b"]);
        assert_eq!(a.signing_payload(), b.signing_payload());
        let c = Operation::new(OperationKind::Commit, "x", ["a", "b"]);
        assert_ne!(a.signing_payload(), c.signing_payload());
    }
}
