//! Registry of agents participating in coordination.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tandem_dag::normalize_agent_id;
use tracing::debug;

use crate::error::AgentError;

/// A registered agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub agent_id: String,
    pub capabilities: BTreeSet<String>,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub last_active: Option<DateTime<Utc>>,
    #[serde(default)]
    pub operation_count: u64,
}

/// Outcome of [`AgentRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Created,
    /// Same id and capability set were already present.
    Unchanged,
}

#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<String, AgentRecord>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = AgentRecord>) -> Self {
        Self {
            agents: records
                .into_iter()
                .map(|r| (r.agent_id.clone(), r))
                .collect(),
        }
    }

    /// Register an agent. Re-registering with an identical capability set is
    /// a no-op; a different set is rejected.
    pub fn register<I, S>(
        &mut self,
        agent_id: &str,
        capabilities: I,
        now: DateTime<Utc>,
    ) -> Result<Registration, AgentError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let agent_id = normalize_agent_id(agent_id);
        if agent_id.is_empty() {
            return Err(AgentError::InvalidId);
        }
        let capabilities: BTreeSet<String> = capabilities.into_iter().map(Into::into).collect();

        if let Some(existing) = self.agents.get(agent_id) {
            if existing.capabilities == capabilities {
                return Ok(Registration::Unchanged);
            }
            return Err(AgentError::Duplicate {
                agent_id: agent_id.to_string(),
            });
        }

        debug!(agent = agent_id, capabilities = capabilities.len(), "Registered agent");
        self.agents.insert(
            agent_id.to_string(),
            AgentRecord {
                agent_id: agent_id.to_string(),
                capabilities,
                registered_at: now,
                last_active: None,
                operation_count: 0,
            },
        );
        Ok(Registration::Created)
    }

    /// Remove an agent. Returns whether it was present.
    pub fn deregister(&mut self, agent_id: &str) -> bool {
        let removed = self.agents.remove(normalize_agent_id(agent_id)).is_some();
        if removed {
            debug!(agent = agent_id, "Deregistered agent");
        }
        removed
    }

    pub fn get(&self, agent_id: &str) -> Option<&AgentRecord> {
        self.agents.get(normalize_agent_id(agent_id))
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.contains_key(normalize_agent_id(agent_id))
    }

    /// Snapshot of every agent, sorted by id.
    pub fn list(&self) -> Vec<AgentRecord> {
        self.agents.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Record activity for a registered agent. Unknown agents are ignored.
    pub fn touch(&mut self, agent_id: &str, at: DateTime<Utc>) {
        if let Some(record) = self.agents.get_mut(normalize_agent_id(agent_id)) {
            record.operation_count += 1;
            record.last_active = Some(at);
        }
    }

    /// Enforce registration when the deployment requires it.
    pub fn check_known(&self, agent_id: &str) -> Result<(), AgentError> {
        if self.contains(agent_id) {
            Ok(())
        } else {
            Err(AgentError::Unregistered {
                agent_id: normalize_agent_id(agent_id).to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_ids_name_the_same_agent() {
        let mut registry = AgentRegistry::new();
        let now = Utc::now();
        registry.register(" alpha ", ["edit"], now).unwrap();
        assert!(registry.get("alpha").is_some());
        assert!(registry.contains("alpha\t"));
        assert!(registry.check_known(" alpha").is_ok());

        registry.touch("alpha ", now);
        assert_eq!(registry.get("alpha").unwrap().operation_count, 1);
        assert!(registry.deregister("  alpha"));
        assert!(registry.is_empty());
    }

    #[test]
    fn register_is_idempotent_for_same_capabilities() {
        let mut registry = AgentRegistry::new();
        let now = Utc::now();
        assert_eq!(
            registry.register("alpha", ["edit", "merge"], now).unwrap(),
            Registration::Created
        );
        assert_eq!(
            registry.register("alpha", ["merge", "edit"], now).unwrap(),
            Registration::Unchanged
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn different_capabilities_are_a_duplicate() {
        let mut registry = AgentRegistry::new();
        registry.register("alpha", ["edit"], Utc::now()).unwrap();
        let err = registry.register("alpha", ["review"], Utc::now()).unwrap_err();
        assert_eq!(
            err,
            AgentError::Duplicate {
                agent_id: "alpha".into()
            }
        );
    }

    #[test]
    fn blank_id_is_rejected() {
        let mut registry = AgentRegistry::new();
        assert_eq!(
            registry.register("   ", Vec::<String>::new(), Utc::now()),
            Err(AgentError::InvalidId)
        );
    }

    #[test]
    fn list_is_sorted_and_deregister_reports_presence() {
        let mut registry = AgentRegistry::new();
        let now = Utc::now();
        registry.register("zeta", ["edit"], now).unwrap();
        registry.register("alpha", ["edit"], now).unwrap();
        let ids: Vec<_> = registry.list().into_iter().map(|a| a.agent_id).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);

        assert!(registry.deregister("zeta"));
        assert!(!registry.deregister("zeta"));
        assert!(registry.get("zeta").is_none());
    }

    #[test]
    fn touch_counts_operations_for_known_agents_only() {
        let mut registry = AgentRegistry::new();
        let now = Utc::now();
        registry.register("alpha", ["edit"], now).unwrap();
        registry.touch("alpha", now);
        registry.touch("alpha", now);
        registry.touch("ghost", now);
        let record = registry.get("alpha").unwrap();
        assert_eq!(record.operation_count, 2);
        assert_eq!(record.last_active, Some(now));
        assert!(registry.check_known("ghost").is_err());
    }
}
