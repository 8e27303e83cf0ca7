use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level Tandem configuration, matching `.tandem/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TandemConfig {
    #[serde(default)]
    pub graph: GraphSection,
    #[serde(default)]
    pub journal: JournalSection,
    #[serde(default)]
    pub agents: AgentSection,
    #[serde(default)]
    pub learning: LearningSection,
    #[serde(default)]
    pub persistence: PersistenceSection,
    #[serde(default)]
    pub proof: ProofSection,
}

impl TandemConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::NotFound(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reject values the stores cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.graph.lookback_window == 0 {
            return Err(ConfigError::Invalid(
                "graph.lookback_window must be at least 1".into(),
            ));
        }
        if self.graph.max_vertices < self.graph.lookback_window {
            return Err(ConfigError::Invalid(
                "graph.max_vertices must be >= graph.lookback_window".into(),
            ));
        }
        if self.journal.capacity == 0 {
            return Err(ConfigError::Invalid("journal.capacity must be at least 1".into()));
        }

        let learning = &self.learning;
        if learning.trajectory_capacity == 0 {
            return Err(ConfigError::Invalid(
                "learning.trajectory_capacity must be at least 1".into(),
            ));
        }
        if learning.max_signature_len < 2 {
            return Err(ConfigError::Invalid(
                "learning.max_signature_len must be at least 2".into(),
            ));
        }
        for (name, value) in [
            ("learning.success_threshold", learning.success_threshold),
            ("learning.similarity_threshold", learning.similarity_threshold),
            ("learning.fallback_discount", learning.fallback_discount),
            ("learning.stale_score", learning.stale_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if learning.stale_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "learning.stale_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSection {
    /// Vertices searched by distance, ancestry and conflict queries.
    pub lookback_window: usize,
    /// Vertices retained before the oldest is evicted.
    pub max_vertices: usize,
}

impl Default for GraphSection {
    fn default() -> Self {
        Self {
            lookback_window: tandem_dag::DEFAULT_LOOKBACK_WINDOW,
            max_vertices: tandem_dag::DEFAULT_MAX_VERTICES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalSection {
    pub capacity: usize,
}

impl Default for JournalSection {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentSection {
    /// Reject operations from agents that never called `register_agent`.
    pub require_registration: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningSection {
    pub trajectory_capacity: usize,
    pub success_threshold: f64,
    pub similarity_threshold: f64,
    pub max_signature_len: usize,
    pub fallback_discount: f64,
    pub stale_timeout_secs: u64,
    pub stale_score: f64,
}

impl Default for LearningSection {
    fn default() -> Self {
        Self {
            trajectory_capacity: 1000,
            success_threshold: 0.7,
            similarity_threshold: 0.3,
            max_signature_len: 10,
            fallback_discount: 0.5,
            stale_timeout_secs: 3600,
            stale_score: 0.0,
        }
    }
}

impl LearningSection {
    pub fn stale_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.stale_timeout_secs).unwrap_or(i64::MAX))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceSection {
    pub timeout_ms: u64,
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self { timeout_ms: 5000 }
    }
}

impl PersistenceSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofSection {
    pub verify_timeout_ms: u64,
}

impl Default for ProofSection {
    fn default() -> Self {
        Self {
            verify_timeout_ms: 2000,
        }
    }
}

impl ProofSection {
    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = TandemConfig::default();
        assert_eq!(config.graph.lookback_window, 100);
        assert_eq!(config.learning.trajectory_capacity, 1000);
        assert!((config.learning.success_threshold - 0.7).abs() < f64::EPSILON);
        assert!((config.learning.similarity_threshold - 0.3).abs() < f64::EPSILON);
        assert_eq!(config.learning.max_signature_len, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config = TandemConfig::from_toml(
            "[graph]\nlookback_window = 50\nmax_vertices = 500\n\n[agents]\nrequire_registration = true\n",
        )
        .unwrap();
        assert_eq!(config.graph.lookback_window, 50);
        assert!(config.agents.require_registration);
        assert_eq!(config.journal.capacity, 10_000);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = TandemConfig::from_toml(
            "[learning]\ntrajectory_capacity = 10\nsuccess_threshold = 1.5\nsimilarity_threshold = 0.3\nmax_signature_len = 10\nfallback_discount = 0.5\nstale_timeout_secs = 60\nstale_score = 0.0\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = TandemConfig::from_toml("[graph]\nlookback_window = 100\nmax_vertices = 10\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = TandemConfig::from_toml("[graph\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn round_trips_through_toml() {
        let text = TandemConfig::default().to_toml().unwrap();
        let back = TandemConfig::from_toml(&text).unwrap();
        assert_eq!(back.learning.stale_timeout_secs, 3600);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = TandemConfig::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.persistence.timeout_ms, 5000);
    }
}
