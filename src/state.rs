//! Apply State
//!
//! Persists what the provider confirmed for each resource so that a later run
//! can diff before applying. Only resources the provider reported as realized
//! are ever recorded.

use crate::graph::{Attributes, ResourceKind, Topology};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Recorded state of one realized resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub kind: ResourceKind,
    /// SHA-256 over kind and the literal configuration (sensitive values included)
    pub fingerprint: String,
    /// Configuration with sensitive values redacted
    pub config: Value,
    #[serde(default)]
    pub attributes: Attributes,
    /// RFC 3339 timestamp of the last provisioning call
    pub updated_at: String,
}

/// All recorded resources plus run bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateStore {
    /// Incremented on every save
    #[serde(default)]
    pub serial: u64,
    #[serde(default)]
    pub last_run_id: Option<String>,
    #[serde(default)]
    pub resources: BTreeMap<String, StateEntry>,
}

/// Fingerprint of a resolved configuration
pub fn fingerprint(kind: ResourceKind, config: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical(config).to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Rebuild objects with keys inserted in sorted order
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            Value::Object(
                keys.into_iter()
                    .map(|k| (k.clone(), canonical(&map[k])))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

impl StateStore {
    /// Default state file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("stackgraph").join("state.json"))
            .unwrap_or_else(|| PathBuf::from("stackgraph-state.json"))
    }

    /// Load state from disk; a missing file is an empty state.
    ///
    /// Unlike user configuration, an unreadable state file is an error: treating
    /// it as empty would recreate everything.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No state file, starting empty");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file {}", path.display()))
    }

    /// Save state to disk (written to a sibling file, then renamed)
    pub fn save(&mut self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        self.serial += 1;
        let content = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write state file {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace state file {}", path.display()))?;

        tracing::info!(path = %path.display(), serial = self.serial, "State saved");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&StateEntry> {
        self.resources.get(name)
    }

    /// Recorded attributes when `name` was last realized with this exact configuration
    pub fn unchanged(&self, name: &str, kind: ResourceKind, fingerprint: &str) -> Option<&Attributes> {
        self.resources
            .get(name)
            .filter(|entry| entry.kind == kind && entry.fingerprint == fingerprint)
            .map(|entry| &entry.attributes)
    }

    /// Record a provider-confirmed realization
    pub fn record(
        &mut self,
        name: &str,
        kind: ResourceKind,
        fingerprint: String,
        config: Value,
        attributes: Attributes,
    ) {
        self.resources.insert(
            name.to_string(),
            StateEntry {
                kind,
                fingerprint,
                config,
                attributes,
                updated_at: chrono::Utc::now().to_rfc3339(),
            },
        );
    }

    /// Recorded resources that are no longer declared
    pub fn orphans(&self, topology: &Topology) -> Vec<String> {
        self.resources
            .keys()
            .filter(|name| topology.resource(name).is_none())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Resource, ResourceKind};
    use serde_json::json;

    fn scratch_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("stackgraph-state-{}", uuid::Uuid::new_v4()))
            .join("state.json")
    }

    #[test]
    fn test_fingerprint_is_stable_and_kind_sensitive() {
        let config = json!({"b": 1, "a": [1, 2]});
        let same = json!({"a": [1, 2], "b": 1});
        assert_eq!(
            fingerprint(ResourceKind::Network, &config),
            fingerprint(ResourceKind::Network, &same)
        );
        assert_ne!(
            fingerprint(ResourceKind::Network, &config),
            fingerprint(ResourceKind::Database, &config)
        );
    }

    #[test]
    fn test_unchanged_requires_matching_fingerprint() {
        let mut state = StateStore::default();
        let attrs = Attributes::from([("network_id".to_string(), json!("net-1"))]);
        state.record("net", ResourceKind::Network, "abc".into(), json!({}), attrs.clone());

        assert_eq!(state.unchanged("net", ResourceKind::Network, "abc"), Some(&attrs));
        assert!(state.unchanged("net", ResourceKind::Network, "def").is_none());
        assert!(state.unchanged("net", ResourceKind::Database, "abc").is_none());
        assert!(state.unchanged("other", ResourceKind::Network, "abc").is_none());
    }

    #[test]
    fn test_save_and_load() {
        let path = scratch_path();
        assert_eq!(StateStore::load(&path).unwrap(), StateStore::default());

        let mut state = StateStore::default();
        state.record("db", ResourceKind::Database, "f".into(), json!({"engine": "postgres"}), Attributes::new());
        state.save(&path).unwrap();
        assert_eq!(state.serial, 1);

        let loaded = StateStore::load(&path).unwrap();
        assert_eq!(loaded, state);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_corrupt_state_is_an_error() {
        let path = scratch_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();
        assert!(StateStore::load(&path).is_err());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_orphans() {
        let mut topology = Topology::new("t");
        topology.declare(Resource::new("net", ResourceKind::Network)).unwrap();

        let mut state = StateStore::default();
        state.record("net", ResourceKind::Network, "a".into(), json!({}), Attributes::new());
        state.record("old-db", ResourceKind::Database, "b".into(), json!({}), Attributes::new());
        assert_eq!(state.orphans(&topology), vec!["old-db".to_string()]);
    }
}
