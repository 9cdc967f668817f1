//! Configuration Management
//!
//! Handles persistent configuration storage for stackgraph. Command-line flags
//! override anything stored here.

use crate::engine::DEFAULT_PARALLELISM;
use crate::provider::rest::{DEFAULT_OPERATION_TIMEOUT, DEFAULT_POLL_INTERVAL};
use crate::state::StateStore;
use crate::topology::BundleOptions;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Remote provider settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProviderConfig {
    /// Base URL of the provisioning API
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub operation_timeout_secs: Option<u64>,
}

impl ProviderConfig {
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL)
    }

    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_OPERATION_TIMEOUT)
    }
}

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Concurrent provisioning calls
    #[serde(default)]
    pub parallelism: Option<usize>,
    #[serde(default)]
    pub state_path: Option<PathBuf>,
    /// Handler source directory
    #[serde(default)]
    pub source_dir: Option<PathBuf>,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub bundling: Option<BundleOptions>,
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("stackgraph").join("config.json"))
    }

    /// Load configuration from the default location
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load configuration from `path`, falling back to defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable config {:?}: {}", path, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    /// Get effective parallelism (CLI > config > default)
    pub fn effective_parallelism(&self, cli: Option<usize>) -> usize {
        cli.or(self.parallelism).unwrap_or(DEFAULT_PARALLELISM).max(1)
    }

    /// Get effective state file (CLI > config > default)
    pub fn effective_state_path(&self, cli: Option<PathBuf>) -> PathBuf {
        cli.or_else(|| self.state_path.clone())
            .unwrap_or_else(StateStore::default_path)
    }

    /// Get effective handler source directory (CLI > config > current dir)
    pub fn effective_source_dir(&self, cli: Option<PathBuf>) -> PathBuf {
        cli.or_else(|| self.source_dir.clone())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Get effective provider endpoint (CLI > config)
    pub fn effective_endpoint(&self, cli: Option<String>) -> Option<String> {
        cli.or_else(|| self.provider.endpoint.clone())
    }

    /// Get effective project (CLI > config)
    pub fn effective_project(&self, cli: Option<String>) -> Option<String> {
        cli.or_else(|| self.provider.project_id.clone())
    }

    pub fn bundle_options(&self) -> BundleOptions {
        self.bundling.clone().unwrap_or_default()
    }
}
