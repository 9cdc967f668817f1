//! Simulated Provider
//!
//! An in-memory cloud. Attributes are derived deterministically from the
//! resource name and configuration, so re-realizing a resource with the same
//! configuration reproduces the same attributes. Calls are recorded, and
//! failures or latency can be injected per resource.

use super::Provisioner;
use crate::graph::{Attributes, ResourceKind};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

/// A recorded provisioning call
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub kind: ResourceKind,
    pub name: String,
    pub config: Value,
}

#[derive(Default)]
pub struct SimulatedProvisioner {
    calls: Mutex<Vec<RecordedCall>>,
    failures: Mutex<HashSet<String>>,
    overrides: Mutex<HashMap<String, Attributes>>,
    latency: Duration,
}

impl SimulatedProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call, to model long-running cloud operations
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make every call for `name` fail
    pub fn fail_on(&self, name: &str) {
        lock(&self.failures).insert(name.to_string());
    }

    /// Stop failing calls for `name`
    pub fn recover(&self, name: &str) {
        lock(&self.failures).remove(name);
    }

    /// Merge fixed attributes into whatever `name` produces
    pub fn set_attributes(&self, name: &str, attributes: Attributes) {
        lock(&self.overrides).insert(name.to_string(), attributes);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Names in call order
    pub fn called_names(&self) -> Vec<String> {
        lock(&self.calls).iter().map(|c| c.name.clone()).collect()
    }
}

#[async_trait]
impl Provisioner for SimulatedProvisioner {
    async fn realize(&self, kind: ResourceKind, name: &str, config: &Value) -> Result<Attributes> {
        lock(&self.calls).push(RecordedCall {
            kind,
            name: name.to_string(),
            config: config.clone(),
        });

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if lock(&self.failures).contains(name) {
            tracing::warn!(resource = name, %kind, "Simulated failure");
            return Err(anyhow::anyhow!("simulated provider rejected {}", name));
        }

        let mut attributes = synthesize(kind, name, config);
        if let Some(extra) = lock(&self.overrides).get(name) {
            attributes.extend(extra.clone());
        }
        tracing::debug!(resource = name, %kind, "Simulated realize");
        Ok(attributes)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn short_id(name: &str, config: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(config.to_string().as_bytes());
    hex::encode(&hasher.finalize()[..4])
}

/// Attributes a real provider would report for each kind
fn synthesize(kind: ResourceKind, name: &str, config: &Value) -> Attributes {
    let id = short_id(name, config);
    let attributes = match kind {
        ResourceKind::Network => json!({
            "network_id": format!("net-{}", id),
            "subnet_ids": [format!("subnet-{}-public-0", id)],
        }),
        ResourceKind::AccessRule => json!({
            "rule_id": format!("rule-{}", id),
        }),
        ResourceKind::Database => json!({
            "instance_id": format!("db-{}", id),
            "address": format!("{}.{}.db.internal", name, id),
            "port": config.get("port").cloned().unwrap_or(Value::from(5432)),
            "secret_id": format!("secret-{}", id),
        }),
        ResourceKind::ComputeFunction => json!({
            "function_id": format!("fn-{}", id),
            "invoke_arn": format!("arn:sim:function:{}:{}", name, id),
        }),
        ResourceKind::HttpEndpoint => json!({
            "endpoint_id": format!("api-{}", id),
            "url": format!("https://{}.execute.sim.local/", id),
        }),
    };

    match attributes {
        Value::Object(map) => map.into_iter().collect(),
        _ => Attributes::new(),
    }
}
