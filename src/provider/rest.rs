//! REST Provisioner
//!
//! Realizes resources through a provisioning API:
//!
//! ```text
//! PUT {endpoint}/v1/projects/{project}/resources/{kind}/{name}
//!     { "kind": ..., "name": ..., "config": {...} }
//! ```
//!
//! The API answers either with `{ "attributes": {...} }` or with a long-running
//! `{ "operation": { "name": ..., "done": false } }`, which is polled at
//! `{endpoint}/v1/{operation name}` until it is done or the timeout elapses.

use super::auth::Credentials;
use super::http::ProviderHttpClient;
use super::Provisioner;
use crate::graph::{Attributes, ResourceKind};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Status of a long-running provisioning operation
#[derive(Debug, Clone, PartialEq)]
pub enum OperationStatus {
    Done(Attributes),
    Failed(String),
    Running,
}

#[derive(Clone)]
pub struct RestProvisioner {
    http: ProviderHttpClient,
    credentials: Credentials,
    endpoint: Url,
    project: String,
    poll_interval: Duration,
    operation_timeout: Duration,
}

impl RestProvisioner {
    pub fn new(endpoint: &str, project: &str, credentials: Credentials) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .with_context(|| format!("Invalid provider endpoint '{}'", endpoint))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            anyhow::bail!("Provider endpoint must be http or https, got '{}'", endpoint.scheme());
        }
        if project.is_empty() {
            anyhow::bail!("Provider project must not be empty");
        }

        Ok(Self {
            http: ProviderHttpClient::new()?,
            credentials,
            endpoint,
            project: project.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        })
    }

    pub fn with_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.operation_timeout = timeout;
        self
    }

    fn base(&self) -> &str {
        self.endpoint.as_str().trim_end_matches('/')
    }

    pub fn resource_url(&self, kind: ResourceKind, name: &str) -> String {
        format!(
            "{}/v1/projects/{}/resources/{}/{}",
            self.base(),
            urlencoding::encode(&self.project),
            kind,
            urlencoding::encode(name)
        )
    }

    pub fn operation_url(&self, operation: &str) -> String {
        format!("{}/v1/{}", self.base(), operation.trim_start_matches('/'))
    }

    async fn wait_for(&self, operation: &str) -> Result<Attributes> {
        tokio::time::timeout(self.operation_timeout, self.poll_until_done(operation))
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Operation {} did not finish within {}s",
                    operation,
                    self.operation_timeout.as_secs()
                )
            })?
    }

    async fn poll_until_done(&self, operation: &str) -> Result<Attributes> {
        let url = self.operation_url(operation);
        loop {
            tokio::time::sleep(self.poll_interval).await;
            let token = self.credentials.token().await?;
            let response = self.http.get(&url, &token).await?;
            match parse_operation(&response) {
                OperationStatus::Done(attributes) => return Ok(attributes),
                OperationStatus::Failed(message) => {
                    return Err(anyhow::anyhow!("Operation {} failed: {}", operation, message))
                }
                OperationStatus::Running => {
                    tracing::debug!(operation, "Operation still running");
                }
            }
        }
    }
}

#[async_trait]
impl Provisioner for RestProvisioner {
    async fn realize(&self, kind: ResourceKind, name: &str, config: &Value) -> Result<Attributes> {
        let url = self.resource_url(kind, name);
        let token = self.credentials.token().await?;
        let body = json!({ "kind": kind, "name": name, "config": config });

        let response = self.http.put(&url, &token, &body).await?;

        if let Some(attributes) = response.get("attributes") {
            return parse_attributes(attributes);
        }

        let Some(operation) = response.get("operation") else {
            return Err(anyhow::anyhow!("Unexpected provider response for {}", name));
        };
        let operation_name = operation
            .get("name")
            .and_then(|v| v.as_str())
            .context("Operation response has no name")?;
        tracing::info!(resource = name, %kind, operation = operation_name, "Waiting for operation");

        match parse_operation(operation) {
            OperationStatus::Done(attributes) => Ok(attributes),
            OperationStatus::Failed(message) => Err(anyhow::anyhow!(
                "Operation {} failed: {}",
                operation_name,
                message
            )),
            OperationStatus::Running => self.wait_for(operation_name).await,
        }
    }
}

fn parse_attributes(value: &Value) -> Result<Attributes> {
    match value {
        Value::Object(map) => Ok(map.clone().into_iter().collect()),
        Value::Null => Ok(Attributes::new()),
        _ => Err(anyhow::anyhow!("Provider attributes must be an object")),
    }
}

/// Interpret an operation document
pub fn parse_operation(operation: &Value) -> OperationStatus {
    let done = operation.get("done").and_then(|v| v.as_bool()).unwrap_or(false);
    if !done {
        return OperationStatus::Running;
    }

    if let Some(error) = operation.get("error") {
        let message = error
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error");
        return OperationStatus::Failed(message.to_string());
    }

    let attributes = operation
        .get("response")
        .and_then(|r| r.get("attributes"))
        .map(parse_attributes);
    match attributes {
        Some(Ok(attributes)) => OperationStatus::Done(attributes),
        Some(Err(e)) => OperationStatus::Failed(e.to_string()),
        None => OperationStatus::Done(Attributes::new()),
    }
}
