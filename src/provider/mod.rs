//! Provisioning collaborators
//!
//! The engine talks to the cloud through the [`Provisioner`] trait only. One
//! call is made per resource per apply, with a fully literal configuration;
//! the engine, not the provisioner, is responsible for avoiding duplicate calls.
//!
//! # Module Structure
//!
//! - [`simulated`] - in-memory provider with deterministic attributes
//! - [`auth`] - bearer credentials (static token or Application Default Credentials)
//! - [`http`] - HTTP helpers for the provisioning API
//! - [`rest`] - provisioner backed by a REST provisioning API with operation polling

pub mod auth;
pub mod http;
pub mod rest;
pub mod simulated;

use crate::graph::{Attributes, ResourceKind};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

pub use rest::RestProvisioner;
pub use simulated::SimulatedProvisioner;

/// Brings a resource's actual state in line with its literal configuration
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Realize `name` of `kind` and return the attributes it produced
    async fn realize(&self, kind: ResourceKind, name: &str, config: &Value) -> Result<Attributes>;
}
