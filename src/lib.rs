//! stackgraph - declarative resource graph
//!
//! Resources are declared in a [`graph::Topology`], wired together through
//! attribute references, validated into a [`graph::DependencyGraph`] and then
//! planned or applied by the [`engine::Engine`] against a
//! [`provider::Provisioner`].
//!
//! # Module Structure
//!
//! - [`graph`] - resources, references, topology and dependency graph
//! - [`engine`] - plan and apply
//! - [`state`] - persisted apply state for drift detection
//! - [`provider`] - provisioning collaborators
//! - [`topology`] - the cart-service stack
//! - [`config`] - user configuration
//! - [`error`] - error types

pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod provider;
pub mod state;
pub mod topology;

/// Version injected at compile time via STACKGRAPH_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("STACKGRAPH_VERSION") {
    Some(v) => v,
    None => "dev",
};

pub use engine::{ApplyReport, Engine, Plan};
pub use error::{GraphError, ProvisioningError};
pub use state::StateStore;
