//! Error Types
//!
//! Graph and definition errors are fatal and abort a run before any provisioning
//! call is made. Provisioning errors are per resource: they fail that resource,
//! skip its dependents and leave unrelated branches running.

use crate::graph::ResourceKind;

/// Errors raised while declaring, validating or resolving the resource graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("Cyclic dependency: {}", format_cycle(.members))]
    CyclicDependency { members: Vec<String> },

    #[error("Unknown resource '{resource}' referenced by '{referenced_by}'")]
    UnknownResource {
        resource: String,
        referenced_by: String,
    },

    #[error("Reference '{reference}' points at undeclared resource '{resource}'")]
    DanglingReference { resource: String, reference: String },

    #[error("Resource '{0}' is declared more than once")]
    DuplicateResource(String),

    #[error(
        "Resource '{resource}' references '{target}', which is declared later without an explicit dependency"
    )]
    ForwardReference { resource: String, target: String },

    #[error("Attribute '{attribute}' of '{resource}' is not available until the resource is realized")]
    UnresolvedAttribute { resource: String, attribute: String },

    #[error("Cannot set option '{option}' on '{resource}' after it has been realized")]
    ImmutableAfterRealization { resource: String, option: String },

    #[error("Required configuration value '{0}' is missing")]
    ConfigurationMissing(String),

    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidConfiguration { key: String, reason: String },
}

/// A provisioning call that did not succeed, with the provider's cause attached.
#[derive(Debug, thiserror::Error)]
#[error("Provisioning {kind} '{resource}' failed: {source}")]
pub struct ProvisioningError {
    pub resource: String,
    pub kind: ResourceKind,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl ProvisioningError {
    pub fn new(resource: &str, kind: ResourceKind, cause: anyhow::Error) -> Self {
        Self {
            resource: resource.to_string(),
            kind,
            source: cause.into(),
        }
    }
}

fn format_cycle(members: &[String]) -> String {
    match members.first() {
        Some(first) => format!("{} -> {}", members.join(" -> "), first),
        None => "<empty>".to_string(),
    }
}
