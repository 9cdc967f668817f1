//! Topology - the declared set of resources, in declaration order

use super::resource::{AttributeRef, Resource, ResourceHandle};
use crate::error::GraphError;
use serde_json::Value;
use std::collections::HashMap;

/// All resources declared for one service
#[derive(Debug, Clone, Default)]
pub struct Topology {
    name: String,
    resources: Vec<Resource>,
    index: HashMap<String, usize>,
}

impl Topology {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a resource; names are unique within a topology
    pub fn declare(&mut self, resource: Resource) -> Result<ResourceHandle, GraphError> {
        if self.index.contains_key(resource.name()) {
            return Err(GraphError::DuplicateResource(resource.name().to_string()));
        }
        let handle = ResourceHandle::new(resource.name());
        self.index
            .insert(resource.name().to_string(), self.resources.len());
        self.resources.push(resource);
        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.position(name).map(|i| &self.resources[i])
    }

    pub fn resource_mut(&mut self, name: &str) -> Option<&mut Resource> {
        self.position(name).map(move |i| &mut self.resources[i])
    }

    pub(crate) fn at(&self, index: usize) -> &Resource {
        &self.resources[index]
    }

    pub(crate) fn at_mut(&mut self, index: usize) -> &mut Resource {
        &mut self.resources[index]
    }

    /// Resolve a reference against the current realized state.
    ///
    /// Fails fast with `UnresolvedAttribute` when the source has not been
    /// realized; there is no placeholder value.
    pub fn resolve(&self, reference: &AttributeRef) -> Result<Value, GraphError> {
        let source = self
            .resource(&reference.resource)
            .ok_or_else(|| GraphError::DanglingReference {
                resource: reference.resource.clone(),
                reference: reference.to_string(),
            })?;
        source.attribute(&reference.attribute).cloned()
    }
}
