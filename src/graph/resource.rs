//! Resources and Attribute References
//!
//! A [`Resource`] is a declared node: a kind, a configuration and, once
//! realized, the attributes the provider produced for it. Configuration values
//! may be [`AttributeRef`]s into other resources; those are substituted with
//! literals by the engine in dependency order.

use crate::error::GraphError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Attributes produced by the provider for a realized resource
pub type Attributes = BTreeMap<String, Value>;

/// Placeholder shown wherever a sensitive value would be rendered
pub const SENSITIVE_PLACEHOLDER: &str = "(sensitive)";

/// Kinds of infrastructure the graph knows how to realize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Network,
    AccessRule,
    Database,
    ComputeFunction,
    HttpEndpoint,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::AccessRule => "access_rule",
            Self::Database => "database",
            Self::ComputeFunction => "compute_function",
            Self::HttpEndpoint => "http_endpoint",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a resource within one apply run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RealizedState {
    #[default]
    Absent,
    Pending,
    Realized,
    Failed,
    /// Not attempted: a dependency failed or the run was cancelled
    Skipped,
}

impl RealizedState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Realized | Self::Failed | Self::Skipped)
    }
}

/// Lazy handle to an attribute another resource produces once realized
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttributeRef {
    pub resource: String,
    pub attribute: String,
}

impl AttributeRef {
    pub fn new(resource: &str, attribute: &str) -> Self {
        Self {
            resource: resource.to_string(),
            attribute: attribute.to_string(),
        }
    }
}

impl fmt::Display for AttributeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.attribute)
    }
}

/// A configuration value: a literal, a reference, or a nesting of both
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Literal(Value),
    /// Literal passed to the provider but never rendered
    Sensitive(Value),
    Ref(AttributeRef),
    List(Vec<ConfigValue>),
    Map(BTreeMap<String, ConfigValue>),
}

impl ConfigValue {
    pub fn sensitive(value: impl Into<Value>) -> Self {
        Self::Sensitive(value.into())
    }

    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ConfigValue>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ConfigValue>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Collect every attribute reference contained in this value
    pub fn collect_refs<'a>(&'a self, out: &mut Vec<&'a AttributeRef>) {
        match self {
            Self::Literal(_) | Self::Sensitive(_) => {}
            Self::Ref(r) => out.push(r),
            Self::List(items) => items.iter().for_each(|v| v.collect_refs(out)),
            Self::Map(entries) => entries.values().for_each(|v| v.collect_refs(out)),
        }
    }

    /// Substitute references through `lookup`.
    ///
    /// Returns the first reference `lookup` could not satisfy. With `redact`
    /// set, sensitive literals are replaced by [`SENSITIVE_PLACEHOLDER`].
    pub fn resolve<F>(&self, lookup: &F, redact: bool) -> Result<Value, AttributeRef>
    where
        F: Fn(&AttributeRef) -> Option<Value>,
    {
        Ok(match self {
            Self::Literal(v) => v.clone(),
            Self::Sensitive(v) => {
                if redact {
                    Value::String(SENSITIVE_PLACEHOLDER.to_string())
                } else {
                    v.clone()
                }
            }
            Self::Ref(r) => lookup(r).ok_or_else(|| r.clone())?,
            Self::List(items) => Value::Array(
                items
                    .iter()
                    .map(|v| v.resolve(lookup, redact))
                    .collect::<Result<_, _>>()?,
            ),
            Self::Map(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    map.insert(key.clone(), value.resolve(lookup, redact)?);
                }
                Value::Object(map)
            }
        })
    }
}

impl From<Value> for ConfigValue {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::Literal(Value::String(value.to_string()))
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        Self::Literal(Value::String(value))
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        Self::Literal(Value::Bool(value))
    }
}

impl From<u16> for ConfigValue {
    fn from(value: u16) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<u32> for ConfigValue {
    fn from(value: u32) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<AttributeRef> for ConfigValue {
    fn from(value: AttributeRef) -> Self {
        Self::Ref(value)
    }
}

/// Handle returned when a resource is declared; used to build references to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandle {
    name: String,
}

impl ResourceHandle {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reference to one of this resource's produced attributes
    pub fn attr(&self, attribute: &str) -> AttributeRef {
        AttributeRef::new(&self.name, attribute)
    }
}

/// A declared piece of infrastructure
#[derive(Debug, Clone)]
pub struct Resource {
    name: String,
    kind: ResourceKind,
    config: BTreeMap<String, ConfigValue>,
    depends_on: Vec<String>,
    state: RealizedState,
    resolved: Option<Value>,
    attributes: Attributes,
}

impl Resource {
    pub fn new(name: &str, kind: ResourceKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            config: BTreeMap::new(),
            depends_on: Vec::new(),
            state: RealizedState::Absent,
            resolved: None,
            attributes: Attributes::new(),
        }
    }

    /// Builder-style configuration option
    pub fn with(mut self, option: &str, value: impl Into<ConfigValue>) -> Self {
        self.config.insert(option.to_string(), value.into());
        self
    }

    /// Declare an ordering dependency that has no attribute reference
    pub fn depends_on(mut self, handle: &ResourceHandle) -> Self {
        if !self.depends_on.iter().any(|d| d == handle.name()) {
            self.depends_on.push(handle.name().to_string());
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn config(&self) -> &BTreeMap<String, ConfigValue> {
        &self.config
    }

    pub fn explicit_dependencies(&self) -> &[String] {
        &self.depends_on
    }

    pub fn state(&self) -> RealizedState {
        self.state
    }

    /// Names of every resource this one needs, references first, deduplicated
    pub fn dependency_names(&self) -> Vec<&str> {
        let mut refs = Vec::new();
        for value in self.config.values() {
            value.collect_refs(&mut refs);
        }
        let mut names: Vec<&str> = Vec::new();
        for name in refs
            .iter()
            .map(|r| r.resource.as_str())
            .chain(self.depends_on.iter().map(String::as_str))
        {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Names that appear in references only (not explicit declarations)
    pub fn referenced_names(&self) -> Vec<&str> {
        let mut refs = Vec::new();
        for value in self.config.values() {
            value.collect_refs(&mut refs);
        }
        let mut names: Vec<&str> = Vec::new();
        for r in refs {
            if !names.contains(&r.resource.as_str()) {
                names.push(&r.resource);
            }
        }
        names
    }

    pub fn set_config(&mut self, option: &str, value: impl Into<ConfigValue>) -> Result<(), GraphError> {
        if self.state == RealizedState::Realized {
            return Err(GraphError::ImmutableAfterRealization {
                resource: self.name.clone(),
                option: option.to_string(),
            });
        }
        self.config.insert(option.to_string(), value.into());
        Ok(())
    }

    /// Read a produced attribute; only valid once realized
    pub fn attribute(&self, attribute: &str) -> Result<&Value, GraphError> {
        let unresolved = || GraphError::UnresolvedAttribute {
            resource: self.name.clone(),
            attribute: attribute.to_string(),
        };
        if self.state != RealizedState::Realized {
            return Err(unresolved());
        }
        self.attributes.get(attribute).ok_or_else(unresolved)
    }

    /// Produced attributes; empty unless realized
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// The literal configuration the provider received (or would receive)
    pub fn resolved_config(&self) -> Option<&Value> {
        self.resolved.as_ref()
    }

    /// Resolve the whole configuration into a literal JSON object
    pub fn resolve_config<F>(&self, lookup: &F, redact: bool) -> Result<Value, AttributeRef>
    where
        F: Fn(&AttributeRef) -> Option<Value>,
    {
        let mut map = Map::new();
        for (option, value) in &self.config {
            map.insert(option.clone(), value.resolve(lookup, redact)?);
        }
        Ok(Value::Object(map))
    }

    pub(crate) fn begin_run(&mut self) {
        self.state = RealizedState::Absent;
        self.resolved = None;
        self.attributes.clear();
    }

    pub(crate) fn mark_pending(&mut self, resolved: Value) {
        self.state = RealizedState::Pending;
        self.resolved = Some(resolved);
    }

    pub(crate) fn mark_realized(&mut self, attributes: Attributes) {
        self.state = RealizedState::Realized;
        self.attributes = attributes;
    }

    pub(crate) fn mark_failed(&mut self) {
        self.state = RealizedState::Failed;
    }

    pub(crate) fn mark_skipped(&mut self) {
        self.state = RealizedState::Skipped;
    }
}
