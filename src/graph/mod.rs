//! Declarative resource graph
//!
//! # Module Structure
//!
//! - [`resource`] - resources, configuration values and attribute references
//! - [`topology`] - the declaration-ordered set of resources for one service
//! - [`builder`] - dependency derivation, validation and stable ordering
//!
//! # Example
//!
//! ```
//! use stackgraph::graph::{DependencyGraph, Resource, ResourceKind, Topology};
//!
//! let mut topology = Topology::new("demo");
//! let net = topology.declare(Resource::new("net", ResourceKind::Network))?;
//! let db = topology.declare(
//!     Resource::new("db", ResourceKind::Database).with("network_id", net.attr("network_id")),
//! )?;
//! topology.declare(
//!     Resource::new("fn", ResourceKind::ComputeFunction).with("DB_HOST", db.attr("address")),
//! )?;
//!
//! let graph = DependencyGraph::build(&topology)?;
//! assert_eq!(graph.ordered_names(), vec!["net", "db", "fn"]);
//! # Ok::<(), stackgraph::GraphError>(())
//! ```

pub mod builder;
pub mod resource;
pub mod topology;

pub use builder::DependencyGraph;
pub use resource::{
    AttributeRef, Attributes, ConfigValue, RealizedState, Resource, ResourceHandle, ResourceKind,
    SENSITIVE_PLACEHOLDER,
};
pub use topology::Topology;
