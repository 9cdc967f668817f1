//! Plan/Apply Engine
//!
//! Builds and validates the dependency graph, then either previews the run
//! ([`Engine::plan`], no provisioning calls) or executes it
//! ([`Engine::apply`]). Graph errors abort before anything is provisioned;
//! provisioning errors are contained to the failing resource and its
//! dependents.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use stackgraph::engine::Engine;
//! use stackgraph::graph::{Resource, ResourceKind, Topology};
//! use stackgraph::provider::SimulatedProvisioner;
//! use stackgraph::state::StateStore;
//! use tokio_util::sync::CancellationToken;
//!
//! # tokio_test::block_on(async {
//! let mut topology = Topology::new("demo");
//! let net = topology.declare(Resource::new("net", ResourceKind::Network))?;
//! topology.declare(
//!     Resource::new("rule", ResourceKind::AccessRule).with("network_id", net.attr("network_id")),
//! )?;
//!
//! let engine = Engine::new(Arc::new(SimulatedProvisioner::new()));
//! let mut state = StateStore::default();
//! let report = engine
//!     .apply(&mut topology, &mut state, &CancellationToken::new())
//!     .await?;
//! assert!(report.is_success());
//! # Ok::<(), stackgraph::GraphError>(())
//! # }).unwrap();
//! ```

mod apply;
mod plan;
pub mod report;

pub use report::{
    ApplyReport, Plan, PlannedAction, PlannedChange, ResourceOutcome, ResourceReport,
};

use crate::error::GraphError;
use crate::graph::{DependencyGraph, Topology};
use crate::provider::Provisioner;
use crate::state::StateStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Default number of concurrent provisioning calls
pub const DEFAULT_PARALLELISM: usize = 4;

#[derive(Clone)]
pub struct Engine {
    provisioner: Arc<dyn Provisioner>,
    parallelism: usize,
}

impl Engine {
    pub fn new(provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            provisioner,
            parallelism: DEFAULT_PARALLELISM,
        }
    }

    /// Bound on concurrent provisioning calls (at least 1)
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Compute order and per-resource actions without provisioning anything
    pub fn plan(&self, topology: &Topology, state: &StateStore) -> Result<Plan, GraphError> {
        let graph = DependencyGraph::build(topology)?;
        Ok(plan::compute(topology, &graph, state))
    }

    /// Realize the topology, recording confirmed resources in `state`.
    ///
    /// Returns `Err` only for graph errors, before any provisioning call.
    /// Provisioning failures are reported per resource in the [`ApplyReport`].
    pub async fn apply(
        &self,
        topology: &mut Topology,
        state: &mut StateStore,
        cancel: &CancellationToken,
    ) -> Result<ApplyReport, GraphError> {
        let graph = DependencyGraph::build(topology)?;
        Ok(apply::run(
            Arc::clone(&self.provisioner),
            self.parallelism,
            topology,
            &graph,
            state,
            cancel,
        )
        .await)
    }
}
