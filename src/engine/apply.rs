//! Apply - realize resources in dependency order
//!
//! The scheduler owns the topology and the state for the whole run; worker
//! tasks only receive a literal configuration and hand back the provider's
//! answer, so no two tasks ever touch the same resource.
//!
//! 1. A resource becomes ready once every dependency has been realized.
//!    Ready resources start in declaration order, at most `parallelism` at once.
//! 2. References are substituted from the realized dependencies. If kind and
//!    fingerprint match the recorded state, the recorded attributes are reused
//!    and no provisioning call is made.
//! 3. A provider failure marks the resource failed and every transitive
//!    dependent skipped. Independent branches keep going.
//! 4. Once cancellation is observed nothing new starts; in-flight calls finish
//!    and are recorded.

use super::report::{ApplyReport, ResourceOutcome, ResourceReport};
use crate::error::{GraphError, ProvisioningError};
use crate::graph::{AttributeRef, Attributes, DependencyGraph, Topology};
use crate::provider::http::format_provider_error;
use crate::provider::Provisioner;
use crate::state::{fingerprint, StateStore};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Bookkeeping for a provisioning call in flight
struct InFlight {
    fingerprint: String,
    redacted: Value,
    existed: bool,
}

enum Prepared {
    Unchanged(Attributes),
    Call { literal: Value, call: InFlight },
}

struct Scheduler<'a> {
    topology: &'a mut Topology,
    graph: &'a DependencyGraph,
    state: &'a mut StateStore,
    outcomes: Vec<Option<ResourceOutcome>>,
    durations: Vec<Option<u64>>,
    remaining: Vec<usize>,
    ready: BinaryHeap<Reverse<usize>>,
}

impl<'a> Scheduler<'a> {
    fn new(topology: &'a mut Topology, graph: &'a DependencyGraph, state: &'a mut StateStore) -> Self {
        let count = graph.len();
        let remaining: Vec<usize> = (0..count).map(|i| graph.dependencies(i).count()).collect();
        let ready = remaining
            .iter()
            .enumerate()
            .filter(|(_, n)| **n == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        for index in 0..count {
            topology.at_mut(index).begin_run();
        }

        Self {
            topology,
            graph,
            state,
            outcomes: vec![None; count],
            durations: vec![None; count],
            remaining,
            ready,
        }
    }

    fn next_ready(&mut self) -> Option<usize> {
        self.ready.pop().map(|Reverse(index)| index)
    }

    /// Resolve references and decide whether a provisioning call is needed
    fn prepare(&mut self, index: usize) -> Result<Prepared, GraphError> {
        let topology = &*self.topology;
        let resource = topology.at(index);
        let lookup = |r: &AttributeRef| topology.resolve(r).ok();

        let literal = resource.resolve_config(&lookup, false).map_err(|r| {
            GraphError::UnresolvedAttribute {
                resource: r.resource.clone(),
                attribute: r.attribute.clone(),
            }
        })?;
        let redacted = resource
            .resolve_config(&lookup, true)
            .unwrap_or(Value::Null);
        let fp = fingerprint(resource.kind(), &literal);

        let prepared = match self.state.unchanged(resource.name(), resource.kind(), &fp) {
            Some(attributes) => Prepared::Unchanged(attributes.clone()),
            None => Prepared::Call {
                literal: literal.clone(),
                call: InFlight {
                    fingerprint: fp,
                    redacted,
                    existed: self.state.get(resource.name()).is_some(),
                },
            },
        };

        self.topology.at_mut(index).mark_pending(literal);
        Ok(prepared)
    }

    fn realized(&mut self, index: usize, attributes: Attributes, outcome: ResourceOutcome) {
        self.topology.at_mut(index).mark_realized(attributes);
        self.outcomes[index] = Some(outcome);

        for next in self.graph.dependents(index) {
            self.remaining[next] -= 1;
            if self.remaining[next] == 0 && self.outcomes[next].is_none() {
                self.ready.push(Reverse(next));
            }
        }
    }

    fn failed(&mut self, index: usize, error: String) {
        let name = self.graph.name(index).to_string();
        self.topology.at_mut(index).mark_failed();
        self.outcomes[index] = Some(ResourceOutcome::Failed { error });

        for dependent in self.graph.transitive_dependents(index) {
            if self.outcomes[dependent].is_none() {
                warn!(resource = self.graph.name(dependent), blocked_by = %name, "Skipped");
                self.topology.at_mut(dependent).mark_skipped();
                self.outcomes[dependent] = Some(ResourceOutcome::Skipped {
                    blocked_by: name.clone(),
                });
            }
        }
    }

    fn finish(self, run_id: String, started: Vec<String>, cancelled: bool) -> ApplyReport {
        let Scheduler {
            topology,
            state,
            outcomes,
            durations,
            ..
        } = self;

        let resources = outcomes
            .into_iter()
            .zip(durations)
            .enumerate()
            .map(|(index, (outcome, duration_ms))| {
                let resource = topology.at_mut(index);
                let outcome = outcome.unwrap_or_else(|| {
                    resource.mark_skipped();
                    ResourceOutcome::Cancelled
                });
                ResourceReport {
                    name: resource.name().to_string(),
                    kind: resource.kind(),
                    outcome,
                    duration_ms,
                }
            })
            .collect();

        state.last_run_id = Some(run_id.clone());

        ApplyReport {
            run_id,
            topology: topology.name().to_string(),
            resources,
            started,
            cancelled,
        }
    }
}

pub(crate) async fn run(
    provisioner: Arc<dyn Provisioner>,
    parallelism: usize,
    topology: &mut Topology,
    graph: &DependencyGraph,
    state: &mut StateStore,
    cancel: &CancellationToken,
) -> ApplyReport {
    let run_id = uuid::Uuid::new_v4().to_string();
    info!(run_id = %run_id, topology = topology.name(), resources = graph.len(), parallelism, "Apply started");

    let mut scheduler = Scheduler::new(topology, graph, state);
    let mut in_flight = FuturesUnordered::new();
    let mut calls: HashMap<usize, InFlight> = HashMap::new();
    let mut started = Vec::new();
    let mut cancelled = false;

    loop {
        while !cancelled && in_flight.len() < parallelism {
            if cancel.is_cancelled() {
                cancelled = true;
                warn!("Cancellation observed, no new resources will start");
                break;
            }
            let Some(index) = scheduler.next_ready() else {
                break;
            };

            let name = graph.name(index).to_string();
            match scheduler.prepare(index) {
                Ok(Prepared::Unchanged(attributes)) => {
                    info!(resource = %name, "No drift, skipping provisioning call");
                    scheduler.realized(index, attributes, ResourceOutcome::Unchanged);
                }
                Ok(Prepared::Call { literal, call }) => {
                    let kind = scheduler.topology.at(index).kind();
                    info!(resource = %name, %kind, update = call.existed, "Realizing");
                    calls.insert(index, call);
                    started.push(name.clone());

                    let provisioner = Arc::clone(&provisioner);
                    let task = tokio::spawn(async move {
                        let clock = Instant::now();
                        let result = provisioner.realize(kind, &name, &literal).await;
                        (result, clock.elapsed())
                    });
                    in_flight.push(task.map(move |joined| (index, joined)));
                }
                Err(e) => {
                    error!(resource = %name, error = %e, "Could not resolve configuration");
                    scheduler.failed(index, e.to_string());
                }
            }
        }

        if in_flight.is_empty() {
            break;
        }

        tokio::select! {
            Some((index, joined)) = in_flight.next() => {
                let call = calls.remove(&index);
                complete(&mut scheduler, index, call, joined);
            }
            _ = cancel.cancelled(), if !cancelled => {
                cancelled = true;
                warn!(in_flight = in_flight.len(), "Cancellation requested, waiting for in-flight calls");
            }
        }
    }

    let report = scheduler.finish(run_id, started, cancelled);
    info!(
        run_id = %report.run_id,
        realized = report.realized().len(),
        failed = report.failed().len(),
        skipped = report.skipped().len(),
        "Apply finished"
    );
    report
}

fn complete(
    scheduler: &mut Scheduler<'_>,
    index: usize,
    call: Option<InFlight>,
    joined: Result<(anyhow::Result<Attributes>, Duration), tokio::task::JoinError>,
) {
    let resource = scheduler.topology.at(index);
    let (name, kind) = (resource.name().to_string(), resource.kind());

    let (result, elapsed) = match joined {
        Ok(done) => done,
        Err(join_error) => (
            Err(anyhow::anyhow!("provisioning task aborted: {}", join_error)),
            Duration::ZERO,
        ),
    };
    scheduler.durations[index] = Some(elapsed.as_millis() as u64);

    match (result, call) {
        (Ok(attributes), Some(call)) => {
            debug!(resource = %name, attributes = attributes.len(), "Provider confirmed");
            scheduler.state.record(
                &name,
                kind,
                call.fingerprint,
                call.redacted,
                attributes.clone(),
            );
            let outcome = if call.existed {
                ResourceOutcome::Updated
            } else {
                ResourceOutcome::Created
            };
            info!(resource = %name, %kind, outcome = outcome.label(), elapsed_ms = elapsed.as_millis() as u64, "Realized");
            scheduler.realized(index, attributes, outcome);
        }
        (Ok(_), None) => {
            scheduler.failed(index, "provisioning call was not tracked".to_string());
        }
        (Err(cause), _) => {
            let message = format_provider_error(&cause);
            let err = ProvisioningError::new(&name, kind, cause);
            error!(error = %err, "Provisioning failed");
            scheduler.failed(index, message);
        }
    }
}
