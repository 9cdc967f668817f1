//! Plan - diff the declared topology against recorded state
//!
//! References whose source is unchanged resolve from recorded attributes. A
//! reference into a resource that will be created or updated has no value yet,
//! so its dependent is shown as changing with the value known after apply.

use super::report::{Plan, PlannedAction, PlannedChange};
use crate::graph::{AttributeRef, Attributes, DependencyGraph, Topology};
use crate::state::{fingerprint, StateStore};
use serde_json::Value;
use std::collections::HashMap;

pub(crate) fn compute(topology: &Topology, graph: &DependencyGraph, state: &StateStore) -> Plan {
    let order = graph.topological_order();
    // attributes of resources the plan leaves untouched
    let mut settled: HashMap<&str, &Attributes> = HashMap::new();
    let mut changes = Vec::with_capacity(order.len());

    for &index in &order {
        let resource = topology.at(index);
        let lookup = |r: &AttributeRef| -> Option<Value> {
            settled
                .get(r.resource.as_str())
                .and_then(|attrs| attrs.get(&r.attribute))
                .cloned()
        };
        let recorded = state.get(resource.name()).is_some();
        let changed = if recorded {
            PlannedAction::Update
        } else {
            PlannedAction::Create
        };

        let mut settle = None;
        let change = match resource.resolve_config(&lookup, false) {
            Ok(literal) => {
                let fp = fingerprint(resource.kind(), &literal);
                settle = state.unchanged(resource.name(), resource.kind(), &fp);
                PlannedChange {
                    name: resource.name().to_string(),
                    kind: resource.kind(),
                    action: if settle.is_some() {
                        PlannedAction::NoChange
                    } else {
                        changed
                    },
                    config: resource.resolve_config(&lookup, true).ok(),
                    pending_refs: Vec::new(),
                }
            }
            Err(_) => {
                let mut refs = Vec::new();
                for value in resource.config().values() {
                    value.collect_refs(&mut refs);
                }
                let mut pending_refs: Vec<String> = Vec::new();
                for r in refs.into_iter().filter(|r| lookup(*r).is_none()) {
                    let label = r.to_string();
                    if !pending_refs.contains(&label) {
                        pending_refs.push(label);
                    }
                }
                PlannedChange {
                    name: resource.name().to_string(),
                    kind: resource.kind(),
                    action: changed,
                    config: None,
                    pending_refs,
                }
            }
        };

        if let Some(attributes) = settle {
            settled.insert(resource.name(), attributes);
        }
        tracing::debug!(resource = %change.name, action = ?change.action, "Planned");
        changes.push(change);
    }

    Plan {
        topology: topology.name().to_string(),
        order: order.iter().map(|&i| graph.name(i).to_string()).collect(),
        changes,
        orphaned: state.orphans(topology),
    }
}
