//! Integration tests for plan and apply against the simulated provider
//!
//! These tests drive the engine end to end: ordering, skip propagation,
//! idempotence through recorded state, cancellation and the parallelism bound.

use async_trait::async_trait;
use serde_json::{json, Value};
use stackgraph::engine::{Engine, PlannedAction, ResourceOutcome};
use stackgraph::graph::{Attributes, RealizedState, Resource, ResourceKind, Topology};
use stackgraph::provider::{Provisioner, SimulatedProvisioner};
use stackgraph::state::StateStore;
use stackgraph::GraphError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn attributes(value: Value) -> Attributes {
    serde_json::from_value(value).unwrap()
}

/// N -> R -> D -> F, with F reading D's address
fn service_topology() -> Topology {
    let mut topology = Topology::new("service");
    let n = topology
        .declare(Resource::new("n", ResourceKind::Network).with("cidr_block", "10.0.0.0/16"))
        .unwrap();
    let r = topology
        .declare(
            Resource::new("r", ResourceKind::AccessRule)
                .with("network_id", n.attr("network_id"))
                .depends_on(&n),
        )
        .unwrap();
    let d = topology
        .declare(
            Resource::new("d", ResourceKind::Database)
                .with("network_id", n.attr("network_id"))
                .with("rule_id", r.attr("rule_id"))
                .with("size", "small"),
        )
        .unwrap();
    topology
        .declare(
            Resource::new("f", ResourceKind::ComputeFunction)
                .with("DB_HOST", d.attr("address")),
        )
        .unwrap();
    topology
}

/// Network -> A -> B, Network -> C
fn branching_topology() -> Topology {
    let mut topology = Topology::new("branches");
    let net = topology
        .declare(Resource::new("network", ResourceKind::Network))
        .unwrap();
    let a = topology
        .declare(Resource::new("a", ResourceKind::Database).with("network_id", net.attr("network_id")))
        .unwrap();
    topology
        .declare(Resource::new("b", ResourceKind::ComputeFunction).with("db", a.attr("address")))
        .unwrap();
    topology
        .declare(Resource::new("c", ResourceKind::AccessRule).with("network_id", net.attr("network_id")))
        .unwrap();
    topology
}

mod apply_tests {
    use super::*;

    /// F is configured with the database address and applied after D
    #[tokio::test]
    async fn test_reference_resolved_in_dependency_order() {
        let provider = Arc::new(SimulatedProvisioner::new());
        provider.set_attributes("d", attributes(json!({"address": "db.local"})));
        let engine = Engine::new(provider.clone());

        let mut topology = service_topology();
        let mut state = StateStore::default();
        let report = engine
            .apply(&mut topology, &mut state, &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.is_success());
        let f = topology.resource("f").unwrap();
        assert_eq!(f.state(), RealizedState::Realized);
        assert_eq!(f.resolved_config().unwrap()["DB_HOST"], "db.local");

        let order = provider.called_names();
        let d = order.iter().position(|n| n == "d").unwrap();
        let f = order.iter().position(|n| n == "f").unwrap();
        assert!(d < f);
        assert_eq!(order, vec!["n", "r", "d", "f"]);
    }

    /// A fails: B is skipped, independent C still realized
    #[tokio::test]
    async fn test_partial_failure_skips_only_dependents() {
        let provider = Arc::new(SimulatedProvisioner::new());
        provider.fail_on("a");
        let engine = Engine::new(provider.clone());

        let mut topology = branching_topology();
        let mut state = StateStore::default();
        let report = engine
            .apply(&mut topology, &mut state, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!report.is_success());
        assert_eq!(report.failed(), vec!["a"]);
        assert_eq!(
            report.outcome("b"),
            Some(&ResourceOutcome::Skipped {
                blocked_by: "a".into()
            })
        );
        assert_eq!(report.outcome("c"), Some(&ResourceOutcome::Created));
        assert_eq!(topology.resource("b").unwrap().state(), RealizedState::Skipped);
        assert_eq!(topology.resource("a").unwrap().state(), RealizedState::Failed);

        // only confirmed resources are recorded
        assert!(state.get("a").is_none());
        assert!(state.get("b").is_none());
        assert!(state.get("c").is_some());
        assert!(!provider.called_names().contains(&"b".to_string()));
    }

    /// The failure cause reaches the report
    #[tokio::test]
    async fn test_failure_carries_provider_cause() {
        let provider = Arc::new(SimulatedProvisioner::new());
        provider.fail_on("network");
        let engine = Engine::new(provider);

        let mut topology = branching_topology();
        let report = engine
            .apply(&mut topology, &mut StateStore::default(), &CancellationToken::new())
            .await
            .unwrap();

        match report.outcome("network") {
            Some(ResourceOutcome::Failed { error }) => {
                assert!(error.contains("simulated provider rejected network"))
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(report.skipped(), vec!["a", "b", "c"]);
    }

    /// Applying an unchanged topology twice makes no calls the second time
    #[tokio::test]
    async fn test_second_apply_is_idempotent() {
        let provider = Arc::new(SimulatedProvisioner::new());
        let engine = Engine::new(provider.clone());
        let mut state = StateStore::default();

        let mut first = service_topology();
        engine
            .apply(&mut first, &mut state, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(provider.call_count(), 4);

        let mut second = service_topology();
        let report = engine
            .apply(&mut second, &mut state, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(provider.call_count(), 4);
        assert!(report.started.is_empty());
        assert!(report
            .resources
            .iter()
            .all(|r| r.outcome == ResourceOutcome::Unchanged));
        assert_eq!(
            second.resource("f").unwrap().attributes(),
            first.resource("f").unwrap().attributes()
        );
    }

    /// Idempotence holds across a save and reload of the state file
    #[tokio::test]
    async fn test_state_survives_reload() {
        let path = std::env::temp_dir()
            .join(format!("stackgraph-it-{}", uuid::Uuid::new_v4()))
            .join("state.json");
        let provider = Arc::new(SimulatedProvisioner::new());
        let engine = Engine::new(provider.clone());

        let mut state = StateStore::load(&path).unwrap();
        engine
            .apply(&mut service_topology(), &mut state, &CancellationToken::new())
            .await
            .unwrap();
        state.save(&path).unwrap();

        let mut reloaded = StateStore::load(&path).unwrap();
        assert_eq!(reloaded.serial, 1);
        engine
            .apply(&mut service_topology(), &mut reloaded, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(provider.call_count(), 4);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    /// A changed option re-realizes that resource and everything reading from it
    #[tokio::test]
    async fn test_drift_updates_resource_and_dependents() {
        let provider = Arc::new(SimulatedProvisioner::new());
        provider.set_attributes("d", attributes(json!({"address": "db-a.local"})));
        let engine = Engine::new(provider.clone());
        let mut state = StateStore::default();

        engine
            .apply(&mut service_topology(), &mut state, &CancellationToken::new())
            .await
            .unwrap();

        provider.set_attributes("d", attributes(json!({"address": "db-b.local"})));
        let mut changed = service_topology();
        changed.resource_mut("d").unwrap().set_config("size", "large").unwrap();

        let report = engine
            .apply(&mut changed, &mut state, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.outcome("n"), Some(&ResourceOutcome::Unchanged));
        assert_eq!(report.outcome("r"), Some(&ResourceOutcome::Unchanged));
        assert_eq!(report.outcome("d"), Some(&ResourceOutcome::Updated));
        assert_eq!(report.outcome("f"), Some(&ResourceOutcome::Updated));
        assert_eq!(report.started, vec!["d", "f"]);
        assert_eq!(
            changed.resource("f").unwrap().resolved_config().unwrap()["DB_HOST"],
            "db-b.local"
        );
    }

    /// A resource fixed after a failed run is picked up on the next one
    #[tokio::test]
    async fn test_retry_after_failure() {
        let provider = Arc::new(SimulatedProvisioner::new());
        provider.fail_on("a");
        let engine = Engine::new(provider.clone());
        let mut state = StateStore::default();

        engine
            .apply(&mut branching_topology(), &mut state, &CancellationToken::new())
            .await
            .unwrap();
        provider.recover("a");

        let report = engine
            .apply(&mut branching_topology(), &mut state, &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.is_success());
        assert_eq!(report.outcome("a"), Some(&ResourceOutcome::Created));
        assert_eq!(report.outcome("b"), Some(&ResourceOutcome::Created));
        assert_eq!(report.outcome("c"), Some(&ResourceOutcome::Unchanged));
    }

    /// Realized resources reject configuration changes
    #[tokio::test]
    async fn test_realized_resource_is_immutable() {
        let engine = Engine::new(Arc::new(SimulatedProvisioner::new()));
        let mut topology = branching_topology();
        engine
            .apply(&mut topology, &mut StateStore::default(), &CancellationToken::new())
            .await
            .unwrap();

        let err = topology
            .resource_mut("c")
            .unwrap()
            .set_config("description", "late")
            .unwrap_err();
        assert!(matches!(err, GraphError::ImmutableAfterRealization { .. }));
    }

    /// Graph errors abort before any provisioning call
    #[tokio::test]
    async fn test_graph_error_aborts_run() {
        let provider = Arc::new(SimulatedProvisioner::new());
        let engine = Engine::new(provider.clone());

        let mut topology = Topology::new("broken");
        topology
            .declare(Resource::new("net", ResourceKind::Network))
            .unwrap();
        topology
            .declare(
                Resource::new("fn", ResourceKind::ComputeFunction)
                    .with("db", stackgraph::graph::AttributeRef::new("ghost", "address")),
            )
            .unwrap();

        let err = engine
            .apply(&mut topology, &mut StateStore::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownResource {
                resource: "ghost".into(),
                referenced_by: "fn".into()
            }
        );
        assert_eq!(provider.call_count(), 0);
    }
}

mod plan_tests {
    use super::*;

    #[tokio::test]
    async fn test_plan_makes_no_calls() {
        let provider = Arc::new(SimulatedProvisioner::new());
        let engine = Engine::new(provider.clone());

        let plan = engine
            .plan(&service_topology(), &StateStore::default())
            .unwrap();
        assert_eq!(plan.order, vec!["n", "r", "d", "f"]);
        assert_eq!(plan.count(PlannedAction::Create), 4);
        assert_eq!(provider.call_count(), 0);

        // values from unrealized resources stay pending, never placeholders
        let f = plan.change("f").unwrap();
        assert!(f.config.is_none());
        assert_eq!(f.pending_refs, vec!["d.address"]);
    }

    #[tokio::test]
    async fn test_plan_after_apply_reports_no_changes() {
        let engine = Engine::new(Arc::new(SimulatedProvisioner::new()));
        let mut state = StateStore::default();
        engine
            .apply(&mut service_topology(), &mut state, &CancellationToken::new())
            .await
            .unwrap();

        let plan = engine.plan(&service_topology(), &state).unwrap();
        assert!(!plan.has_changes());
        assert!(plan.change("f").unwrap().config.is_some());

        let mut changed = service_topology();
        changed.resource_mut("d").unwrap().set_config("size", "large").unwrap();
        let plan = engine.plan(&changed, &state).unwrap();
        assert_eq!(plan.change("r").unwrap().action, PlannedAction::NoChange);
        assert_eq!(plan.change("d").unwrap().action, PlannedAction::Update);
        assert_eq!(plan.change("f").unwrap().action, PlannedAction::Update);
    }

    #[tokio::test]
    async fn test_plan_lists_orphans() {
        let engine = Engine::new(Arc::new(SimulatedProvisioner::new()));
        let mut state = StateStore::default();
        engine
            .apply(&mut branching_topology(), &mut state, &CancellationToken::new())
            .await
            .unwrap();

        let plan = engine.plan(&service_topology(), &state).unwrap();
        assert_eq!(plan.orphaned, vec!["a", "b", "c", "network"]);
    }
}

mod concurrency_tests {
    use super::*;

    /// Tracks the highest number of overlapping calls
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Provisioner for Gauge {
        async fn realize(&self, _: ResourceKind, name: &str, _: &Value) -> anyhow::Result<Attributes> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(attributes(json!({"id": name})))
        }
    }

    fn wide_topology(width: usize) -> Topology {
        let mut topology = Topology::new("wide");
        for i in 0..width {
            topology
                .declare(Resource::new(&format!("net-{i}"), ResourceKind::Network))
                .unwrap();
        }
        topology
    }

    #[tokio::test]
    async fn test_parallelism_bound_is_respected() {
        let gauge = Arc::new(Gauge {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let engine = Engine::new(gauge.clone()).with_parallelism(3);

        let report = engine
            .apply(&mut wide_topology(10), &mut StateStore::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.is_success());
        assert!(gauge.peak.load(Ordering::SeqCst) <= 3);
        assert!(gauge.peak.load(Ordering::SeqCst) >= 2);
        assert_eq!(report.started.len(), 10);
    }

    #[tokio::test]
    async fn test_independent_resources_start_in_declaration_order() {
        let provider = Arc::new(SimulatedProvisioner::new());
        let engine = Engine::new(provider.clone()).with_parallelism(1);
        engine
            .apply(&mut wide_topology(5), &mut StateStore::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            provider.called_names(),
            vec!["net-0", "net-1", "net-2", "net-3", "net-4"]
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start_provisions_nothing() {
        let provider = Arc::new(SimulatedProvisioner::new());
        let engine = Engine::new(provider.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut topology = service_topology();
        let report = engine
            .apply(&mut topology, &mut StateStore::default(), &cancel)
            .await
            .unwrap();
        assert!(report.cancelled);
        assert!(!report.is_success());
        assert_eq!(provider.call_count(), 0);
        assert!(report
            .resources
            .iter()
            .all(|r| r.outcome == ResourceOutcome::Cancelled));
    }

    #[tokio::test]
    async fn test_cancellation_lets_in_flight_calls_finish() {
        let provider = Arc::new(SimulatedProvisioner::new().with_latency(Duration::from_millis(100)));
        let engine = Engine::new(provider.clone());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let mut topology = service_topology();
        let mut state = StateStore::default();
        let report = engine.apply(&mut topology, &mut state, &cancel).await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.outcome("n"), Some(&ResourceOutcome::Created));
        assert!(state.get("n").is_some());
        assert_eq!(report.outcome("f"), Some(&ResourceOutcome::Cancelled));
        assert_eq!(provider.called_names(), vec!["n"]);
    }
}

mod cart_tests {
    use super::*;
    use stackgraph::topology::{self, settings, MapSource, Package, ServiceSettings};

    fn cart() -> Topology {
        let source = MapSource::new()
            .set(settings::DB_PORT, "5432")
            .set(settings::DB_NAME, "cart")
            .set(settings::DB_USERNAME, "postgres")
            .set(settings::DB_USER, "cart_app")
            .set(settings::DB_PASSWORD, "s3cret")
            .set(settings::DB_ALLOWED_SOURCE, "203.0.113.7");
        let settings = ServiceSettings::from_source(&source).unwrap();
        let package = Package {
            entry: "dist/src/main.js".into(),
            handler: "handler".into(),
            digest: "0123abcd".into(),
            file_count: 1,
            external_modules: vec![],
            node_modules: vec!["nestjs".into()],
        };
        topology::define(&settings, &package).unwrap()
    }

    #[tokio::test]
    async fn test_cart_service_applies_end_to_end() {
        let provider = Arc::new(SimulatedProvisioner::new());
        let engine = Engine::new(provider.clone());
        let mut topology = cart();
        let mut state = StateStore::default();

        let report = engine
            .apply(&mut topology, &mut state, &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.is_success());
        assert_eq!(
            provider.called_names(),
            vec![
                topology::NETWORK,
                topology::ACCESS_RULE,
                topology::DATABASE,
                topology::FUNCTION,
                topology::ENDPOINT
            ]
        );

        let address = topology
            .resource(topology::DATABASE)
            .unwrap()
            .attribute("address")
            .unwrap()
            .clone();
        let function = topology.resource(topology::FUNCTION).unwrap();
        assert_eq!(function.resolved_config().unwrap()["environment"]["DB_HOST"], address);

        // the provider gets the real password, the state file never does
        let calls = provider.calls();
        let call = calls.iter().find(|c| c.name == topology::FUNCTION).unwrap();
        assert_eq!(call.config["environment"]["DB_PASSWORD"], "s3cret");
        let recorded = serde_json::to_string(&state).unwrap();
        assert!(!recorded.contains("s3cret"));

        assert!(topology
            .resource(topology::ENDPOINT)
            .unwrap()
            .attribute("url")
            .is_ok());
    }
}
