//! Dependency Graph Builder
//!
//! Derives edges from attribute references and explicit dependency
//! declarations, then validates the result:
//!
//! 1. every referenced name exists (`UnknownResource`)
//! 2. the graph is acyclic (`CyclicDependency`, three-colour DFS)
//! 3. references to later-declared resources are backed by an explicit
//!    dependency (`ForwardReference`)
//!
//! The validated graph is immutable. Apply order is Kahn's algorithm with
//! ties broken by declaration order, so identical declarations always yield
//! the same order.

use super::topology::Topology;
use crate::error::GraphError;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, VecDeque};

/// Node marking for cycle detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Validated DAG over a topology's resources, indexed by declaration position
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    names: Vec<String>,
    /// `dependencies[b]` holds every `a` with an edge a -> b
    dependencies: Vec<BTreeSet<usize>>,
    /// `dependents[a]` holds every `b` with an edge a -> b
    dependents: Vec<BTreeSet<usize>>,
}

impl DependencyGraph {
    pub fn build(topology: &Topology) -> Result<Self, GraphError> {
        let count = topology.len();
        let mut graph = Self {
            names: topology
                .resources()
                .iter()
                .map(|r| r.name().to_string())
                .collect(),
            dependencies: vec![BTreeSet::new(); count],
            dependents: vec![BTreeSet::new(); count],
        };

        for (to, resource) in topology.resources().iter().enumerate() {
            for name in resource.dependency_names() {
                let from =
                    topology
                        .position(name)
                        .ok_or_else(|| GraphError::UnknownResource {
                            resource: name.to_string(),
                            referenced_by: resource.name().to_string(),
                        })?;
                graph.dependencies[to].insert(from);
                graph.dependents[from].insert(to);
            }
        }

        graph.detect_cycle()?;

        for (position, resource) in topology.resources().iter().enumerate() {
            for name in resource.referenced_names() {
                let declared_later = topology.position(name).is_some_and(|p| p > position);
                let explicit = resource.explicit_dependencies().iter().any(|d| d == name);
                if declared_later && !explicit {
                    return Err(GraphError::ForwardReference {
                        resource: resource.name().to_string(),
                        target: name.to_string(),
                    });
                }
            }
        }

        tracing::debug!(resources = count, edges = graph.edge_count(), "Dependency graph built");
        Ok(graph)
    }

    fn detect_cycle(&self) -> Result<(), GraphError> {
        let mut marks = vec![Mark::Unvisited; self.names.len()];
        let mut path = Vec::new();
        for start in 0..self.names.len() {
            if marks[start] == Mark::Unvisited {
                if let Some(cycle) = self.visit(start, &mut marks, &mut path) {
                    return Err(GraphError::CyclicDependency {
                        members: cycle.into_iter().map(|i| self.names[i].clone()).collect(),
                    });
                }
            }
        }
        Ok(())
    }

    /// DFS along dependency -> dependent edges; a back-edge to an in-progress
    /// node closes a cycle made of the path suffix starting at that node.
    fn visit(&self, node: usize, marks: &mut [Mark], path: &mut Vec<usize>) -> Option<Vec<usize>> {
        marks[node] = Mark::InProgress;
        path.push(node);
        for &next in &self.dependents[node] {
            match marks[next] {
                Mark::InProgress => {
                    let start = path.iter().position(|&n| n == next).unwrap_or(0);
                    return Some(path[start..].to_vec());
                }
                Mark::Unvisited => {
                    if let Some(cycle) = self.visit(next, marks, path) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }
        path.pop();
        marks[node] = Mark::Done;
        None
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.dependents.iter().map(BTreeSet::len).sum()
    }

    pub fn name(&self, index: usize) -> &str {
        &self.names[index]
    }

    pub fn dependencies(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.dependencies[index].iter().copied()
    }

    pub fn dependents(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.dependents[index].iter().copied()
    }

    /// Stable topological order (declaration order breaks ties)
    pub fn topological_order(&self) -> Vec<usize> {
        let mut remaining: Vec<usize> = self.dependencies.iter().map(BTreeSet::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = remaining
            .iter()
            .enumerate()
            .filter(|(_, n)| **n == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.names.len());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for next in self.dependents(node) {
                remaining[next] -= 1;
                if remaining[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }
        order
    }

    /// Names in stable topological order
    pub fn ordered_names(&self) -> Vec<&str> {
        self.topological_order()
            .into_iter()
            .map(|i| self.names[i].as_str())
            .collect()
    }

    /// Every resource reachable from `index` along dependency edges, sorted
    pub fn transitive_dependents(&self, index: usize) -> Vec<usize> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<usize> = self.dependents(index).collect();
        while let Some(node) = queue.pop_front() {
            if seen.insert(node) {
                queue.extend(self.dependents(node));
            }
        }
        seen.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Resource, ResourceHandle, ResourceKind};

    fn handle(name: &str) -> ResourceHandle {
        ResourceHandle::new(name)
    }

    fn service_topology() -> Topology {
        let mut t = Topology::new("svc");
        let net = t.declare(Resource::new("net", ResourceKind::Network)).unwrap();
        let rule = t
            .declare(
                Resource::new("rule", ResourceKind::AccessRule)
                    .with("network_id", net.attr("network_id")),
            )
            .unwrap();
        let db = t
            .declare(
                Resource::new("db", ResourceKind::Database)
                    .depends_on(&net)
                    .depends_on(&rule),
            )
            .unwrap();
        t.declare(
            Resource::new("fn", ResourceKind::ComputeFunction).with("DB_HOST", db.attr("address")),
        )
        .unwrap();
        t
    }

    #[test]
    fn test_order_respects_dependencies() {
        let graph = DependencyGraph::build(&service_topology()).unwrap();
        assert_eq!(graph.ordered_names(), vec!["net", "rule", "db", "fn"]);
        assert_eq!(graph.edge_count(), 4);
    }

    #[test]
    fn test_ties_break_by_declaration_order() {
        let mut t = Topology::new("svc");
        let root = t.declare(Resource::new("root", ResourceKind::Network)).unwrap();
        for name in ["c", "a", "b"] {
            t.declare(Resource::new(name, ResourceKind::AccessRule).depends_on(&root))
                .unwrap();
        }
        let graph = DependencyGraph::build(&t).unwrap();
        assert_eq!(graph.ordered_names(), vec!["root", "c", "a", "b"]);
    }

    #[test]
    fn test_unknown_resource() {
        let mut t = Topology::new("svc");
        t.declare(Resource::new("fn", ResourceKind::ComputeFunction).with("DB_HOST", handle("db").attr("address")))
            .unwrap();
        let err = DependencyGraph::build(&t).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownResource {
                resource: "db".into(),
                referenced_by: "fn".into()
            }
        );
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let mut t = Topology::new("svc");
        t.declare(Resource::new("db", ResourceKind::Database).with("me", handle("db").attr("address")))
            .unwrap();
        let err = DependencyGraph::build(&t).unwrap_err();
        assert_eq!(err, GraphError::CyclicDependency { members: vec!["db".into()] });
    }

    #[test]
    fn test_cycle_names_every_member() {
        let mut t = Topology::new("svc");
        t.declare(Resource::new("entry", ResourceKind::Network)).unwrap();
        t.declare(Resource::new("a", ResourceKind::Network).depends_on(&handle("c")))
            .unwrap();
        t.declare(Resource::new("b", ResourceKind::AccessRule).depends_on(&handle("a")))
            .unwrap();
        t.declare(Resource::new("c", ResourceKind::Database).depends_on(&handle("b")))
            .unwrap();

        let Err(GraphError::CyclicDependency { mut members }) = DependencyGraph::build(&t) else {
            panic!("expected a cycle");
        };
        members.sort();
        assert_eq!(members, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_forward_reference_needs_explicit_dependency() {
        let mut t = Topology::new("svc");
        t.declare(Resource::new("fn", ResourceKind::ComputeFunction).with("DB_HOST", handle("db").attr("address")))
            .unwrap();
        t.declare(Resource::new("db", ResourceKind::Database)).unwrap();
        assert!(matches!(
            DependencyGraph::build(&t),
            Err(GraphError::ForwardReference { .. })
        ));

        let mut t = Topology::new("svc");
        t.declare(
            Resource::new("fn", ResourceKind::ComputeFunction)
                .with("DB_HOST", handle("db").attr("address"))
                .depends_on(&handle("db")),
        )
        .unwrap();
        t.declare(Resource::new("db", ResourceKind::Database)).unwrap();
        let graph = DependencyGraph::build(&t).unwrap();
        assert_eq!(graph.ordered_names(), vec!["db", "fn"]);
    }

    #[test]
    fn test_transitive_dependents() {
        let graph = DependencyGraph::build(&service_topology()).unwrap();
        assert_eq!(graph.transitive_dependents(0), vec![1, 2, 3]);
        assert_eq!(graph.transitive_dependents(2), vec![3]);
        assert!(graph.transitive_dependents(3).is_empty());
    }
}
