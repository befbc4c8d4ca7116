//! Resource dependency graph.
//!
//! Resources are declared in order, each with an explicit `depends_on` set.
//! `finish()` resolves those names into a petgraph `DiGraph` (edges point
//! from prerequisite to dependent) and rejects unknown names and cycles.
//!
//! The engine consuming the graph is free to apply resources concurrently
//! whenever no edge orders them; `waves()` shows that freedom and
//! `ordering_gaps()` flags references that are not backed by an edge.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;

use indexmap::IndexMap;
use petgraph::Direction;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use tracing::debug;

use crate::error::{GraphError, GraphResult};
use crate::lifecycle::{self, SecretPhase};
use crate::types::{Output, Reference, Resource, ResourceKind, SecretRendering};

/// Accumulates declarations before the graph is sealed.
#[derive(Debug)]
pub struct GraphBuilder {
    stack: String,
    resources: IndexMap<String, Resource>,
    outputs: IndexMap<String, Output>,
}

impl GraphBuilder {
    pub fn new(stack: &str) -> Self {
        Self {
            stack: stack.to_string(),
            resources: IndexMap::new(),
            outputs: IndexMap::new(),
        }
    }

    /// Declare a resource. Names are unique within a stack.
    pub fn declare(&mut self, resource: Resource) -> GraphResult<()> {
        if self.resources.contains_key(&resource.name) {
            return Err(GraphError::DuplicateResource(resource.name));
        }
        debug!(
            resource = %resource.name,
            kind = resource.kind.label(),
            deps = resource.depends_on.len(),
            "resource declared"
        );
        self.resources.insert(resource.name.clone(), resource);
        Ok(())
    }

    /// Export a stack output.
    pub fn export(&mut self, output: Output) {
        self.outputs.insert(output.name.clone(), output);
    }

    /// Resolve dependency names into edges and seal the graph.
    pub fn finish(self) -> GraphResult<StackGraph> {
        let mut graph = DiGraph::with_capacity(self.resources.len(), 0);
        let mut nodes = HashMap::with_capacity(self.resources.len());
        for name in self.resources.keys() {
            nodes.insert(name.clone(), graph.add_node(name.clone()));
        }

        for resource in self.resources.values() {
            let to = nodes[&resource.name];
            for dep in &resource.depends_on {
                let from = *nodes.get(dep).ok_or_else(|| GraphError::UnknownDependency {
                    resource: resource.name.clone(),
                    dependency: dep.clone(),
                })?;
                graph.update_edge(from, to, "");
            }
            for reference in resource.references() {
                if !nodes.contains_key(&reference.resource) {
                    return Err(GraphError::UnknownReference {
                        resource: resource.name.clone(),
                        target: reference.resource.clone(),
                    });
                }
            }
        }

        for output in self.outputs.values() {
            let mut refs = Vec::new();
            output.value.collect_references(&mut refs);
            if let Some(missing) = refs.iter().find(|r| !nodes.contains_key(&r.resource)) {
                return Err(GraphError::UnknownReference {
                    resource: output.name.clone(),
                    target: missing.resource.clone(),
                });
            }
        }

        if let Err(cycle) = toposort(&graph, None) {
            return Err(GraphError::Cycle(graph[cycle.node_id()].clone()));
        }

        debug!(
            stack = %self.stack,
            resources = graph.node_count(),
            edges = graph.edge_count(),
            "resource graph sealed"
        );

        Ok(StackGraph {
            stack: self.stack,
            resources: self.resources,
            outputs: self.outputs,
            graph,
            nodes,
        })
    }
}

/// A sealed, acyclic resource graph for one stack.
#[derive(Debug, Clone)]
pub struct StackGraph {
    stack: String,
    resources: IndexMap<String, Resource>,
    outputs: IndexMap<String, Output>,
    graph: DiGraph<String, &'static str>,
    nodes: HashMap<String, NodeIndex>,
}

impl StackGraph {
    pub fn stack(&self) -> &str {
        &self.stack
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Resource> {
        self.resources.get(name)
    }

    /// Resources in declaration order.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn resources_of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &Resource> {
        self.resources.values().filter(move |r| r.kind == kind)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Output> {
        self.outputs.values()
    }

    pub fn output(&self, name: &str) -> Option<&Output> {
        self.outputs.get(name)
    }

    /// Topological order; among resources that are ready at the same time,
    /// the one declared first goes first.
    pub fn apply_order(&self) -> Vec<&Resource> {
        let mut indegree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();
        let mut ready: BinaryHeap<Reverse<usize>> = indegree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.resources.len());
        while let Some(Reverse(i)) = ready.pop() {
            let node = NodeIndex::new(i);
            order.push(&self.resources[i]);
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                indegree[next.index()] -= 1;
                if indegree[next.index()] == 0 {
                    ready.push(Reverse(next.index()));
                }
            }
        }
        order
    }

    /// Kahn layering: every resource in a wave has all its prerequisites
    /// in earlier waves, so a wave may be applied concurrently.
    pub fn waves(&self) -> Vec<Vec<&Resource>> {
        let mut indegree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();
        let mut current: Vec<usize> = (0..indegree.len()).filter(|i| indegree[*i] == 0).collect();
        let mut waves = Vec::new();

        while !current.is_empty() {
            let mut next = Vec::new();
            for &i in &current {
                for dependent in self
                    .graph
                    .neighbors_directed(NodeIndex::new(i), Direction::Outgoing)
                {
                    indegree[dependent.index()] -= 1;
                    if indegree[dependent.index()] == 0 {
                        next.push(dependent.index());
                    }
                }
            }
            next.sort_unstable();
            waves.push(current.iter().map(|&i| &self.resources[i]).collect());
            current = next;
        }
        waves
    }

    /// True when `before` is a transitive prerequisite of `after`.
    pub fn is_ordered_before(&self, before: &str, after: &str) -> bool {
        match (self.nodes.get(before), self.nodes.get(after)) {
            (Some(&a), Some(&b)) if a != b => has_path_connecting(&self.graph, a, b, None),
            _ => false,
        }
    }

    /// Direct prerequisites of a resource, in declaration order.
    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        let Some(&node) = self.nodes.get(name) else {
            return Vec::new();
        };
        let mut deps: Vec<usize> = self
            .graph
            .neighbors_directed(node, Direction::Incoming)
            .map(|n| n.index())
            .collect();
        deps.sort_unstable();
        deps.into_iter()
            .map(|i| self.resources[i].name.as_str())
            .collect()
    }

    /// Orderings the declared edges do not guarantee.
    pub fn ordering_gaps(&self) -> Vec<OrderingGap> {
        let mut gaps = Vec::new();
        for resource in self.resources.values() {
            for reference in resource.references() {
                if reference.resource != resource.name
                    && !self.is_ordered_before(&reference.resource, &resource.name)
                {
                    gaps.push(OrderingGap {
                        resource: resource.name.clone(),
                        prerequisite: reference.resource.clone(),
                        reason: GapReason::Reference(reference.clone()),
                    });
                }
            }
        }
        gaps.extend(lifecycle::lifecycle_gaps(self));
        gaps
    }

    /// Graphviz rendering of the dependency edges.
    pub fn to_dot(&self) -> String {
        format!("{}", Dot::with_config(&self.graph, &[Config::EdgeNoLabel]))
    }

    /// Serializable view: resources in apply order plus waves and outputs.
    /// Secrets appear as fingerprints.
    pub fn document(&self) -> GraphDocument<'_> {
        self.render_document(SecretRendering::Fingerprint)
    }

    /// The view the engine applies: secret payloads are included.
    pub fn engine_document(&self) -> GraphDocument<'_> {
        self.render_document(SecretRendering::Reveal)
    }

    fn render_document(&self, secrets: SecretRendering) -> GraphDocument<'_> {
        GraphDocument {
            stack: &self.stack,
            resources: self
                .apply_order()
                .into_iter()
                .map(|r| ResourceEntry {
                    name: &r.name,
                    kind: r.kind,
                    type_token: r.kind.type_token(),
                    depends_on: &r.depends_on,
                    properties: r.render_properties(secrets),
                })
                .collect(),
            waves: self
                .waves()
                .into_iter()
                .map(|w| w.into_iter().map(|r| r.name.as_str()).collect())
                .collect(),
            outputs: self.outputs.values().collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GraphDocument<'a> {
    pub stack: &'a str,
    pub resources: Vec<ResourceEntry<'a>>,
    pub waves: Vec<Vec<&'a str>>,
    pub outputs: Vec<&'a Output>,
}

#[derive(Debug, Serialize)]
pub struct ResourceEntry<'a> {
    pub name: &'a str,
    pub kind: ResourceKind,
    #[serde(rename = "type")]
    pub type_token: &'static str,
    pub depends_on: &'a [String],
    pub properties: serde_json::Value,
}

/// An ordering the graph relies on but does not enforce.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderingGap {
    pub resource: String,
    pub prerequisite: String,
    pub reason: GapReason,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GapReason {
    /// `resource` reads an output of `prerequisite`.
    Reference(Reference),
    /// The secret lifecycle expects `prerequisite` to reach `before` first.
    Lifecycle {
        before: SecretPhase,
        after: SecretPhase,
    },
}

impl fmt::Display for OrderingGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            GapReason::Reference(r) => write!(
                f,
                "{} reads {r} but is not ordered after {}",
                self.resource, self.prerequisite
            ),
            GapReason::Lifecycle { before, after } => write!(
                f,
                "{} ({after}) is not ordered after {} ({before})",
                self.resource, self.prerequisite
            ),
        }
    }
}
