//! Generic directed graph library for build-order computation.
//!
//! Unlike a plain DAG, this graph accepts cycles: build targets may depend on
//! each other mutually, and such groups have to be built together. The
//! graph therefore offers:
//!
//! - Strongly connected components (Tarjan's algorithm)
//! - Condensation of the graph into an acyclic component graph
//! - Topological ordering of the condensation (dependencies first)
//!
//! # Example
//!
//! ```
//! use convenient_graph::Digraph;
//!
//! let mut graph = Digraph::<&str, ()>::new();
//! let core = graph.add_node("core");
//! let a = graph.add_node("a");
//! let b = graph.add_node("b");
//!
//! // a and b depend on core, and on each other
//! graph.add_edge(core, a, ()).unwrap();
//! graph.add_edge(core, b, ()).unwrap();
//! graph.add_edge(a, b, ()).unwrap();
//! graph.add_edge(b, a, ()).unwrap();
//!
//! let condensation = graph.condensation();
//! let order = condensation.topological_order();
//! assert_eq!(order.len(), 2);
//! assert_eq!(condensation.component(order[0]), &[core]);
//! assert_eq!(condensation.component(order[1]).len(), 2);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(unused_results)]

use std::collections::{BTreeSet, HashMap};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Node identifier in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NodeId(usize);

impl NodeId {
    /// Position of the node in insertion order.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

/// Error types for graph operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Node not found
    #[error("Node {0} not found in graph")]
    NodeNotFound(NodeId),
}

/// Result type for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
struct Node<N> {
    data: N,
    // this node -> other nodes (dependents)
    outgoing: BTreeSet<NodeId>,
    // other nodes -> this node (dependencies)
    incoming: BTreeSet<NodeId>,
}

/// Generic directed graph that may contain cycles.
///
/// An edge `from -> to` means `from` must be processed before `to`, i.e. `to`
/// depends on `from`. Nodes are stored in insertion order, which keeps every
/// traversal deterministic.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Digraph<N, E> {
    nodes: Vec<Node<N>>,
    edges: HashMap<(NodeId, NodeId), E>,
}

impl<N, E> Default for Digraph<N, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N, E> Digraph<N, E> {
    /// Create a new empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: HashMap::new(),
        }
    }

    /// Add a node to the graph and return its ID.
    pub fn add_node(&mut self, data: N) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            data,
            outgoing: BTreeSet::new(),
            incoming: BTreeSet::new(),
        });
        id
    }

    /// Add a directed edge from `from` to `to` with associated data.
    ///
    /// Adding an edge that already exists replaces its data. Self loops and
    /// cycles are accepted; use [`Digraph::condensation`] to group them.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::NodeNotFound` if either node doesn't exist.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId, data: E) -> GraphResult<()> {
        if from.0 >= self.nodes.len() {
            return Err(GraphError::NodeNotFound(from));
        }
        if to.0 >= self.nodes.len() {
            return Err(GraphError::NodeNotFound(to));
        }

        let _ = self.edges.insert((from, to), data);
        let _ = self.nodes[from.0].outgoing.insert(to);
        let _ = self.nodes[to.0].incoming.insert(from);
        Ok(())
    }

    /// Get the data attached to the edge `from -> to`, if any.
    #[must_use]
    pub fn edge(&self, from: NodeId, to: NodeId) -> Option<&E> {
        self.edges.get(&(from, to))
    }

    /// Get a reference to a node's data.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::NodeNotFound` if the node doesn't exist.
    pub fn node(&self, id: NodeId) -> GraphResult<&N> {
        self.nodes
            .get(id.0)
            .map(|node| &node.data)
            .ok_or(GraphError::NodeNotFound(id))
    }

    /// Get a mutable reference to a node's data.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::NodeNotFound` if the node doesn't exist.
    pub fn node_mut(&mut self, id: NodeId) -> GraphResult<&mut N> {
        self.nodes
            .get_mut(id.0)
            .map(|node| &mut node.data)
            .ok_or(GraphError::NodeNotFound(id))
    }

    /// All node IDs in insertion order.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        (0..self.nodes.len()).map(NodeId).collect()
    }

    /// Number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges in the graph.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Direct dependencies (incoming edges) of a node.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::NodeNotFound` if the node doesn't exist.
    pub fn dependencies(&self, id: NodeId) -> GraphResult<Vec<NodeId>> {
        self.nodes
            .get(id.0)
            .map(|node| node.incoming.iter().copied().collect())
            .ok_or(GraphError::NodeNotFound(id))
    }

    /// Direct dependents (outgoing edges) of a node.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::NodeNotFound` if the node doesn't exist.
    pub fn dependents(&self, id: NodeId) -> GraphResult<Vec<NodeId>> {
        self.nodes
            .get(id.0)
            .map(|node| node.outgoing.iter().copied().collect())
            .ok_or(GraphError::NodeNotFound(id))
    }

    /// Compute the strongly connected components with Tarjan's algorithm.
    ///
    /// Every node belongs to exactly one component. Nodes inside a component
    /// are sorted by ID; components are returned in the order Tarjan
    /// completes them (a component is emitted after everything reachable
    /// from it).
    #[must_use]
    pub fn strongly_connected_components(&self) -> Vec<Vec<NodeId>> {
        let mut tarjan = Tarjan {
            index: vec![None; self.nodes.len()],
            lowlink: vec![0; self.nodes.len()],
            on_stack: vec![false; self.nodes.len()],
            stack: Vec::new(),
            next_index: 0,
            components: Vec::new(),
        };

        for id in 0..self.nodes.len() {
            if tarjan.index[id].is_none() {
                self.strong_connect(NodeId(id), &mut tarjan);
            }
        }

        tarjan.components
    }

    fn strong_connect(&self, start: NodeId, tarjan: &mut Tarjan) {
        // Explicit work stack so deep dependency chains cannot overflow the call stack.
        let mut work: Vec<(NodeId, Vec<NodeId>)> = Vec::new();
        tarjan.visit(start);
        work.push((start, self.nodes[start.0].outgoing.iter().rev().copied().collect()));

        while let Some((node, pending)) = work.last_mut() {
            let node = *node;
            if let Some(next) = pending.pop() {
                match tarjan.index[next.0] {
                    None => {
                        tarjan.visit(next);
                        let successors = self.nodes[next.0].outgoing.iter().rev().copied().collect();
                        work.push((next, successors));
                    }
                    Some(next_index) if tarjan.on_stack[next.0] => {
                        tarjan.lowlink[node.0] = tarjan.lowlink[node.0].min(next_index);
                    }
                    Some(_) => {}
                }
                continue;
            }

            let _ = work.pop();
            if let Some((parent, _)) = work.last() {
                tarjan.lowlink[parent.0] = tarjan.lowlink[parent.0].min(tarjan.lowlink[node.0]);
            }
            if Some(tarjan.lowlink[node.0]) == tarjan.index[node.0] {
                tarjan.complete(node);
            }
        }
    }

    /// Collapse every strongly connected component into a single node.
    #[must_use]
    pub fn condensation(&self) -> Condensation {
        let components = self.strongly_connected_components();
        let mut component_of = vec![0; self.nodes.len()];
        for (component, members) in components.iter().enumerate() {
            for member in members {
                component_of[member.0] = component;
            }
        }

        let mut dependencies = vec![BTreeSet::new(); components.len()];
        for &(from, to) in self.edges.keys() {
            let from_component = component_of[from.0];
            let to_component = component_of[to.0];
            if from_component != to_component {
                let _ = dependencies[to_component].insert(from_component);
            }
        }

        Condensation {
            components,
            component_of,
            dependencies,
        }
    }
}

struct Tarjan {
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<NodeId>,
    next_index: usize,
    components: Vec<Vec<NodeId>>,
}

impl Tarjan {
    fn visit(&mut self, node: NodeId) {
        self.index[node.0] = Some(self.next_index);
        self.lowlink[node.0] = self.next_index;
        self.next_index += 1;
        self.stack.push(node);
        self.on_stack[node.0] = true;
    }

    fn complete(&mut self, root: NodeId) {
        let mut component = Vec::new();
        while let Some(member) = self.stack.pop() {
            self.on_stack[member.0] = false;
            component.push(member);
            if member == root {
                break;
            }
        }
        component.sort();
        self.components.push(component);
    }
}

/// Acyclic graph of strongly connected components.
#[derive(Debug, Clone)]
pub struct Condensation {
    components: Vec<Vec<NodeId>>,
    component_of: Vec<usize>,
    dependencies: Vec<BTreeSet<usize>>,
}

impl Condensation {
    /// Number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether the condensation has no components.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Member nodes of a component, sorted by ID.
    #[must_use]
    pub fn component(&self, component: usize) -> &[NodeId] {
        &self.components[component]
    }

    /// Component that contains `node`.
    #[must_use]
    pub fn component_of(&self, node: NodeId) -> Option<usize> {
        self.component_of.get(node.0).copied()
    }

    /// Components this component depends on.
    #[must_use]
    pub fn dependencies(&self, component: usize) -> &BTreeSet<usize> {
        &self.dependencies[component]
    }

    /// Components in dependency order (Kahn's algorithm).
    ///
    /// Ties are broken by the smallest member node ID, so the order follows
    /// node insertion order wherever the dependencies allow it.
    #[must_use]
    pub fn topological_order(&self) -> Vec<usize> {
        let mut remaining: Vec<usize> = self.dependencies.iter().map(BTreeSet::len).collect();
        let mut dependents = vec![Vec::new(); self.components.len()];
        for (component, deps) in self.dependencies.iter().enumerate() {
            for &dep in deps {
                dependents[dep].push(component);
            }
        }

        let key = |component: usize| (self.components[component][0], component);
        let mut ready: BTreeSet<(NodeId, usize)> = remaining
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count == 0)
            .map(|(component, _)| key(component))
            .collect();

        let mut order = Vec::with_capacity(self.components.len());
        while let Some(first) = ready.iter().next().copied() {
            let _ = ready.remove(&first);
            let component = first.1;
            order.push(component);
            for &dependent in &dependents[component] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    let _ = ready.insert(key(dependent));
                }
            }
        }
        order
    }
}
