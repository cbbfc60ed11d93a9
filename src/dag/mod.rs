//! Dependency graph with cycle detection and implied-node discovery.
//!
//! Nodes live in a petgraph arena and are looked up through an
//! identifier-to-index map. An edge `a → b` means `a` depends on `b`.
//!
//! A neighbor that is referenced but never registered as a first-class node
//! is *implied*: it is inserted as a leaf so edges to it exist, and reported
//! by [`Dag::init`] so callers know something is missing.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::core::PkgError;

/// A graph node.
pub trait Node: Clone {
    /// Unique identifier of the node within a graph.
    fn identifier(&self) -> &str;

    /// Nodes this node depends on.
    fn neighbors(&self) -> Vec<Self>;

    /// Record additional dependencies on this node.
    fn add_neighbors(&mut self, neighbors: &[Self]) -> Result<(), PkgError>;
}

/// Color states for cycle detection using DFS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// Node has not been visited.
    White,
    /// Node is currently being visited (in the DFS stack).
    Gray,
    /// Node has been fully visited.
    Black,
}

/// Directed dependency graph over nodes of type `N`.
pub struct Dag<N: Node> {
    graph: DiGraph<N, ()>,
    node_map: HashMap<String, NodeIndex>,
}

impl<N: Node> Default for Dag<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: Node> Dag<N> {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            node_map: HashMap::new(),
        }
    }

    /// Register `nodes` and their edges, returning the implied neighbors.
    ///
    /// Implied nodes are returned once each, in the order they were first
    /// referenced. When two nodes share an identifier the later one wins.
    pub fn init(&mut self, nodes: Vec<N>) -> Result<Vec<N>, PkgError> {
        let mut registered = Vec::new();
        for node in nodes {
            let index = self.upsert(node);
            if !registered.contains(&index) {
                registered.push(index);
            }
        }

        let mut implied = Vec::new();
        for index in registered {
            let from = self.graph[index].identifier().to_string();
            let neighbors = self.graph[index].neighbors();
            implied.extend(self.add_edges(&from, neighbors)?);
        }
        Ok(implied)
    }

    /// Register a single node and its edges. Returns newly implied neighbors.
    pub fn add_node(&mut self, node: N) -> Result<Vec<N>, PkgError> {
        let neighbors = node.neighbors();
        let from = node.identifier().to_string();
        self.upsert(node);
        self.add_edges(&from, neighbors)
    }

    /// Register several nodes. Returns newly implied neighbors.
    pub fn add_nodes(&mut self, nodes: Vec<N>) -> Result<Vec<N>, PkgError> {
        let mut implied = Vec::new();
        for node in nodes {
            implied.extend(self.add_node(node)?);
        }
        Ok(implied)
    }

    /// Replace existing nodes (implied or not) and refresh their outgoing edges.
    pub fn add_or_update_nodes(&mut self, nodes: Vec<N>) -> Result<(), PkgError> {
        for node in nodes {
            let id = node.identifier().to_string();
            if let Some(&index) = self.node_map.get(&id) {
                let mut stale: Vec<_> = self.graph.edges(index).map(|e| e.id()).collect();
                // Removal swaps the last edge into the hole, so go from the highest index down.
                stale.sort_unstable_by(|a, b| b.cmp(a));
                for edge in stale {
                    self.graph.remove_edge(edge);
                }
            }
            self.add_node(node)?;
        }
        Ok(())
    }

    /// Add edges `from → to` for every node in `tos`, inserting missing targets.
    ///
    /// Returns the targets that were missing.
    pub fn add_edges(&mut self, from: &str, tos: Vec<N>) -> Result<Vec<N>, PkgError> {
        let mut missing = Vec::new();
        for to in tos {
            if !self.node_map.contains_key(to.identifier()) {
                missing.push(to.clone());
                self.upsert(to.clone());
            }
            self.add_edge(from, &to)?;
        }
        Ok(missing)
    }

    /// Add a single edge `from → to`. Both nodes must exist.
    pub fn add_edge(&mut self, from: &str, to: &N) -> Result<(), PkgError> {
        let from_idx = self.index_of(from)?;
        let to_idx = self.index_of(to.identifier())?;

        self.graph[from_idx].add_neighbors(std::slice::from_ref(to))?;
        if !self.graph.contains_edge(from_idx, to_idx) {
            self.graph.add_edge(from_idx, to_idx, ());
        }
        Ok(())
    }

    pub fn node_exists(&self, identifier: &str) -> bool {
        self.node_map.contains_key(identifier)
    }

    pub fn get_node(&self, identifier: &str) -> Result<&N, PkgError> {
        self.index_of(identifier).map(|index| &self.graph[index])
    }

    /// Direct dependencies of a node as currently present in the graph.
    pub fn node_neighbors(&self, identifier: &str) -> Result<Vec<&N>, PkgError> {
        let index = self.index_of(identifier)?;
        Ok(self.graph.neighbors(index).map(|n| &self.graph[n]).collect())
    }

    /// Every node transitively reachable from `identifier`, keyed by identifier.
    ///
    /// The starting node itself is only included when it sits on a cycle.
    pub fn trace_node(&self, identifier: &str) -> Result<BTreeMap<String, N>, PkgError> {
        let start = self.index_of(identifier)?;
        let mut tree = BTreeMap::new();
        let mut stack = vec![start];
        let mut seen = HashSet::new();

        while let Some(index) = stack.pop() {
            for neighbor in self.graph.neighbors(index) {
                if seen.insert(neighbor) {
                    let node = &self.graph[neighbor];
                    tree.insert(node.identifier().to_string(), node.clone());
                    stack.push(neighbor);
                }
            }
        }
        Ok(tree)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Detect cycles using DFS with colors.
    ///
    /// Returns an error containing the cycle path if a cycle is detected.
    pub fn detect_cycles(&self) -> Result<(), PkgError> {
        let mut colors: HashMap<NodeIndex, Color> =
            self.graph.node_indices().map(|n| (n, Color::White)).collect();
        let mut path: Vec<NodeIndex> = Vec::new();

        for node in self.graph.node_indices() {
            if matches!(colors.get(&node), Some(Color::White))
                && let Some(cycle) = self.dfs_visit(node, &mut colors, &mut path)
            {
                let chain = cycle
                    .iter()
                    .map(|&i| self.graph[i].identifier())
                    .collect::<Vec<_>>()
                    .join(" → ");
                return Err(PkgError::CircularDependency {
                    chain,
                });
            }
        }
        Ok(())
    }

    fn dfs_visit(
        &self,
        node: NodeIndex,
        colors: &mut HashMap<NodeIndex, Color>,
        path: &mut Vec<NodeIndex>,
    ) -> Option<Vec<NodeIndex>> {
        colors.insert(node, Color::Gray);
        path.push(node);

        for neighbor in self.graph.neighbors(node) {
            match colors.get(&neighbor) {
                Some(Color::Gray) => {
                    let start = path.iter().position(|&n| n == neighbor).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(neighbor);
                    return Some(cycle);
                }
                Some(Color::White) => {
                    if let Some(cycle) = self.dfs_visit(neighbor, colors, path) {
                        return Some(cycle);
                    }
                }
                _ => {}
            }
        }

        path.pop();
        colors.insert(node, Color::Black);
        None
    }

    /// Topological order: every node appears after all of its dependencies.
    ///
    /// Fails with [`PkgError::CircularDependency`] if any node is reachable
    /// from itself, self-loops included.
    pub fn sort(&self) -> Result<Vec<N>, PkgError> {
        self.detect_cycles()?;

        match toposort(&self.graph, None) {
            Ok(indices) => Ok(indices.into_iter().rev().map(|i| self.graph[i].clone()).collect()),
            Err(cycle) => Err(PkgError::CircularDependency {
                chain: self.graph[cycle.node_id()].identifier().to_string(),
            }),
        }
    }

    fn upsert(&mut self, node: N) -> NodeIndex {
        match self.node_map.get(node.identifier()) {
            Some(&index) => {
                self.graph[index] = node;
                index
            }
            None => {
                let id = node.identifier().to_string();
                let index = self.graph.add_node(node);
                self.node_map.insert(id, index);
                index
            }
        }
    }

    fn index_of(&self, identifier: &str) -> Result<NodeIndex, PkgError> {
        self.node_map.get(identifier).copied().ok_or_else(|| PkgError::NodeNotFound {
            identifier: identifier.to_string(),
        })
    }
}
