//! Dependency graph over component identifiers.
//!
//! Edges read "node depends on dependency". The graph refuses self edges and
//! any edge that would close a cycle, so every successfully built graph has
//! a topological order. Iteration follows node insertion order, which keeps
//! orderings reproducible for a given sequence of calls.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Write};
use std::hash::Hash;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("{0} cannot depend on itself")]
    SelfDependency(String),
    #[error("circular dependency: {dependency} already depends on {node}")]
    CircularDependency { node: String, dependency: String },
}

#[derive(Debug, Clone)]
pub struct Graph<N> {
    order: Vec<N>,
    position: HashMap<N, usize>,
    dependencies: HashMap<N, HashSet<N>>,
    dependents: HashMap<N, HashSet<N>>,
}

impl<N> Default for Graph<N> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            position: HashMap::new(),
            dependencies: HashMap::new(),
            dependents: HashMap::new(),
        }
    }
}

/// Whether `target` is reachable from `from` through `index`, expanding one
/// frontier at a time until nothing new is discovered.
fn reaches<N: Eq + Hash>(index: &HashMap<N, HashSet<N>>, from: &N, target: &N) -> bool {
    let mut seen: HashSet<&N> = HashSet::new();
    let mut frontier: Vec<&N> = vec![from];
    while !frontier.is_empty() {
        let mut next = Vec::new();
        for node in frontier {
            for neighbour in index.get(node).into_iter().flatten() {
                if neighbour == target {
                    return true;
                }
                if seen.insert(neighbour) {
                    next.push(neighbour);
                }
            }
        }
        frontier = next;
    }
    false
}

impl<N: Clone + Eq + Hash + fmt::Debug> Graph<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node without edges. Returns `false` if it was already known.
    pub fn insert(&mut self, node: N) -> bool {
        if self.position.contains_key(&node) {
            return false;
        }
        self.position.insert(node.clone(), self.order.len());
        self.order.push(node);
        true
    }

    /// Record that `node` depends on `dependency`. Fails without changing
    /// anything if the edge is a self edge or would close a cycle.
    pub fn depend_on(&mut self, node: N, dependency: N) -> Result<(), GraphError> {
        if node == dependency {
            return Err(GraphError::SelfDependency(format!("{node:?}")));
        }
        if self.depends_on(&dependency, &node) {
            return Err(GraphError::CircularDependency {
                node: format!("{node:?}"),
                dependency: format!("{dependency:?}"),
            });
        }
        self.insert(node.clone());
        self.insert(dependency.clone());
        self.dependents
            .entry(dependency.clone())
            .or_default()
            .insert(node.clone());
        self.dependencies.entry(node).or_default().insert(dependency);
        Ok(())
    }

    /// Whether `node` transitively depends on `dependency`.
    pub fn depends_on(&self, node: &N, dependency: &N) -> bool {
        reaches(&self.dependencies, node, dependency)
    }

    /// Whether `dependent` transitively depends on `node`.
    pub fn has_dependent(&self, node: &N, dependent: &N) -> bool {
        reaches(&self.dependents, node, dependent)
    }

    fn in_order(&self, set: Option<&HashSet<N>>) -> Vec<N> {
        let Some(set) = set else {
            return Vec::new();
        };
        let mut out: Vec<N> = set.iter().cloned().collect();
        out.sort_by_key(|n| self.position.get(n).copied().unwrap_or(usize::MAX));
        out
    }

    pub fn immediate_dependencies(&self, node: &N) -> Vec<N> {
        self.in_order(self.dependencies.get(node))
    }

    pub fn immediate_dependents(&self, node: &N) -> Vec<N> {
        self.in_order(self.dependents.get(node))
    }

    pub fn nodes(&self) -> &[N] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Nodes with no dependencies.
    pub fn leaves(&self) -> Vec<N> {
        self.order
            .iter()
            .filter(|n| self.dependencies.get(*n).map_or(true, HashSet::is_empty))
            .cloned()
            .collect()
    }

    /// Layered Kahn's algorithm: layer 0 holds the leaves, and each later
    /// layer holds the nodes whose last dependency was placed in the layer
    /// before it.
    pub fn topo_sorted_layers(&self) -> Vec<Vec<N>> {
        let mut pending: HashMap<&N, usize> = self
            .order
            .iter()
            .map(|n| (n, self.dependencies.get(n).map_or(0, HashSet::len)))
            .collect();
        let mut current: Vec<&N> = self
            .order
            .iter()
            .filter(|n| pending.get(n).copied() == Some(0))
            .collect();

        let mut layers = Vec::new();
        while !current.is_empty() {
            let mut next: Vec<&N> = Vec::new();
            for node in &current {
                for dependent in self.dependents.get(*node).into_iter().flatten() {
                    if let Some(count) = pending.get_mut(dependent) {
                        *count -= 1;
                        if *count == 0 {
                            next.push(dependent);
                        }
                    }
                }
            }
            next.sort_by_key(|n| self.position.get(*n).copied().unwrap_or(usize::MAX));
            layers.push(current.into_iter().cloned().collect());
            current = next;
        }
        layers
    }

    /// Every node exactly once, each after all of its dependencies.
    pub fn topo_sorted(&self) -> Vec<N> {
        self.topo_sorted_layers().into_iter().flatten().collect()
    }

    /// Human-readable listing of every node and its edges.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for node in &self.order {
            let _ = writeln!(out, "{node:?}");
            let deps = self.immediate_dependencies(node);
            if !deps.is_empty() {
                let _ = writeln!(out, "  depends on: {deps:?}");
            }
            let dependents = self.immediate_dependents(node);
            if !dependents.is_empty() {
                let _ = writeln!(out, "  needed by:  {dependents:?}");
            }
        }
        out
    }
}
