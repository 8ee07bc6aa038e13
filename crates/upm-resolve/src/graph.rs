//! Dependency graph and deterministic topological ordering.
//!
//! Edges point from dependent to dependency: if A depends on B, the edge is
//! `A -> B`. [`DependencyGraph::topological_sort`] returns dependency-first
//! order (B before A), breaking ties by name.
//!
//! ```
//! use upm_resolve::graph::DependencyGraph;
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_node("Voxels");
//! graph.add_node("MathKit");
//! graph.add_edge("Voxels", "MathKit");
//!
//! assert_eq!(graph.topological_sort().unwrap(), vec!["MathKit", "Voxels"]);
//! ```

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Adjacency list: key depends on each value.
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: impl Into<String>) {
        self.edges.entry(id.into()).or_default();
    }

    /// Declare that `from` depends on `to`. Missing nodes are created.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        self.edges.entry(to.to_string()).or_default();
        self.edges
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
    }

    pub fn node_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(|deps| deps.len()).sum()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.edges.contains_key(id)
    }

    /// Direct dependencies of a node, sorted by name.
    pub fn dependencies_of(&self, id: &str) -> Vec<&str> {
        self.edges
            .get(id)
            .map(|deps| deps.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Every node reachable from `id`, excluding `id` itself.
    pub fn transitive_dependencies(&self, id: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut pending: Vec<&str> = self.dependencies_of(id);
        while let Some(next) = pending.pop() {
            if next != id && seen.insert(next.to_string()) {
                pending.extend(self.dependencies_of(next));
            }
        }
        seen
    }

    /// Topological sort using Kahn's algorithm.
    ///
    /// Among nodes whose dependencies are all placed, the alphabetically
    /// smallest goes next, so the order is fully determined by the graph.
    ///
    /// # Errors
    ///
    /// Returns `Error::CyclicDependency` listing the nodes left on a cycle.
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        let mut remaining: BTreeMap<&str, usize> = self
            .edges
            .iter()
            .map(|(id, deps)| (id.as_str(), deps.len()))
            .collect();

        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (from, deps) in &self.edges {
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(from.as_str());
            }
        }

        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|&(_, &count)| count == 0)
            .map(|(&id, _)| id)
            .collect();

        let mut result = Vec::with_capacity(self.edges.len());
        while let Some(current) = ready.pop_first() {
            result.push(current.to_string());
            for &dependent in dependents.get(current).into_iter().flatten() {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if result.len() != self.edges.len() {
            let placed: BTreeSet<&str> = result.iter().map(String::as_str).collect();
            let cycle = self
                .edges
                .keys()
                .filter(|id| !placed.contains(id.as_str()))
                .cloned()
                .collect();
            return Err(Error::CyclicDependency { cycle });
        }

        Ok(result)
    }
}
