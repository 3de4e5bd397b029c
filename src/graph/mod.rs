//! Dependency graph
//!
//! A small in-memory DAG over resource ids. Edges point from a resource to
//! the resources it depends on; the topological order it emits is the
//! creation order (dependencies first) and, reversed, the deletion order.
//!
//! Determinism is a contract here: vertex and edge listings are sorted, and
//! the topological sort is a pure function of the vertex and edge sets,
//! independent of insertion order.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};

/// Directed acyclic graph over resource ids.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Vertex -> direct dependencies
    adjacency: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vertex; adding the same id twice is an error.
    pub fn add_vertex(&mut self, id: &str) -> Result<()> {
        if self.adjacency.contains_key(id) {
            return Err(Error::Validation(format!(
                "duplicate vertex {id:?} in dependency graph"
            )));
        }
        self.adjacency.insert(id.to_string(), BTreeSet::new());
        Ok(())
    }

    /// Add an edge `from -> to`, meaning `from` depends on `to`.
    ///
    /// Fails with [`Error::SelfReference`] when the endpoints match, and with
    /// [`Error::Cycle`] when the edge would close a cycle; in the latter case
    /// the edge is rolled back and the error carries the full cycle path.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return Err(Error::SelfReference(from.to_string()));
        }
        if !self.adjacency.contains_key(from) {
            return Err(Error::Validation(format!("unknown vertex {from:?}")));
        }
        if !self.adjacency.contains_key(to) {
            return Err(Error::Validation(format!("unknown vertex {to:?}")));
        }

        let inserted = match self.adjacency.get_mut(from) {
            Some(deps) => deps.insert(to.to_string()),
            None => false,
        };
        if !inserted {
            // Edge already present; nothing to re-check.
            return Ok(());
        }

        if let Some(mut path) = self.find_path(to, from) {
            // Roll back before reporting.
            if let Some(deps) = self.adjacency.get_mut(from) {
                deps.remove(to);
            }
            let mut cycle = vec![from.to_string()];
            cycle.append(&mut path);
            return Err(Error::Cycle {
                from: from.to_string(),
                to: to.to_string(),
                path: cycle,
            });
        }

        Ok(())
    }

    /// DFS for a path `start -> … -> goal`, neighbors in sorted order.
    fn find_path(&self, start: &str, goal: &str) -> Option<Vec<String>> {
        let mut stack = vec![(start.to_string(), vec![start.to_string()])];
        let mut seen = BTreeSet::new();

        while let Some((current, path)) = stack.pop() {
            if current == goal {
                return Some(path);
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(neighbors) = self.adjacency.get(&current) {
                // Reverse so the sorted-smallest neighbor is explored first.
                for neighbor in neighbors.iter().rev() {
                    let mut next_path = path.clone();
                    next_path.push(neighbor.clone());
                    stack.push((neighbor.clone(), next_path));
                }
            }
        }

        None
    }

    /// All vertices, sorted.
    pub fn vertices(&self) -> Vec<String> {
        self.adjacency.keys().cloned().collect()
    }

    /// All edges `(from, to)`, sorted.
    pub fn edges(&self) -> Vec<(String, String)> {
        self.adjacency
            .iter()
            .flat_map(|(from, tos)| tos.iter().map(move |to| (from.clone(), to.clone())))
            .collect()
    }

    /// Direct dependencies of `id`, sorted.
    pub fn dependencies_of(&self, id: &str) -> Vec<String> {
        self.adjacency
            .get(id)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Deterministic topological order: for every edge `from -> to`, `to`
    /// precedes `from`. Roots and neighbors are visited in sorted order.
    pub fn topological_sort(&self) -> Vec<String> {
        let mut order = Vec::with_capacity(self.adjacency.len());
        let mut visited = BTreeSet::new();

        for id in self.adjacency.keys() {
            self.visit(id, &mut visited, &mut order);
        }

        order
    }

    fn visit(&self, id: &str, visited: &mut BTreeSet<String>, order: &mut Vec<String>) {
        if visited.contains(id) {
            return;
        }
        visited.insert(id.to_string());
        if let Some(deps) = self.adjacency.get(id) {
            for dep in deps {
                self.visit(dep, visited, order);
            }
        }
        order.push(id.to_string());
    }
}
