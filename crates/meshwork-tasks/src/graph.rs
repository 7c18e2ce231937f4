//! Task dependency graph.
//!
//! Edges run from a dependency to the task waiting on it. Tasks may name
//! dependencies that have not been submitted yet; those get a placeholder
//! vertex, so a later submission that would close a loop is caught.

use std::collections::HashMap;

use meshwork_consensus::TaskId;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;

#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: StableDiGraph<TaskId, ()>,
    index: HashMap<TaskId, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn vertex(&mut self, id: &TaskId) -> NodeIndex {
        if let Some(idx) = self.index.get(id) {
            return *idx;
        }
        let idx = self.graph.add_node(id.clone());
        self.index.insert(id.clone(), idx);
        idx
    }

    /// The dependency `task` would cycle through if it depended on `deps`,
    /// if any.
    pub fn cycle_through<'a>(
        &self,
        task: &TaskId,
        deps: impl IntoIterator<Item = &'a TaskId>,
    ) -> Option<TaskId> {
        let mut deps = deps.into_iter();
        let Some(&start) = self.index.get(task) else {
            // Nothing depends on an unseen task yet; only a self-loop closes.
            return deps.find(|d| *d == task).cloned();
        };
        deps.find(|dep| {
            *dep == task
                || self
                    .index
                    .get(*dep)
                    .is_some_and(|&d| has_path_connecting(&self.graph, start, d, None))
        })
        .cloned()
    }

    /// Add `task` with its dependencies. Returns the offending dependency
    /// instead when that would create a cycle, leaving the graph unchanged.
    pub fn insert<'a>(
        &mut self,
        task: &TaskId,
        deps: impl IntoIterator<Item = &'a TaskId> + Clone,
    ) -> Result<(), TaskId> {
        if let Some(through) = self.cycle_through(task, deps.clone()) {
            return Err(through);
        }
        let idx = self.vertex(task);
        for dep in deps {
            let d = self.vertex(dep);
            self.graph.update_edge(d, idx, ());
        }
        Ok(())
    }

    pub fn contains(&self, task: &TaskId) -> bool {
        self.index.contains_key(task)
    }

    /// Tasks that list `task` as a dependency.
    pub fn dependents(&self, task: &TaskId) -> Vec<TaskId> {
        self.neighbours(task, Direction::Outgoing)
    }

    pub fn dependencies(&self, task: &TaskId) -> Vec<TaskId> {
        self.neighbours(task, Direction::Incoming)
    }

    fn neighbours(&self, task: &TaskId, dir: Direction) -> Vec<TaskId> {
        let Some(&idx) = self.index.get(task) else {
            return Vec::new();
        };
        let mut out: Vec<TaskId> = self
            .graph
            .neighbors_directed(idx, dir)
            .filter_map(|n| self.graph.node_weight(n).cloned())
            .collect();
        out.sort();
        out
    }

    /// Every known task, dependencies first.
    pub fn order(&self) -> Vec<TaskId> {
        toposort(&self.graph, None)
            .map(|order| {
                order
                    .into_iter()
                    .filter_map(|n| self.graph.node_weight(n).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONE: [&TaskId; 0] = [];

    fn id(s: &str) -> TaskId {
        TaskId::new(s)
    }

    #[test]
    fn forward_references_are_allowed() {
        let mut g = DependencyGraph::new();
        g.insert(&id("a"), [&id("b")]).unwrap();
        g.insert(&id("b"), NONE).unwrap();
        assert_eq!(g.order(), vec![id("b"), id("a")]);
        assert_eq!(g.dependents(&id("b")), vec![id("a")]);
        assert_eq!(g.dependencies(&id("a")), vec![id("b")]);
    }

    #[test]
    fn two_task_cycle_is_rejected() {
        let mut g = DependencyGraph::new();
        g.insert(&id("a"), [&id("b")]).unwrap();
        assert_eq!(g.insert(&id("b"), [&id("a")]), Err(id("a")));
        assert!(g.dependencies(&id("b")).is_empty());
    }

    #[test]
    fn self_dependency_is_rejected() {
        let mut g = DependencyGraph::new();
        assert_eq!(g.insert(&id("a"), [&id("a")]), Err(id("a")));
        assert!(!g.contains(&id("a")));
    }

    #[test]
    fn long_cycle_is_rejected() {
        let mut g = DependencyGraph::new();
        g.insert(&id("b"), [&id("a")]).unwrap();
        g.insert(&id("c"), [&id("b")]).unwrap();
        g.insert(&id("d"), [&id("c")]).unwrap();
        assert_eq!(g.insert(&id("a"), [&id("d")]), Err(id("d")));
    }

    #[test]
    fn diamonds_are_fine() {
        let mut g = DependencyGraph::new();
        g.insert(&id("b"), [&id("a")]).unwrap();
        g.insert(&id("c"), [&id("a")]).unwrap();
        g.insert(&id("d"), [&id("b"), &id("c")]).unwrap();
        let order = g.order();
        let pos = |s: &str| order.iter().position(|t| *t == id(s)).unwrap();
        assert!(pos("a") < pos("b") && pos("a") < pos("c"));
        assert!(pos("b") < pos("d") && pos("c") < pos("d"));
    }
}
