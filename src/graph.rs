//! The append-only task graph.
//!
//! During discovery the graph is insert-only and dependency lists are still
//! growing, so insertion dedupes on the *own-hash* (the only identity that
//! is stable at that point). [`Graph::freeze`] runs once discovery is done:
//! it materialises the dependency edges, rejects cycles, memoises every
//! closure-hash in topological order and enforces closure uniqueness. After
//! a successful freeze the graph is read-only.

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::graph::{DiGraph, NodeIndex};

use crate::core::Hash32;
use crate::error::GraphError;
use crate::task::Task;

#[derive(Default)]
pub struct Graph {
    /// Edges point from dependency to dependant.
    graph: DiGraph<Arc<Task>, ()>,
    index: HashMap<Hash32, NodeIndex>,
    frozen: bool,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task, returning `false` when a task with the same own-hash
    /// is already present. Re-offering a shared instance (a project's JAR
    /// task is stitched from several directories) is therefore idempotent.
    pub fn insert(&mut self, task: Arc<Task>) -> bool {
        let own = task.own_hash();
        if self.index.contains_key(&own) {
            return false;
        }

        let node = self.graph.add_node(task);
        self.index.insert(own, node);
        self.frozen = false;
        true
    }

    pub fn contains(&self, own: Hash32) -> bool {
        self.index.contains_key(&own)
    }

    pub fn get(&self, own: Hash32) -> Option<&Arc<Task>> {
        self.index.get(&own).map(|&node| &self.graph[node])
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Arc<Task>> {
        self.graph.node_weights()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Materialise edges, reject cycles and memoise closure-hashes.
    ///
    /// Idempotent; must run after discovery (including project-dependency
    /// resolution) and before scheduling.
    pub fn freeze(&mut self) -> Result<(), GraphError> {
        self.graph.clear_edges();

        let nodes: Vec<NodeIndex> = self.graph.node_indices().collect();
        for node in nodes {
            let task = Arc::clone(&self.graph[node]);
            for dep in task.dependencies() {
                let dep_node = self.index.get(&dep.own_hash()).copied().ok_or_else(|| {
                    GraphError::MissingDependency {
                        task: task.display_name(),
                        dependency: dep.display_name(),
                    }
                })?;
                self.graph.update_edge(dep_node, node, ());
            }
        }

        let order =
            petgraph::algo::toposort(&self.graph, None).map_err(|_| GraphError::Cycle)?;

        // Dependencies precede dependants in `order`, so each closure-hash
        // below is computed with all dependency hashes already memoised.
        let mut seen: HashMap<Hash32, Hash32> = HashMap::new();
        for node in order {
            let task = &self.graph[node];
            let closure = task.closure_hash();
            if let Some(other) = seen.insert(closure, task.own_hash())
                && other != task.own_hash()
            {
                return Err(GraphError::DuplicateClosure(closure.to_hex()));
            }
        }

        self.frozen = true;
        Ok(())
    }

    /// Insert `task` together with its whole dependency closure.
    ///
    /// This is how execution graphs are assembled: the CLI filters the
    /// planned tasks by kind and directory, then pulls each survivor in
    /// with everything it transitively needs.
    pub fn insert_with_dependencies(&mut self, task: &Arc<Task>) {
        if self.contains(task.own_hash()) {
            return;
        }
        for dep in task.dependencies() {
            self.insert_with_dependencies(&dep);
        }
        self.insert(Arc::clone(task));
    }

    /// Tasks in dependency order: for every edge A→B, A precedes B.
    pub fn topological_order(&self) -> Result<Vec<Arc<Task>>, GraphError> {
        let order =
            petgraph::algo::toposort(&self.graph, None).map_err(|_| GraphError::Cycle)?;
        Ok(order.into_iter().map(|node| Arc::clone(&self.graph[node])).collect())
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("tasks", &self.graph.node_count())
            .field("edges", &self.graph.edge_count())
            .field("frozen", &self.frozen)
            .finish()
    }
}
