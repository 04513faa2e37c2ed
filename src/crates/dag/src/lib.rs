//! A directed acyclic graph keyed by name, with node values, cycle
//! detection, topological sort, and BFS/DFS subtree traversal.
//!
//! Adjacency is stored as an insertion-ordered map so that topological sort
//! is stable across runs with identical construction order.

use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DagError {
    #[error("node '{0}' does not exist")]
    UnknownNode(String),

    #[error("adding edge ({0}, {1}) would create a cycle")]
    WouldCreateCycle(String, String),
}

pub type Result<T> = std::result::Result<T, DagError>;

/// A labeled DAG with values of type `V` attached to each node.
#[derive(Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Dag<V> {
    order: Vec<String>,
    values: HashMap<String, V>,
    adjacency: HashMap<String, Vec<String>>,
}

impl<V> Dag<V> {
    pub fn new() -> Self {
        Dag {
            order: Vec::new(),
            values: HashMap::new(),
            adjacency: HashMap::new(),
        }
    }

    pub fn contains_node(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn node_count(&self) -> usize {
        self.order.len()
    }

    pub fn value(&self, name: &str) -> Option<&V> {
        self.values.get(name)
    }

    pub fn value_mut(&mut self, name: &str) -> Option<&mut V> {
        self.values.get_mut(name)
    }

    /// Names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn successors(&self, name: &str) -> &[String] {
        self.adjacency.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Add a node. A no-op (with a warning) if the name already exists.
    pub fn add_node(&mut self, name: impl Into<String>, value: V) {
        let name = name.into();
        if self.values.contains_key(&name) {
            tracing::warn!(node = %name, "node already exists, ignoring");
            return;
        }
        self.order.push(name.clone());
        self.adjacency.insert(name.clone(), Vec::new());
        self.values.insert(name, value);
    }

    /// Add an edge `src -> dest`.
    ///
    /// Self-loops are rejected silently (logged, not an error). A missing
    /// `src` is a hard error. A missing `dest` is logged and the call is a
    /// no-op, matching the source library's asymmetric handling, which the
    /// expander relies on when a workspace-reference edge is considered
    /// before its destination has been visited in topological order.
    /// Unlike the source, an edge that would introduce a cycle is rolled
    /// back rather than left dangling: the edge is not retained on error.
    pub fn add_edge(&mut self, src: &str, dest: &str) -> Result<()> {
        if src == dest {
            tracing::error!(node = %src, "rejecting self-referential edge");
            return Ok(());
        }

        if !self.adjacency.contains_key(src) {
            return Err(DagError::UnknownNode(src.to_string()));
        }

        if !self.adjacency.contains_key(dest) {
            tracing::error!(src, dest, "destination node does not exist, skipping edge");
            return Ok(());
        }

        let edges = self.adjacency.get_mut(src).unwrap();
        if edges.iter().any(|d| d == dest) {
            return Ok(());
        }
        edges.push(dest.to_string());

        if self.detect_cycle() {
            let edges = self.adjacency.get_mut(src).unwrap();
            edges.retain(|d| d != dest);
            return Err(DagError::WouldCreateCycle(src.to_string(), dest.to_string()));
        }

        Ok(())
    }

    pub fn remove_edge(&mut self, src: &str, dest: &str) {
        match self.adjacency.get_mut(src) {
            Some(edges) => edges.retain(|d| d != dest),
            None => tracing::warn!(src, dest, "cannot remove edge, source missing"),
        }
    }

    /// DFS subtree starting at `src`: returns the path in DFS order and a
    /// parent map covering every visited node.
    pub fn dfs_subtree(&self, src: &str) -> (Vec<String>, HashMap<String, Option<String>>) {
        let mut path = Vec::new();
        let mut parent = HashMap::new();
        self.dfs_subtree_inner(src, None, &mut path, &mut parent);
        (path, parent)
    }

    fn dfs_subtree_inner(
        &self,
        node: &str,
        par: Option<&str>,
        path: &mut Vec<String>,
        parent: &mut HashMap<String, Option<String>>,
    ) {
        path.push(node.to_string());
        parent.insert(node.to_string(), par.map(|s| s.to_string()));
        for child in self.successors(node).to_vec() {
            self.dfs_subtree_inner(&child, Some(node), path, parent);
        }
    }

    /// BFS subtree starting at `src`: returns the path in BFS order and a
    /// parent map covering every visited node (each visited once).
    pub fn bfs_subtree(&self, src: &str) -> (Vec<String>, HashMap<String, Option<String>>) {
        let mut queue = VecDeque::new();
        queue.push_back(src.to_string());
        let mut path = vec![src.to_string()];
        let mut parent = HashMap::new();
        parent.insert(src.to_string(), None);

        while let Some(root) = queue.pop_front() {
            for child in self.successors(&root).to_vec() {
                if path.contains(&child) {
                    continue;
                }
                queue.push_back(child.clone());
                parent.insert(child.clone(), Some(root.clone()));
                path.push(child);
            }
        }

        (path, parent)
    }

    /// Topologically sort all nodes. Stable: ties are broken by insertion
    /// order because child recursion always visits successors in the order
    /// they were added.
    pub fn topological_sort(&self) -> Vec<String> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut stack: VecDeque<String> = VecDeque::new();

        for name in &self.order {
            if !visited.contains(name) {
                self.topo_visit(name, &mut visited, &mut stack);
            }
        }

        stack.into_iter().collect()
    }

    fn topo_visit(&self, node: &str, visited: &mut HashSet<String>, stack: &mut VecDeque<String>) {
        visited.insert(node.to_string());
        for child in self.successors(node).to_vec() {
            if !visited.contains(&child) {
                self.topo_visit(&child, visited, stack);
            }
        }
        stack.push_front(node.to_string());
    }

    pub fn detect_cycle(&self) -> bool {
        let mut visited: HashSet<String> = HashSet::new();
        let mut rstack: HashSet<String> = HashSet::new();
        for name in &self.order {
            if !visited.contains(name) && self.detect_cycle_inner(name, &mut visited, &mut rstack) {
                return true;
            }
        }
        false
    }

    fn detect_cycle_inner(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        rstack: &mut HashSet<String>,
    ) -> bool {
        visited.insert(node.to_string());
        rstack.insert(node.to_string());

        for child in self.successors(node).to_vec() {
            if !visited.contains(&child) {
                if self.detect_cycle_inner(&child, visited, rstack) {
                    return true;
                }
            } else if rstack.contains(&child) {
                return true;
            }
        }

        rstack.remove(node);
        false
    }
}
