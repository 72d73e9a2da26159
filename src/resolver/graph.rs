// src/resolver/graph.rs

//! Dependency graph over a selected set of packages
//!
//! Nodes live in an arena and edges are index lists, so the graph owns no
//! references into the package data it was built from. An edge `a -> b`
//! means "a depends on b".

use crate::error::{Error, Result};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Index of a node in the arena
pub type NodeId = usize;

/// A package in the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageNode {
    /// Package id; also the tie-breaker for ordering
    pub key: i64,
    /// Human-readable name used in cycle reports
    pub label: String,
}

/// Which end of each edge comes first in [`DependencyGraph::order`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Install order: a dependency precedes everything that needs it
    DependenciesFirst,
    /// Removal order: a dependent precedes what it needs
    DependentsFirst,
}

#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: Vec<PackageNode>,
    index: HashMap<i64, NodeId>,
    /// Outgoing edges (dependencies) per node
    edges: Vec<Vec<NodeId>>,
    /// Incoming edges (dependents) per node
    reverse_edges: Vec<Vec<NodeId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, returning the existing one if `key` is already present
    pub fn add_node(&mut self, key: i64, label: impl Into<String>) -> NodeId {
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let id = self.nodes.len();
        self.nodes.push(PackageNode {
            key,
            label: label.into(),
        });
        self.edges.push(Vec::new());
        self.reverse_edges.push(Vec::new());
        self.index.insert(key, id);
        id
    }

    /// Record that `from` depends on `to`; duplicates are ignored
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        if !self.edges[from].contains(&to) {
            self.edges[from].push(to);
            self.reverse_edges[to].push(from);
        }
    }

    pub fn node(&self, id: NodeId) -> &PackageNode {
        &self.nodes[id]
    }

    pub fn node_id(&self, key: i64) -> Option<NodeId> {
        self.index.get(&key).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn dependencies(&self, id: NodeId) -> &[NodeId] {
        &self.edges[id]
    }

    pub fn dependents(&self, id: NodeId) -> &[NodeId] {
        &self.reverse_edges[id]
    }

    /// Kahn's algorithm with a min-heap on `key`, so ties resolve to the
    /// lowest package id first
    ///
    /// Fails with [`Error::Cycle`] naming one cycle if the graph is cyclic.
    pub fn order(&self, direction: Direction) -> Result<Vec<NodeId>> {
        let (blockers, unblocks) = match direction {
            Direction::DependenciesFirst => (&self.edges, &self.reverse_edges),
            Direction::DependentsFirst => (&self.reverse_edges, &self.edges),
        };

        let mut remaining: Vec<usize> = blockers.iter().map(Vec::len).collect();
        let mut ready: BinaryHeap<Reverse<(i64, NodeId)>> = remaining
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count == 0)
            .map(|(id, _)| Reverse((self.nodes[id].key, id)))
            .collect();

        let mut result = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse((_, id))) = ready.pop() {
            result.push(id);
            for &next in &unblocks[id] {
                remaining[next] -= 1;
                if remaining[next] == 0 {
                    ready.push(Reverse((self.nodes[next].key, next)));
                }
            }
        }

        if result.len() != self.nodes.len() {
            let cycle = self.detect_cycle().unwrap_or_default();
            return Err(Error::Cycle { cycle });
        }
        Ok(result)
    }

    /// Find one cycle, reported as labels with the first repeated at the end
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut starts: Vec<NodeId> = (0..self.nodes.len()).collect();
        starts.sort_by_key(|&id| self.nodes[id].key);

        for start in starts {
            if marks[start] != Mark::Unvisited {
                continue;
            }

            // Iterative DFS; each frame is (node, next edge to follow)
            let mut stack: Vec<(NodeId, usize)> = vec![(start, 0)];
            marks[start] = Mark::OnStack;

            while let Some(&(node, next_edge)) = stack.last() {
                if let Some(&target) = self.edges[node].get(next_edge) {
                    let top = stack.len() - 1;
                    stack[top].1 += 1;
                    match marks[target] {
                        Mark::Unvisited => {
                            marks[target] = Mark::OnStack;
                            stack.push((target, 0));
                        }
                        Mark::OnStack => {
                            let pos = stack.iter().position(|&(n, _)| n == target)?;
                            let mut cycle: Vec<String> = stack[pos..]
                                .iter()
                                .map(|&(n, _)| self.nodes[n].label.clone())
                                .collect();
                            cycle.push(self.nodes[target].label.clone());
                            return Some(cycle);
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[node] = Mark::Done;
                    stack.pop();
                }
            }
        }

        None
    }
}
