//! Dependency Graph
//!
//! This module implements the bipartite graph between producers (leaf cells,
//! proxy keys, derived computations) and consumers (derived computations,
//! effects, listeners).
//!
//! # Overview
//!
//! - Nodes live in a generational arena indexed by [`NodeId`].
//! - Every edge is stored twice: the consumer owns a backlink to each of its
//!   producers, and the producer keeps the consumer's id in its dependents.
//! - Producers only hold ids. Removing a consumer from the arena unlinks it
//!   everywhere, so nothing needs a garbage collector to reclaim producer-side
//!   references.
//!
//! # Rewiring
//!
//! Consumers never add edges one by one. After each tracked run the full set
//! of reads is handed to [`Graph::replace_dependencies`], which diffs it
//! against the previous run and drops the edges that were not read again.

mod node;
mod scheduler;

pub use node::{NodeId, NodeKind};
pub(crate) use node::Node;
pub(crate) use scheduler::FlushQueue;

use std::collections::VecDeque;
use std::rc::Rc;

use indexmap::IndexSet;
use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::reactive::Computation;

/// Outcome of a rewiring pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Rewire {
    pub added: usize,
    pub removed: usize,
}

/// The dependency graph.
#[derive(Debug, Default)]
pub(crate) struct Graph {
    nodes: SlotMap<NodeId, Node>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) -> NodeId {
        self.nodes.insert(node)
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, node_id: NodeId) -> bool {
        let Some(node) = self.nodes.remove(node_id) else {
            return false;
        };

        for dep_id in node.dependencies() {
            if let Some(dep) = self.nodes.get_mut(*dep_id) {
                dep.remove_dependent(node_id);
            }
        }
        for dependent_id in node.dependents() {
            if let Some(dependent) = self.nodes.get_mut(*dependent_id) {
                dependent.remove_dependency(node_id);
            }
        }
        true
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn kind(&self, node_id: NodeId) -> Option<NodeKind> {
        self.nodes.get(node_id).map(Node::kind)
    }

    pub fn depth(&self, node_id: NodeId) -> u32 {
        self.nodes.get(node_id).map(Node::depth).unwrap_or(0)
    }

    /// Link `consumer` as a dependent of `producer`.
    pub fn add_edge(&mut self, producer: NodeId, consumer: NodeId) -> bool {
        if producer == consumer || !self.contains(producer) || !self.contains(consumer) {
            return false;
        }
        if let Some(node) = self.nodes.get_mut(producer) {
            node.add_dependent(consumer);
        }
        if let Some(node) = self.nodes.get_mut(consumer) {
            node.add_dependency(producer);
        }
        true
    }

    pub fn remove_edge(&mut self, producer: NodeId, consumer: NodeId) {
        if let Some(node) = self.nodes.get_mut(producer) {
            node.remove_dependent(consumer);
        }
        if let Some(node) = self.nodes.get_mut(consumer) {
            node.remove_dependency(producer);
        }
    }

    /// Replace the producers of `consumer` with exactly `reads`.
    pub fn replace_dependencies(&mut self, consumer: NodeId, reads: &IndexSet<NodeId>) -> Rewire {
        let Some(node) = self.nodes.get(consumer) else {
            return Rewire::default();
        };
        let previous: SmallVec<[NodeId; 4]> = node.dependencies().iter().copied().collect();

        let mut rewire = Rewire::default();
        for stale in previous.iter().filter(|id| !reads.contains(*id)) {
            self.remove_edge(*stale, consumer);
            rewire.removed += 1;
        }
        for fresh in reads.iter().filter(|id| !previous.contains(id)) {
            if self.add_edge(*fresh, consumer) {
                rewire.added += 1;
            }
        }

        self.refresh_depth(consumer);
        rewire
    }

    /// Recompute the level of `start` and push any change downstream.
    fn refresh_depth(&mut self, start: NodeId) {
        let mut queue = VecDeque::from([start]);
        let mut budget = self.nodes.len().saturating_mul(8).max(64);

        while let Some(node_id) = queue.pop_front() {
            budget = budget.saturating_sub(1);
            if budget == 0 {
                break;
            }
            let Some(node) = self.nodes.get(node_id) else {
                continue;
            };
            if !node.kind().is_consumer() {
                continue;
            }
            let depth = 1 + node
                .dependencies()
                .iter()
                .map(|id| self.depth(*id))
                .max()
                .unwrap_or(0);
            if depth == node.depth() {
                continue;
            }
            let dependents: SmallVec<[NodeId; 8]> = node.dependents().iter().copied().collect();
            if let Some(node) = self.nodes.get_mut(node_id) {
                node.set_depth(depth);
            }
            queue.extend(dependents);
        }
    }

    /// Dependents of `node_id`, in subscription order.
    pub fn dependents(&self, node_id: NodeId) -> SmallVec<[NodeId; 8]> {
        self.nodes
            .get(node_id)
            .map(|node| node.dependents().iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn dependency_count(&self, node_id: NodeId) -> usize {
        self.nodes.get(node_id).map(|n| n.dependencies().len()).unwrap_or(0)
    }

    pub fn dependent_count(&self, node_id: NodeId) -> usize {
        self.nodes.get(node_id).map(|n| n.dependents().len()).unwrap_or(0)
    }

    pub fn computation(&self, node_id: NodeId) -> Option<Rc<dyn Computation>> {
        self.nodes.get(node_id).and_then(Node::computation)
    }

    /// Every derived node reachable from `source` through derived nodes,
    /// in breadth-first order.
    pub fn downstream_derived(&self, source: NodeId) -> Vec<NodeId> {
        let mut found = IndexSet::new();
        let mut queue: VecDeque<NodeId> = self.dependents(source).into_iter().collect();

        while let Some(node_id) = queue.pop_front() {
            if self.kind(node_id) != Some(NodeKind::Derived) || !found.insert(node_id) {
                continue;
            }
            queue.extend(self.dependents(node_id));
        }
        found.into_iter().collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.nodes.values().map(|n| n.dependencies().len()).sum()
    }
}
