//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.

use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexSet;
use slotmap::new_key_type;
use smallvec::SmallVec;

use crate::reactive::Computation;

new_key_type! {
    /// Identifier of a node in the dependency graph.
    ///
    /// Ids are generational: a stale id never resolves to a newer node that
    /// reused the same slot.
    pub struct NodeId;
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A producer with no inputs: a leaf cell, a proxy key, a proxy's shape
    /// version or a proxy root.
    Source,

    /// A derived computation. Consumes its inputs and produces a value.
    Derived,

    /// An effect. Re-runs eagerly during flush.
    Effect,

    /// An external listener. Receives change descriptors during flush.
    Listener,
}

impl NodeKind {
    /// Whether nodes of this kind read other nodes.
    pub fn is_consumer(self) -> bool {
        !matches!(self, NodeKind::Source)
    }
}

/// A node in the dependency graph.
pub(crate) struct Node {
    kind: NodeKind,

    /// Level in the graph. Sources sit at 0, every consumer sits one level
    /// below its deepest input. The flush queue drains by ascending depth.
    depth: u32,

    /// Producers this node read during its last run. Owned backlinks.
    dependencies: SmallVec<[NodeId; 4]>,

    /// Consumers reading this node, in subscription order. These are plain
    /// ids, so a producer never keeps a consumer alive.
    dependents: IndexSet<NodeId>,

    /// The computation behind a consumer node.
    computation: Option<Weak<dyn Computation>>,
}

impl Node {
    /// Create a source node.
    pub fn source() -> Self {
        Self::new(NodeKind::Source, None)
    }

    /// Create a consumer node backed by `computation`.
    pub fn consumer(kind: NodeKind, computation: Weak<dyn Computation>) -> Self {
        debug_assert!(kind.is_consumer());
        Self::new(kind, Some(computation))
    }

    fn new(kind: NodeKind, computation: Option<Weak<dyn Computation>>) -> Self {
        Self {
            kind,
            depth: if kind.is_consumer() { 1 } else { 0 },
            dependencies: SmallVec::new(),
            dependents: IndexSet::new(),
            computation,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn set_depth(&mut self, depth: u32) {
        self.depth = depth;
    }

    pub fn dependencies(&self) -> &[NodeId] {
        &self.dependencies
    }

    pub fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }

    pub fn add_dependency(&mut self, node_id: NodeId) {
        if !self.dependencies.contains(&node_id) {
            self.dependencies.push(node_id);
        }
    }

    pub fn remove_dependency(&mut self, node_id: NodeId) {
        self.dependencies.retain(|id| *id != node_id);
    }

    pub fn add_dependent(&mut self, node_id: NodeId) {
        self.dependents.insert(node_id);
    }

    pub fn remove_dependent(&mut self, node_id: NodeId) {
        // Keep the remaining subscription order intact.
        self.dependents.shift_remove(&node_id);
    }

    /// Upgrade the computation handle, if the consumer is still alive.
    pub fn computation(&self) -> Option<Rc<dyn Computation>> {
        self.computation.as_ref().and_then(Weak::upgrade)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("kind", &self.kind)
            .field("depth", &self.depth)
            .field("dependencies", &self.dependencies.len())
            .field("dependents", &self.dependents.len())
            .finish()
    }
}
