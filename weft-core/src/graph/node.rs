//! Graph Nodes
//!
//! This module defines the node record that lives in the dependency-graph
//! arena. A single record type covers every role in the graph:
//!
//! - A signal is a node with a value and observers but no computation.
//! - A memo is both: it caches a value, observes its sources, and is itself
//!   observed by downstream computations.
//! - An effect observes sources but produces no observable value.
//! - A root is an owner-only node used to scope resource lifetimes.
//!
//! Every computation is also an owner: nested computations and cleanups
//! created during its run are recorded on it and torn down before each
//! re-run and at disposal.
//!
//! # Edge bookkeeping
//!
//! Dependency edges are bidirectional. A computation's `sources` list and a
//! signal's `observers` list are kept in sync, with parallel slot vectors
//! (`source_slots` / `observer_slots`) recording each edge's index on the
//! other side. That makes edge removal a swap-remove plus one index fixup
//! instead of a linear scan, which matters because every re-run of a
//! computation retires all of its old edges.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

/// Unique identifier for a node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role a node plays in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A signal. Holds a value, has observers, never re-runs.
    Source,

    /// A memo. Holds a cached value, observes sources, is observed by
    /// dependents, and re-runs ahead of effects (pure phase).
    Derived,

    /// An effect. Observes sources and re-runs for its side effects after
    /// all derived nodes in the same flush have settled.
    Effect,

    /// An owner-only node created by `create_root`. Holds owned children,
    /// cleanups, and context, but takes no part in dependency tracking.
    Root,
}

/// Dirty state of a computation node.
///
/// Source nodes are always `Clean`; a write propagates dirtiness to the
/// node's observers rather than marking the source itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyState {
    /// The node's value is up-to-date.
    Clean,

    /// A transitive dependency changed, but no direct source has been
    /// confirmed different yet. The node re-runs only if walking upstream
    /// proves a direct source actually produced a new value.
    MaybeDirty,

    /// A direct source changed. The node must re-run.
    Dirty,
}

/// Type-erased re-runnable computation. Receives the node's previous value
/// and produces the next one.
pub(crate) type ComputeFn = Rc<RefCell<dyn FnMut(Option<&dyn Any>) -> Box<dyn Any>>>;

/// Type-erased value comparator used for the equality short-circuit.
pub(crate) type EqualsFn = Rc<dyn Fn(&dyn Any, &dyn Any) -> bool>;

/// Edge list with inline capacity; most nodes have a handful of edges.
pub(crate) type EdgeList = SmallVec<[NodeId; 4]>;

/// Parallel slot indices for an edge list.
pub(crate) type SlotList = SmallVec<[usize; 4]>;

/// A node in the dependency graph arena.
pub(crate) struct Node {
    /// Unique identifier for this node.
    id: NodeId,

    /// What role this node plays.
    kind: NodeKind,

    /// Current dirty state.
    pub(crate) state: DirtyState,

    /// Current value. `None` for roots, for effects that carry no value,
    /// and transiently while a computation is re-running.
    pub(crate) value: Option<Box<dyn Any>>,

    /// The re-runnable function (memos and effects only).
    pub(crate) compute: Option<ComputeFn>,

    /// Change comparator. A write or recomputation that produces an equal
    /// value does not propagate. `None` for effects and roots.
    pub(crate) equals: Option<EqualsFn>,

    /// Signals and memos read during the most recent run, in read order.
    pub(crate) sources: EdgeList,

    /// For each source, the index of this node in that source's observers.
    pub(crate) source_slots: SlotList,

    /// Computations currently depending on this node, in subscription order.
    pub(crate) observers: EdgeList,

    /// For each observer, the index of this node in that observer's sources.
    pub(crate) observer_slots: SlotList,

    /// The owner this node was created under. Roots have no owner.
    pub(crate) owner: Option<NodeId>,

    /// Child nodes created during this node's scope, in creation order.
    pub(crate) owned: Vec<NodeId>,

    /// Cleanup callbacks, run in reverse registration order.
    pub(crate) cleanups: Vec<Box<dyn FnOnce()>>,

    /// Ambient values provided at this owner, keyed by type. Descendants
    /// look keys up by walking the owner chain.
    pub(crate) context: Option<HashMap<TypeId, Rc<dyn Any>>>,

    /// Logical tick of the last execution. Guards against a node being run
    /// twice within one flush.
    pub(crate) updated_at: u64,

    /// Logical tick at which this node was last queued. A write re-queues
    /// a computation left stale by an abandoned flush (its entry was
    /// discarded with the queues) without double-queueing inside a live
    /// one.
    pub(crate) queued_at: u64,

    /// Whether this is a user effect. User effects run after internal
    /// effects within the same flush.
    pub(crate) user: bool,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            id: NodeId::new(),
            kind,
            state: match kind {
                NodeKind::Source | NodeKind::Root => DirtyState::Clean,
                // Computations start dirty so their first run establishes
                // the value and the initial edges.
                NodeKind::Derived | NodeKind::Effect => DirtyState::Dirty,
            },
            value: None,
            compute: None,
            equals: None,
            sources: EdgeList::new(),
            source_slots: SlotList::new(),
            observers: EdgeList::new(),
            observer_slots: SlotList::new(),
            owner: None,
            owned: Vec::new(),
            cleanups: Vec::new(),
            context: None,
            updated_at: 0,
            queued_at: 0,
            user: false,
        }
    }

    /// Create a signal node holding `value`.
    pub(crate) fn source(value: Box<dyn Any>, equals: EqualsFn) -> Self {
        let mut node = Self::new(NodeKind::Source);
        node.value = Some(value);
        node.equals = Some(equals);
        node
    }

    /// Create a memo node. The value is established by the first run.
    pub(crate) fn derived(compute: ComputeFn, equals: EqualsFn) -> Self {
        let mut node = Self::new(NodeKind::Derived);
        node.compute = Some(compute);
        node.equals = Some(equals);
        node
    }

    /// Create an effect node. `user` effects are deferred behind internal
    /// effects within each flush.
    pub(crate) fn effect(compute: ComputeFn, user: bool) -> Self {
        let mut node = Self::new(NodeKind::Effect);
        node.compute = Some(compute);
        node.user = user;
        node
    }

    /// Create an owner-only root node.
    pub(crate) fn root() -> Self {
        Self::new(NodeKind::Root)
    }

    /// Get the node's ID.
    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    /// Get the node's kind.
    pub(crate) fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Whether this node is a pure computation (memo). Pure nodes are
    /// flushed ahead of effects.
    pub(crate) fn is_pure(&self) -> bool {
        self.kind == NodeKind::Derived
    }

    /// Check if the node needs any processing.
    pub(crate) fn is_clean(&self) -> bool {
        self.state == DirtyState::Clean
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("sources", &self.sources.len())
            .field("observers", &self.observers.len())
            .field("owned", &self.owned.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn source_node_starts_clean() {
        let node = Node::source(Box::new(0_i32), Rc::new(|_, _| false));
        assert_eq!(node.kind(), NodeKind::Source);
        assert!(node.is_clean());
        assert!(node.compute.is_none());
    }

    #[test]
    fn derived_node_starts_dirty() {
        let node = Node::derived(
            Rc::new(RefCell::new(|_: Option<&dyn Any>| Box::new(0_i32) as Box<dyn Any>)),
            Rc::new(|_, _| false),
        );
        assert_eq!(node.kind(), NodeKind::Derived);
        assert_eq!(node.state, DirtyState::Dirty);
        assert!(node.is_pure());
        assert!(node.compute.is_some());
    }

    #[test]
    fn effect_node_is_impure() {
        let node = Node::effect(
            Rc::new(RefCell::new(|_: Option<&dyn Any>| Box::new(()) as Box<dyn Any>)),
            true,
        );
        assert_eq!(node.kind(), NodeKind::Effect);
        assert!(!node.is_pure());
        assert!(node.user);
    }

    #[test]
    fn root_node_is_owner_only() {
        let node = Node::root();
        assert_eq!(node.kind(), NodeKind::Root);
        assert!(node.is_clean());
        assert!(node.compute.is_none());
        assert!(node.owner.is_none());
    }
}
