//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, memos, and
//! effects. It owns the dependency-graph arena and the ambient execution
//! state that makes automatic dependency tracking work.
//!
//! # How It Works
//!
//! 1. Every signal, memo, effect, and root lives as a [`Node`] in a single
//!    per-thread arena, addressed by [`NodeId`]. Handles held by user code
//!    are just indices into that arena.
//!
//! 2. While a computation runs, the runtime's `observer` pointer names it.
//!    Any signal read during that window registers a bidirectional edge
//!    between the signal and the observer.
//!
//! 3. Before a computation re-runs, all of its previous edges are retired
//!    and its owned children and cleanups are torn down, so each run starts
//!    from a clean slate. This is what makes conditional dependency
//!    branches safe.
//!
//! 4. When a signal's value changes, its observers are marked dirty, the
//!    graph below them is marked maybe-dirty, and the affected computations
//!    are queued on the scheduler (see `graph::scheduler`).
//!
//! # Thread Safety
//!
//! The runtime is strictly single-threaded. Each thread gets its own arena
//! via `thread_local!`, and all propagation happens synchronously on the
//! thread that performed the write. Nothing here is `Send` or `Sync`, which
//! is what lets the whole graph live behind plain `Cell`/`RefCell` state
//! instead of locks.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::mem;

use indexmap::IndexMap;
use tracing::trace;

use crate::error::ReactiveError;
use crate::graph::node::{DirtyState, Node, NodeId};

/// Default threshold for the runaway-update circuit breaker.
pub const DEFAULT_UPDATE_LIMIT: usize = 1_000_000;

/// The per-thread reactive runtime.
pub(crate) struct Runtime {
    /// All live nodes, indexed by ID. `IndexMap` keeps iteration (and
    /// therefore diagnostics) deterministic.
    pub(crate) nodes: RefCell<IndexMap<NodeId, Node>>,

    /// The computation currently tracking reads, if any.
    pub(crate) observer: Cell<Option<NodeId>>,

    /// The owner new nodes and cleanups are attributed to, if any.
    pub(crate) owner: Cell<Option<NodeId>>,

    /// Logical clock, incremented once per flush.
    pub(crate) tick: Cell<u64>,

    /// Pending pure (memo) queue. `Some` while a batch is open.
    pub(crate) updates: RefCell<Option<Vec<NodeId>>>,

    /// Pending effect queue. `Some` while a batch is open.
    pub(crate) effects: RefCell<Option<Vec<NodeId>>>,

    /// Circuit-breaker threshold for a single flush.
    pub(crate) update_limit: Cell<usize>,

    /// Computations executed so far in the current outermost flush.
    pub(crate) processed: Cell<usize>,

    /// Nesting depth of open flushes; the breaker counter resets only at
    /// depth zero.
    pub(crate) flush_depth: Cell<usize>,
}

thread_local! {
    static RUNTIME: Runtime = Runtime::new();
}

/// Run `f` with the current thread's runtime.
pub(crate) fn with_runtime<T>(f: impl FnOnce(&Runtime) -> T) -> T {
    RUNTIME.with(f)
}

/// Guard that swaps the runtime's observer/owner pointers and restores them
/// on drop, including on unwind. Every entry into user code goes through
/// this so tracking context never leaks across unrelated calls.
pub(crate) struct ScopeGuard<'a> {
    rt: &'a Runtime,
    observer: Option<NodeId>,
    owner: Option<NodeId>,
}

impl<'a> ScopeGuard<'a> {
    pub(crate) fn enter(
        rt: &'a Runtime,
        observer: Option<NodeId>,
        owner: Option<NodeId>,
    ) -> Self {
        Self {
            rt,
            observer: rt.observer.replace(observer),
            owner: rt.owner.replace(owner),
        }
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.rt.observer.set(self.observer);
        self.rt.owner.set(self.owner);
    }
}

/// Forces a computation back to stale if its run unwinds, so the error is
/// surfaced to the caller without the node being treated as up to date.
struct RetryGuard<'a> {
    rt: &'a Runtime,
    id: NodeId,
}

impl Drop for RetryGuard<'_> {
    fn drop(&mut self) {
        if let Some(node) = self.rt.nodes.borrow_mut().get_mut(&self.id) {
            node.state = DirtyState::Dirty;
        }
    }
}

impl Runtime {
    fn new() -> Self {
        Self {
            nodes: RefCell::new(IndexMap::new()),
            observer: Cell::new(None),
            owner: Cell::new(None),
            tick: Cell::new(0),
            updates: RefCell::new(None),
            effects: RefCell::new(None),
            update_limit: Cell::new(DEFAULT_UPDATE_LIMIT),
            processed: Cell::new(0),
            flush_depth: Cell::new(0),
        }
    }

    // ------------------------------------------------------------------
    // Node creation and access
    // ------------------------------------------------------------------

    /// Insert a node into the arena, attributed to the current owner.
    pub(crate) fn create_node(&self, mut node: Node) -> NodeId {
        let id = node.id();
        let owner = self.owner.get();
        node.owner = owner;
        let mut nodes = self.nodes.borrow_mut();
        nodes.insert(id, node);
        if let Some(o) = owner {
            if let Some(owner_node) = nodes.get_mut(&o) {
                owner_node.owned.push(id);
            }
        }
        id
    }

    /// Insert a detached root node (no owner).
    pub(crate) fn create_root_node(&self) -> NodeId {
        let node = Node::root();
        let id = node.id();
        self.nodes.borrow_mut().insert(id, node);
        id
    }

    pub(crate) fn exists(&self, id: NodeId) -> bool {
        self.nodes.borrow().contains_key(&id)
    }

    /// Read a node's value, resolving staleness and registering a
    /// dependency edge for the current observer.
    pub(crate) fn read<T: Clone + 'static>(&self, id: NodeId) -> T {
        if !self.exists(id) {
            panic!("{}", ReactiveError::Disposed(id));
        }
        self.resolve(id);
        self.track(id);
        self.value_of(id)
    }

    /// Read a node's value without registering a dependency edge.
    pub(crate) fn read_untracked<T: Clone + 'static>(&self, id: NodeId) -> T {
        if !self.exists(id) {
            panic!("{}", ReactiveError::Disposed(id));
        }
        self.resolve(id);
        self.value_of(id)
    }

    fn value_of<T: Clone + 'static>(&self, id: NodeId) -> T {
        let nodes = self.nodes.borrow();
        let node = nodes
            .get(&id)
            .unwrap_or_else(|| panic!("{}", ReactiveError::Disposed(id)));
        node.value
            .as_ref()
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
            .expect("reactive value type mismatch")
    }

    /// If `id` is a dirty memo, bring it up to date before its value is
    /// observed. A directly-stale memo re-runs now; a maybe-stale memo
    /// first walks upstream to find out whether it has to.
    fn resolve(&self, id: NodeId) {
        let pending = {
            let nodes = self.nodes.borrow();
            match nodes.get(&id) {
                Some(n) if n.is_pure() && !n.is_clean() => Some(n.state),
                _ => None,
            }
        };
        match pending {
            Some(DirtyState::Dirty) => self.update_computation(id),
            Some(DirtyState::MaybeDirty) => {
                // Resolve eagerly in a sub-flush; the open pure queue is
                // set aside so it is not drained out of order.
                let saved = self.updates.borrow_mut().take();
                self.run_updates(|| self.look_upstream(id, None));
                *self.updates.borrow_mut() = saved;
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Dependency edges
    // ------------------------------------------------------------------

    /// Register a bidirectional edge between `id` and the current observer,
    /// unless the edge already exists for this run.
    fn track(&self, id: NodeId) {
        let Some(observer) = self.observer.get() else {
            return;
        };
        if observer == id {
            return;
        }
        let mut nodes = self.nodes.borrow_mut();
        let Some(obs_node) = nodes.get(&observer) else {
            return;
        };
        if obs_node.sources.contains(&id) {
            return;
        }
        let Some(src_node) = nodes.get(&id) else {
            return;
        };
        let slot_in_source = src_node.observers.len();
        let slot_in_observer = obs_node.sources.len();
        {
            let obs_node = nodes.get_mut(&observer).expect("observer vanished");
            obs_node.sources.push(id);
            obs_node.source_slots.push(slot_in_source);
        }
        {
            let src_node = nodes.get_mut(&id).expect("source vanished");
            src_node.observers.push(observer);
            src_node.observer_slots.push(slot_in_observer);
        }
    }

    /// Remove `id` from the observer lists of all of its sources and reset
    /// its source lists. Swap-removal with slot fixups keeps every other
    /// edge's reciprocal indices valid.
    fn prune_sources(&self, id: NodeId) {
        let mut nodes = self.nodes.borrow_mut();
        let Some(node) = nodes.get_mut(&id) else {
            return;
        };
        let sources = mem::take(&mut node.sources);
        let slots = mem::take(&mut node.source_slots);
        for (src, slot) in sources.into_iter().zip(slots) {
            let Some(src_node) = nodes.get_mut(&src) else {
                continue;
            };
            src_node.observers.swap_remove(slot);
            src_node.observer_slots.swap_remove(slot);
            if slot < src_node.observers.len() {
                // The observer moved into `slot` must have its reciprocal
                // slot index updated.
                let moved = src_node.observers[slot];
                let moved_source_index = src_node.observer_slots[slot];
                if let Some(moved_node) = nodes.get_mut(&moved) {
                    moved_node.source_slots[moved_source_index] = slot;
                }
            }
        }
    }

    /// Remove `id` from the source lists of all of its observers. Used at
    /// disposal so a torn-down signal/memo leaves no dangling edges in
    /// computations that outlive it.
    fn prune_observers(&self, id: NodeId) {
        let mut nodes = self.nodes.borrow_mut();
        let Some(node) = nodes.get_mut(&id) else {
            return;
        };
        let observers = mem::take(&mut node.observers);
        let slots = mem::take(&mut node.observer_slots);
        for (obs, slot) in observers.into_iter().zip(slots) {
            let Some(obs_node) = nodes.get_mut(&obs) else {
                continue;
            };
            obs_node.sources.swap_remove(slot);
            obs_node.source_slots.swap_remove(slot);
            if slot < obs_node.sources.len() {
                let moved = obs_node.sources[slot];
                let moved_observer_index = obs_node.source_slots[slot];
                if let Some(moved_node) = nodes.get_mut(&moved) {
                    moved_node.observer_slots[moved_observer_index] = slot;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Writes and dirty propagation
    // ------------------------------------------------------------------

    /// Write a new value into a signal node. Equal values (per the node's
    /// comparator) are dropped without any propagation.
    pub(crate) fn write(&self, id: NodeId, next: Box<dyn Any>) {
        let has_observers = {
            let mut nodes = self.nodes.borrow_mut();
            let Some(node) = nodes.get_mut(&id) else {
                panic!("{}", ReactiveError::Disposed(id));
            };
            let equal = match (&node.equals, &node.value) {
                (Some(eq), Some(old)) => eq(old.as_ref(), next.as_ref()),
                _ => false,
            };
            if equal {
                return;
            }
            node.value = Some(next);
            !node.observers.is_empty()
        };
        if has_observers {
            trace!(node = %id, "signal changed, propagating");
            self.run_updates(|| self.mark_observers(id));
        }
    }

    /// Mark the direct observers of `id` stale and walk the graph below
    /// them marking maybe-stale, queueing each affected computation once.
    /// Must be called with a batch open.
    pub(crate) fn mark_observers(&self, id: NodeId) {
        let observers = {
            let nodes = self.nodes.borrow();
            match nodes.get(&id) {
                Some(n) => n.observers.clone(),
                None => return,
            }
        };
        let tick = self.tick.get();
        for obs in observers {
            let (queue, pure, descend) = {
                let mut nodes = self.nodes.borrow_mut();
                let Some(node) = nodes.get_mut(&obs) else {
                    continue;
                };
                // A node queued earlier in this flush is upgraded in place;
                // one left stale by an abandoned flush (its queue entry was
                // discarded) must be queued again.
                let queue = node.is_clean() || node.queued_at < tick;
                node.state = DirtyState::Dirty;
                (
                    queue,
                    node.is_pure(),
                    node.is_pure() && !node.observers.is_empty(),
                )
            };
            if queue {
                self.enqueue(obs, pure);
                if descend {
                    self.mark_downstream(obs);
                }
            }
        }
    }

    fn mark_downstream(&self, id: NodeId) {
        let observers = {
            let nodes = self.nodes.borrow();
            match nodes.get(&id) {
                Some(n) => n.observers.clone(),
                None => return,
            }
        };
        let tick = self.tick.get();
        for obs in observers {
            let (queue, pure, descend) = {
                let mut nodes = self.nodes.borrow_mut();
                let Some(node) = nodes.get_mut(&obs) else {
                    continue;
                };
                let queue = if node.is_clean() {
                    node.state = DirtyState::MaybeDirty;
                    true
                } else {
                    // Already stale: only re-queue if its entry was lost
                    // with an abandoned flush. Never downgrade the state.
                    node.queued_at < tick
                };
                (
                    queue,
                    node.is_pure(),
                    node.is_pure() && !node.observers.is_empty(),
                )
            };
            if queue {
                self.enqueue(obs, pure);
                if descend {
                    self.mark_downstream(obs);
                }
            }
        }
    }

    /// Push a dirty computation onto the pure or effect queue of the open
    /// batch, stamping it with the current tick.
    pub(crate) fn enqueue(&self, id: NodeId, pure: bool) {
        if let Some(node) = self.nodes.borrow_mut().get_mut(&id) {
            node.queued_at = self.tick.get();
        }
        if pure {
            if let Some(queue) = self.updates.borrow_mut().as_mut() {
                queue.push(id);
            }
        } else if let Some(queue) = self.effects.borrow_mut().as_mut() {
            queue.push(id);
        }
    }

    // ------------------------------------------------------------------
    // Computation execution
    // ------------------------------------------------------------------

    /// Re-run a computation: tear down its previous run, execute its
    /// function under a fresh tracking scope, and propagate the result if
    /// it changed.
    pub(crate) fn update_computation(&self, id: NodeId) {
        if !self.exists(id) {
            return;
        }
        // clean_node leaves the node Clean, so a write performed during the
        // run below re-marks it dirty and re-queues it, exactly as if the
        // write had come from anywhere else.
        self.clean_node(id);
        let (compute, prev) = {
            let mut nodes = self.nodes.borrow_mut();
            let Some(node) = nodes.get_mut(&id) else {
                return;
            };
            (node.compute.clone(), node.value.take())
        };
        let Some(compute) = compute else { return };
        let next = {
            let _scope = ScopeGuard::enter(self, Some(id), Some(id));
            // If the run panics, the node is forced back to stale so a
            // future change retries it rather than treating it as up to
            // date.
            let retry = RetryGuard { rt: self, id };
            let mut f = compute.borrow_mut();
            let next = (&mut *f)(prev.as_deref());
            mem::forget(retry);
            next
        };
        let tick = self.tick.get();
        let propagate = {
            let mut nodes = self.nodes.borrow_mut();
            let Some(node) = nodes.get_mut(&id) else {
                // The computation disposed itself during its own run.
                return;
            };
            let changed = match (&node.equals, &prev) {
                (Some(eq), Some(old)) => !eq(old.as_ref(), next.as_ref()),
                _ => true,
            };
            node.value = Some(next);
            node.updated_at = tick;
            changed && node.is_pure() && !node.observers.is_empty()
        };
        if propagate {
            trace!(node = %id, "memo changed, propagating");
            self.mark_observers(id);
        }
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Reset a node to a clean slate: dispose owned children (newest
    /// first), run cleanups in reverse registration order, retire source
    /// edges, and drop provided context. Runs before every re-execution
    /// and as the first half of disposal.
    pub(crate) fn clean_node(&self, id: NodeId) {
        let owned = {
            let mut nodes = self.nodes.borrow_mut();
            match nodes.get_mut(&id) {
                Some(node) => mem::take(&mut node.owned),
                None => return,
            }
        };
        for child in owned.into_iter().rev() {
            self.dispose_node(child);
        }
        let cleanups = {
            let mut nodes = self.nodes.borrow_mut();
            match nodes.get_mut(&id) {
                Some(node) => mem::take(&mut node.cleanups),
                None => Vec::new(),
            }
        };
        if !cleanups.is_empty() {
            // Cleanups run untracked; a signal read inside one must not
            // register an edge on whatever computation is active.
            let _scope = ScopeGuard::enter(self, None, self.owner.get());
            for cleanup in cleanups.into_iter().rev() {
                cleanup();
            }
        }
        self.prune_sources(id);
        if let Some(node) = self.nodes.borrow_mut().get_mut(&id) {
            node.context = None;
            node.state = DirtyState::Clean;
        }
    }

    /// Dispose a node and its whole owned subtree. Idempotent: disposing a
    /// node twice (or a node whose ancestor was already disposed) is a
    /// no-op.
    pub(crate) fn dispose_node(&self, id: NodeId) {
        if !self.exists(id) {
            return;
        }
        trace!(node = %id, "disposing");
        self.clean_node(id);
        self.prune_observers(id);
        let owner = {
            let mut nodes = self.nodes.borrow_mut();
            let owner = nodes.get(&id).and_then(|n| n.owner);
            nodes.swap_remove(&id);
            owner
        };
        // Detach from the parent's owned list so explicit disposal does
        // not leave a dangling child entry behind.
        if let Some(o) = owner {
            if let Some(owner_node) = self.nodes.borrow_mut().get_mut(&o) {
                owner_node.owned.retain(|child| *child != id);
            }
        }
    }
}

/// Run `f` with dependency tracking suspended: signal reads inside do not
/// register edges on the currently running computation. The owner scope is
/// unaffected.
pub fn untrack<T>(f: impl FnOnce() -> T) -> T {
    with_runtime(|rt| {
        let _scope = ScopeGuard::enter(rt, None, rt.owner.get());
        f()
    })
}
