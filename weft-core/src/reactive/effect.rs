//! Effects
//!
//! An [`Effect`] is a computation run for its side effects: rendering,
//! logging, writing to the outside world. It runs once at creation to
//! collect its initial dependencies, then re-runs whenever one of them
//! changes, after every stale memo in the same flush has settled.
//!
//! Effects created through [`Effect::new`] are user effects; the scheduler
//! defers them behind internal effects ([`Effect::new_internal`]) within
//! each flush, so framework bookkeeping observes new state before user
//! code does.
//!
//! An effect is also an owner: cleanups registered during a run (and any
//! nested computations it creates) are torn down before the next run and
//! at disposal.

use std::fmt;
use std::marker::PhantomData;

use crate::graph::node::{Node, NodeId};
use crate::reactive::memo::erase_compute;
use crate::reactive::runtime::with_runtime;

/// Insert an effect node and perform its initial run. Inside an open batch
/// the run is deferred to the effect phase; otherwise it happens now under
/// a fresh flush.
fn spawn(node: Node) -> NodeId {
    with_runtime(|rt| {
        let id = rt.create_node(node);
        let deferred = rt.effects.borrow().is_some();
        if deferred {
            rt.enqueue(id, false);
        } else {
            rt.run_updates(|| rt.update_computation(id));
        }
        id
    })
}

/// A side-effecting computation.
///
/// ```
/// use weft_core::{Effect, Signal};
///
/// let name = Signal::new("world");
/// let _greeter = Effect::new(move || {
///     println!("hello, {}", name.get());
/// });
/// name.set("weft"); // prints again
/// ```
#[derive(Clone, Copy)]
pub struct Effect {
    id: NodeId,
}

impl Effect {
    /// Create a user effect. It runs immediately (or at the end of the
    /// enclosing batch) and re-runs after its dependencies change.
    pub fn new(mut f: impl FnMut() + 'static) -> Self {
        let node = Node::effect(erase_compute(move |_: Option<&()>| f()), true);
        Self { id: spawn(node) }
    }

    /// Create an internal effect. Internal effects run ahead of user
    /// effects within each flush; intended for framework-level bookkeeping
    /// built on top of the core.
    pub fn new_internal(mut f: impl FnMut() + 'static) -> Self {
        let node = Node::effect(erase_compute(move |_: Option<&()>| f()), false);
        Self { id: spawn(node) }
    }

    /// Dispose the effect: run its cleanups, retire its dependency edges,
    /// and remove it from the graph. Idempotent. Effects owned by a root
    /// are disposed with it; this is for tearing one down early.
    pub fn dispose(&self) {
        with_runtime(|rt| rt.dispose_node(self.id));
    }

    /// The effect's node ID in the dependency graph.
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Effect").field(&self.id).finish()
    }
}

/// An effect whose closure threads a value from run to run, for fold-style
/// side effects like diffing against the previous render.
pub struct StatefulEffect<T> {
    id: NodeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> StatefulEffect<T> {
    /// Create an effect that receives the value returned by its previous
    /// run. The first run receives `initial`.
    pub fn new(initial: Option<T>, f: impl FnMut(Option<&T>) -> T + 'static) -> Self {
        let mut node = Node::effect(erase_compute(f), true);
        node.value = initial.map(|v| Box::new(v) as Box<dyn std::any::Any>);
        Self {
            id: spawn(node),
            _marker: PhantomData,
        }
    }

    /// Dispose the effect. Idempotent.
    pub fn dispose(&self) {
        with_runtime(|rt| rt.dispose_node(self.id));
    }

    /// The effect's node ID in the dependency graph.
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl<T> fmt::Debug for StatefulEffect<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StatefulEffect").field(&self.id).finish()
    }
}
