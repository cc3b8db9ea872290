//! Update Scheduler
//!
//! The scheduler turns arbitrarily many signal writes into a single,
//! ordered, glitch-free propagation pass in which every affected
//! computation runs at most once.
//!
//! # Algorithm
//!
//! 1. A write (or an explicit [`batch`]) opens two queues: one for pure
//!    computations (memos) and one for effects. Writes performed while the
//!    queues are open fold into them; nested batches flatten.
//!
//! 2. Marking walks the graph from the written signal: direct observers
//!    become dirty, everything further downstream becomes maybe-dirty.
//!    Each computation is queued exactly once per flush.
//!
//! 3. At flush, the pure queue drains first. Each entry is resolved
//!    ancestor-first: a maybe-dirty node walks up its source chain, runs
//!    any truly-stale ancestor, and only re-runs itself if a direct source
//!    actually produced a new value. This is what keeps a diamond graph
//!    (`A -> B, A -> C, B -> D, C -> D`) from running `D` twice.
//!
//! 4. The effect queue drains after every pure node has settled, internal
//!    effects before user effects. An effect that writes a signal opens a
//!    nested flush that completes before the outer one resumes.
//!
//! A circuit breaker counts the computations executed in the outermost
//! flush and aborts the batch when the configured limit is exceeded, so an
//! accidental update cycle fails loudly instead of hanging the thread.

use std::cell::Cell;
use std::mem;

use tracing::trace;

use crate::error::ReactiveError;
use crate::graph::node::{DirtyState, NodeId, NodeKind};
use crate::reactive::runtime::{with_runtime, Runtime};

/// Discards the pending queues if a flush unwinds, leaving the runtime
/// usable. Computations that never ran stay dirty and are retried on the
/// next change to any of their sources.
struct FlushGuard<'a> {
    rt: &'a Runtime,
    wait: bool,
    armed: Cell<bool>,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.rt.flush_depth.set(self.rt.flush_depth.get() - 1);
        if self.armed.get() {
            *self.rt.updates.borrow_mut() = None;
            if !self.wait {
                *self.rt.effects.borrow_mut() = None;
            }
        }
    }
}

impl Runtime {
    /// Run `f` inside a batch window. If a batch is already open, `f` just
    /// runs inline and its writes fold into the outer flush. Otherwise the
    /// queues are opened, the logical clock advances, and everything `f`
    /// dirtied is flushed before this returns.
    pub(crate) fn run_updates<T>(&self, f: impl FnOnce() -> T) -> T {
        if self.updates.borrow().is_some() {
            return f();
        }
        let wait = self.effects.borrow().is_some();
        if !wait {
            *self.effects.borrow_mut() = Some(Vec::new());
        }
        if self.flush_depth.get() == 0 {
            self.processed.set(0);
        }
        self.flush_depth.set(self.flush_depth.get() + 1);
        *self.updates.borrow_mut() = Some(Vec::new());
        self.tick.set(self.tick.get() + 1);
        let guard = FlushGuard {
            rt: self,
            wait,
            armed: Cell::new(true),
        };
        let result = f();
        self.complete_updates(wait);
        guard.armed.set(false);
        result
    }

    /// Drain the pure queue (which may grow while draining), then hand the
    /// effect queue over to a nested flush unless an outer flush is still
    /// responsible for it.
    fn complete_updates(&self, wait: bool) {
        loop {
            let queue = {
                let mut updates = self.updates.borrow_mut();
                match updates.as_mut() {
                    Some(q) if !q.is_empty() => mem::take(q),
                    _ => break,
                }
            };
            trace!(count = queue.len(), "flushing pure queue");
            self.charge(queue.len());
            for id in queue {
                self.run_top(id);
            }
        }
        *self.updates.borrow_mut() = None;
        if wait {
            return;
        }
        let effects = self.effects.borrow_mut().take().unwrap_or_default();
        if !effects.is_empty() {
            self.run_updates(|| self.run_effects(effects));
        }
    }

    /// Run a queue of effects: internal effects first, user effects after,
    /// preserving declaration order within each group.
    fn run_effects(&self, queue: Vec<NodeId>) {
        trace!(count = queue.len(), "flushing effect queue");
        self.charge(queue.len());
        let mut user = Vec::with_capacity(queue.len());
        for id in queue {
            let is_user = self
                .nodes
                .borrow()
                .get(&id)
                .map(|n| n.user)
                .unwrap_or(false);
            if is_user {
                user.push(id);
            } else {
                self.run_top(id);
            }
        }
        for id in user {
            self.run_top(id);
        }
    }

    /// Account flush work against the circuit breaker.
    fn charge(&self, count: usize) {
        let limit = self.update_limit.get();
        let total = self.processed.get().saturating_add(count);
        self.processed.set(total);
        if total > limit {
            *self.updates.borrow_mut() = None;
            *self.effects.borrow_mut() = None;
            panic!("{}", ReactiveError::TooManyUpdates { limit });
        }
    }

    /// Resolve one queued computation, running its not-yet-updated dirty
    /// owner ancestors first so it never observes a half-updated chain.
    /// A disposed entry, or one that settled while earlier entries ran, is
    /// skipped.
    pub(crate) fn run_top(&self, id: NodeId) {
        let state = match self.nodes.borrow().get(&id) {
            Some(n) => n.state,
            None => return,
        };
        match state {
            DirtyState::Clean => return,
            DirtyState::MaybeDirty => return self.look_upstream(id, None),
            DirtyState::Dirty => {}
        }
        let tick = self.tick.get();
        let mut ancestors = vec![id];
        let mut cursor = id;
        loop {
            let owner = match self.nodes.borrow().get(&cursor) {
                Some(n) => n.owner,
                None => None,
            };
            let Some(owner) = owner else { break };
            let (state, updated_at) = match self.nodes.borrow().get(&owner) {
                Some(n) => (n.state, n.updated_at),
                None => break,
            };
            if updated_at >= tick {
                break;
            }
            if state != DirtyState::Clean {
                ancestors.push(owner);
            }
            cursor = owner;
        }
        for &node in ancestors.iter().rev() {
            let state = match self.nodes.borrow().get(&node) {
                Some(n) => n.state,
                None => continue,
            };
            match state {
                DirtyState::Dirty => self.update_computation(node),
                DirtyState::MaybeDirty => {
                    // Upstream resolution happens in its own sub-flush; the
                    // open pure queue is set aside meanwhile.
                    let saved = self.updates.borrow_mut().take();
                    self.run_updates(|| self.look_upstream(node, Some(id)));
                    *self.updates.borrow_mut() = saved;
                }
                DirtyState::Clean => {}
            }
        }
    }

    /// Resolve a maybe-dirty computation by settling its memo sources.
    /// The node is optimistically marked clean; if an upstream memo
    /// actually produces a new value, propagation re-marks this node dirty
    /// and re-queues it.
    pub(crate) fn look_upstream(&self, id: NodeId, ignore: Option<NodeId>) {
        let sources = {
            let mut nodes = self.nodes.borrow_mut();
            let Some(node) = nodes.get_mut(&id) else {
                return;
            };
            node.state = DirtyState::Clean;
            node.sources.clone()
        };
        let tick = self.tick.get();
        for src in sources {
            let info = self
                .nodes
                .borrow()
                .get(&src)
                .map(|n| (n.kind(), n.state, n.updated_at));
            let Some((kind, state, updated_at)) = info else {
                continue;
            };
            if kind != NodeKind::Derived {
                continue;
            }
            match state {
                DirtyState::Dirty => {
                    if Some(src) != ignore && updated_at < tick {
                        self.run_top(src);
                    }
                }
                DirtyState::MaybeDirty => self.look_upstream(src, ignore),
                DirtyState::Clean => {}
            }
        }
    }
}

/// Batch multiple writes into a single propagation pass.
///
/// Inside `f`, writes update values but defer propagation; when `f`
/// returns, all affected memos re-run (ancestor-first, at most once each),
/// then all affected effects. Nested `batch` calls flatten into the
/// outermost one.
pub fn batch<T>(f: impl FnOnce() -> T) -> T {
    with_runtime(|rt| rt.run_updates(f))
}

/// Set the runaway-update circuit breaker threshold for the current
/// thread's runtime.
///
/// When more computations than this execute within one outermost flush, the
/// flush is abandoned and the triggering write or [`batch`] call panics
/// with [`ReactiveError::TooManyUpdates`]. Defaults to
/// [`DEFAULT_UPDATE_LIMIT`](crate::reactive::DEFAULT_UPDATE_LIMIT).
pub fn set_update_limit(limit: usize) {
    with_runtime(|rt| rt.update_limit.set(limit));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Effect, Memo, Signal};
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn batch_coalesces_multiple_writes() {
        let signal = Signal::new(0);
        let runs = Rc::new(Cell::new(0));
        let seen = Rc::new(Cell::new(-1));

        let runs_in = runs.clone();
        let seen_in = seen.clone();
        let _effect = Effect::new(move || {
            runs_in.set(runs_in.get() + 1);
            seen_in.set(signal.get());
        });
        assert_eq!(runs.get(), 1);

        batch(|| {
            signal.set(1);
            signal.set(2);
            signal.set(3);
        });

        // One downstream execution, observing the final value.
        assert_eq!(runs.get(), 2);
        assert_eq!(seen.get(), 3);
    }

    #[test]
    fn nested_batches_flatten_into_the_outer_one() {
        let signal = Signal::new(1);
        let runs = Rc::new(Cell::new(0));
        let seen = Rc::new(Cell::new(0));

        let runs_in = runs.clone();
        let seen_in = seen.clone();
        let _effect = Effect::new(move || {
            runs_in.set(runs_in.get() + 1);
            seen_in.set(signal.get());
        });

        batch(|| {
            signal.set(2);
            batch(|| {
                signal.set(3);
            });
            // The inner batch must not have flushed anything yet.
            assert_eq!(runs.get(), 1);
        });

        assert_eq!(runs.get(), 2);
        assert_eq!(seen.get(), 3);
    }

    #[test]
    fn batch_returns_the_closure_result() {
        let signal = Signal::new(10);
        let result = batch(|| {
            signal.set(20);
            "done"
        });
        assert_eq!(result, "done");
        assert_eq!(signal.get_untracked(), 20);
    }

    #[test]
    fn memos_settle_before_effects_in_a_batch() {
        let signal = Signal::new(1);
        let doubled = Memo::new(move |_| signal.get() * 2);
        let observed = Rc::new(Cell::new((0, 0)));

        let observed_in = observed.clone();
        let _effect = Effect::new(move || {
            observed_in.set((signal.get(), doubled.get()));
        });
        assert_eq!(observed.get(), (1, 2));

        batch(|| {
            signal.set(5);
        });
        assert_eq!(observed.get(), (5, 10));
    }

    #[test]
    fn aborted_flush_leaves_computations_retryable() {
        let signal = Signal::new(0);
        let runs = Rc::new(Cell::new(0));
        let seen = Rc::new(Cell::new(0));

        let runs_in = runs.clone();
        let seen_in = seen.clone();
        let _effect = Effect::new(move || {
            runs_in.set(runs_in.get() + 1);
            let value = signal.get();
            if value == 1 {
                panic!("transient failure");
            }
            seen_in.set(value);
        });
        assert_eq!(runs.get(), 1);

        // The panic surfaces out of the write; the flush is abandoned and
        // its queues are discarded.
        let result =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| signal.set(1)));
        assert!(result.is_err());
        assert_eq!(runs.get(), 2);

        // The effect is still dirty from the aborted flush; the next write
        // must queue it again.
        signal.set(2);
        assert_eq!(runs.get(), 3);
        assert_eq!(seen.get(), 2);
    }

    #[test]
    #[should_panic(expected = "possible infinite update cycle")]
    fn runaway_update_cycle_trips_the_circuit_breaker() {
        set_update_limit(100);
        let signal = Signal::new(0);
        // Unconditionally rewrites its own dependency on every run.
        let _effect = Effect::new(move || {
            let v = signal.get();
            signal.set(v + 1);
        });
    }
}
