//! Memos
//!
//! A [`Memo`] is a derived value: a pure computation whose result is cached
//! and whose dependencies are re-collected on every run. Reading a memo
//! subscribes the reader, exactly like reading a signal; the memo itself
//! only re-runs when one of its own sources actually changed.
//!
//! Memos are the glitch-free layer of the graph. Within a flush every stale
//! memo settles before any effect runs, and a memo re-runs at most once per
//! flush even when several of its sources changed in the same batch. A memo
//! whose recomputation produces an equal value stops propagation there, so
//! dependents of `is_even(count)` re-run on parity changes only.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::graph::node::{ComputeFn, Node, NodeId};
use crate::reactive::runtime::with_runtime;
use crate::reactive::signal::erase_equals;

/// Wrap a typed computation for storage in the graph. The closure receives
/// the previous value on re-runs.
pub(crate) fn erase_compute<T: 'static>(
    mut f: impl FnMut(Option<&T>) -> T + 'static,
) -> ComputeFn {
    Rc::new(RefCell::new(move |prev: Option<&dyn Any>| {
        let prev = prev.and_then(|p| p.downcast_ref::<T>());
        Box::new(f(prev)) as Box<dyn Any>
    }))
}

/// A cached derived value.
///
/// ```
/// use weft_core::{Memo, Signal};
///
/// let count = Signal::new(2);
/// let squared = Memo::new(move |_| count.get() * count.get());
/// assert_eq!(squared.get(), 4);
/// count.set(3);
/// assert_eq!(squared.get(), 9);
/// ```
pub struct Memo<T> {
    id: NodeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Memo<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Memo<T> {}

impl<T: Clone + PartialEq + 'static> Memo<T> {
    /// Create a memo with `PartialEq` as its change comparator. The
    /// computation runs once immediately to establish the initial value and
    /// dependency edges; `prev` is `None` on that first run.
    pub fn new(f: impl FnMut(Option<&T>) -> T + 'static) -> Self {
        Self::with_equals(f, |a, b| a == b)
    }
}

impl<T: Clone + 'static> Memo<T> {
    /// Create a memo with a custom change comparator. Recomputations whose
    /// result the comparator deems equal keep the old value and do not
    /// notify dependents.
    pub fn with_equals(
        f: impl FnMut(Option<&T>) -> T + 'static,
        equals: impl Fn(&T, &T) -> bool + 'static,
    ) -> Self {
        let id = with_runtime(|rt| {
            let id = rt.create_node(Node::derived(erase_compute(f), erase_equals(equals)));
            // Eager initial run, inside a batch window so anything it
            // dirties settles before the constructor returns.
            rt.run_updates(|| rt.update_computation(id));
            id
        });
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// Read the cached value, subscribing the running computation (if any).
    /// If the memo is stale when read, it recomputes first; a memo never
    /// hands out a stale value.
    ///
    /// # Panics
    ///
    /// Panics if the memo's owner has been disposed.
    pub fn get(&self) -> T {
        with_runtime(|rt| rt.read(self.id))
    }

    /// Read the cached value without subscribing. Still recomputes first if
    /// stale.
    pub fn get_untracked(&self) -> T {
        with_runtime(|rt| rt.read_untracked(self.id))
    }

    /// The memo's node ID in the dependency graph.
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl<T> fmt::Debug for Memo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Memo").field(&self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Effect, Signal};
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn memo_caches_between_changes() {
        let signal = Signal::new(2);
        let computations = Rc::new(Cell::new(0));

        let computations_in = computations.clone();
        let doubled = Memo::new(move |_| {
            computations_in.set(computations_in.get() + 1);
            signal.get() * 2
        });
        assert_eq!(computations.get(), 1);

        // Repeated reads hit the cache.
        assert_eq!(doubled.get(), 4);
        assert_eq!(doubled.get(), 4);
        assert_eq!(computations.get(), 1);

        signal.set(5);
        assert_eq!(doubled.get(), 10);
        assert_eq!(computations.get(), 2);
    }

    #[test]
    fn memo_chains_propagate() {
        let signal = Signal::new(1);
        let doubled = Memo::new(move |_| signal.get() * 2);
        let quadrupled = Memo::new(move |_| doubled.get() * 2);

        assert_eq!(quadrupled.get(), 4);
        signal.set(3);
        assert_eq!(quadrupled.get(), 12);
    }

    #[test]
    fn first_run_sees_no_previous_value() {
        let signal = Signal::new(10);
        let history = Memo::new(move |prev: Option<&Vec<i32>>| {
            let mut all = prev.cloned().unwrap_or_default();
            all.push(signal.get());
            all
        });
        assert_eq!(history.get(), vec![10]);

        signal.set(20);
        assert_eq!(history.get(), vec![10, 20]);
    }

    #[test]
    fn equal_results_stop_propagation() {
        let count = Signal::new(0);
        let parity_runs = Rc::new(Cell::new(0));
        let effect_runs = Rc::new(Cell::new(0));

        let parity_runs_in = parity_runs.clone();
        let is_even = Memo::new(move |_| {
            parity_runs_in.set(parity_runs_in.get() + 1);
            count.get() % 2 == 0
        });

        let effect_runs_in = effect_runs.clone();
        let _effect = Effect::new(move || {
            is_even.get();
            effect_runs_in.set(effect_runs_in.get() + 1);
        });
        assert_eq!((parity_runs.get(), effect_runs.get()), (1, 1));

        // 0 -> 2: the memo re-runs but its value is unchanged, so the
        // effect must not.
        count.set(2);
        assert_eq!((parity_runs.get(), effect_runs.get()), (2, 1));

        // 2 -> 3: parity flips, both re-run.
        count.set(3);
        assert_eq!((parity_runs.get(), effect_runs.get()), (3, 2));
    }

    #[test]
    fn diamond_dependencies_run_the_join_once_per_change() {
        let a = Signal::new(1);
        let b = Memo::new(move |_| a.get() + 1);
        let c = Memo::new(move |_| a.get() * 10);
        let join_runs = Rc::new(Cell::new(0));

        let join_runs_in = join_runs.clone();
        let d = Memo::new(move |_| {
            join_runs_in.set(join_runs_in.get() + 1);
            b.get() + c.get()
        });
        assert_eq!(d.get(), 12);
        assert_eq!(join_runs.get(), 1);

        a.set(2);
        // Both branches changed, but the join recomputes exactly once and
        // sees both new values.
        assert_eq!(d.get(), 23);
        assert_eq!(join_runs.get(), 2);
    }

    #[test]
    fn unobserved_memo_stays_current() {
        let signal = Signal::new(1);
        let doubled = Memo::new(move |_| signal.get() * 2);

        // No effect observes the memo; it must still be current by the
        // time it is read.
        signal.set(4);
        assert_eq!(doubled.get(), 8);
        assert_eq!(doubled.get_untracked(), 8);
    }
}
