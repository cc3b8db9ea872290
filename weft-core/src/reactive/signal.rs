//! Signals
//!
//! A [`Signal`] is the reactive core's writable leaf value. Reading one
//! inside a memo or effect subscribes that computation to the signal;
//! writing one marks every subscriber stale and flushes them (or defers the
//! flush to the end of the enclosing [`batch`](crate::batch)).
//!
//! The handle is a `Copy` index into the thread-local graph arena, so it
//! moves freely into any number of closures without `clone()` ceremony. The
//! value itself lives in the arena and is torn down with the owner the
//! signal was created under.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::graph::node::{EqualsFn, Node, NodeId};
use crate::reactive::runtime::with_runtime;

/// Build a type-erased comparator from a typed one. A type mismatch is
/// treated as "changed" so a bad downcast can only over-notify, never
/// swallow an update.
pub(crate) fn erase_equals<T: 'static>(equals: impl Fn(&T, &T) -> bool + 'static) -> EqualsFn {
    Rc::new(move |a: &dyn Any, b: &dyn Any| {
        match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
            (Some(a), Some(b)) => equals(a, b),
            _ => false,
        }
    })
}

/// A writable reactive value.
///
/// ```
/// use weft_core::{Effect, Signal};
///
/// let count = Signal::new(0);
/// let _logger = Effect::new(move || {
///     println!("count is {}", count.get());
/// });
/// count.set(1); // the effect re-runs synchronously
/// ```
pub struct Signal<T> {
    id: NodeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Signal<T> {}

impl<T: Clone + PartialEq + 'static> Signal<T> {
    /// Create a signal with `PartialEq` as its change comparator: writes of
    /// an equal value are silently dropped and notify nobody.
    pub fn new(value: T) -> Self {
        Self::with_equals(value, |a, b| a == b)
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// Create a signal with a custom change comparator. Useful for types
    /// without `PartialEq`, or to notify on every write by passing
    /// `|_, _| false`.
    pub fn with_equals(value: T, equals: impl Fn(&T, &T) -> bool + 'static) -> Self {
        let id = with_runtime(|rt| {
            rt.create_node(Node::source(Box::new(value), erase_equals(equals)))
        });
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// Read the current value, subscribing the running computation (if any)
    /// to future changes.
    ///
    /// # Panics
    ///
    /// Panics if the signal's owner has been disposed.
    pub fn get(&self) -> T {
        with_runtime(|rt| rt.read(self.id))
    }

    /// Read the current value without subscribing.
    pub fn get_untracked(&self) -> T {
        with_runtime(|rt| rt.read_untracked(self.id))
    }

    /// Write a new value. If the comparator deems it equal to the current
    /// value nothing happens; otherwise all subscribers re-run before this
    /// returns (or at the end of the enclosing batch).
    pub fn set(&self, value: T) {
        with_runtime(|rt| rt.write(self.id, Box::new(value)));
    }

    /// Write a value derived from the current one. The read is untracked;
    /// `update` inside an effect does not subscribe the effect to itself.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = f(&self.get_untracked());
        self.set(next);
    }

    /// The signal's node ID in the dependency graph.
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signal").field(&self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Effect;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn get_and_set_round_trip() {
        let signal = Signal::new(5);
        assert_eq!(signal.get(), 5);
        signal.set(10);
        assert_eq!(signal.get(), 10);
    }

    #[test]
    fn update_derives_from_the_current_value() {
        let signal = Signal::new(3);
        signal.update(|v| v * 7);
        assert_eq!(signal.get(), 21);
    }

    #[test]
    fn handles_are_copy_and_share_one_value() {
        let a = Signal::new(String::from("hello"));
        let b = a;
        b.set(String::from("world"));
        assert_eq!(a.get(), "world");
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn equal_writes_do_not_notify() {
        let signal = Signal::new(1);
        let runs = Rc::new(Cell::new(0));

        let runs_in = runs.clone();
        let _effect = Effect::new(move || {
            signal.get();
            runs_in.set(runs_in.get() + 1);
        });
        assert_eq!(runs.get(), 1);

        signal.set(1);
        assert_eq!(runs.get(), 1);

        signal.set(2);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn custom_comparator_controls_notification() {
        // Only the sign matters; magnitude changes are ignored.
        let signal = Signal::with_equals(1_i32, |a, b| a.signum() == b.signum());
        let runs = Rc::new(Cell::new(0));

        let runs_in = runs.clone();
        let _effect = Effect::new(move || {
            signal.get();
            runs_in.set(runs_in.get() + 1);
        });
        assert_eq!(runs.get(), 1);

        signal.set(99);
        assert_eq!(runs.get(), 1);

        signal.set(-5);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn untracked_reads_do_not_subscribe() {
        let tracked = Signal::new(0);
        let peeked = Signal::new(0);
        let runs = Rc::new(Cell::new(0));

        let runs_in = runs.clone();
        let _effect = Effect::new(move || {
            tracked.get();
            peeked.get_untracked();
            runs_in.set(runs_in.get() + 1);
        });
        assert_eq!(runs.get(), 1);

        peeked.set(1);
        assert_eq!(runs.get(), 1);

        tracked.set(1);
        assert_eq!(runs.get(), 2);
    }
}
