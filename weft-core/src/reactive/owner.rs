//! Owner Tree
//!
//! Every computation and cleanup belongs to exactly one owner. Owners form
//! a tree: a computation owns the nested computations and cleanups created
//! while it runs, and a root created with [`create_root`] anchors a whole
//! subtree. Disposing an owner tears its subtree down deterministically:
//! owned children first (deepest first, reverse creation order), then
//! cleanups in reverse registration order.
//!
//! Owners also carry context: ambient values provided at one owner are
//! visible to every descendant via [`use_context`], which walks the owner
//! chain. Higher layers use this for things like locale or theme providers;
//! the core only supplies the walk.

use std::any::TypeId;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::graph::node::NodeId;
use crate::reactive::runtime::{with_runtime, ScopeGuard};

/// Copyable handle to an owner node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner(pub(crate) NodeId);

impl Owner {
    /// The owner that new computations and cleanups are currently
    /// attributed to, if any.
    pub fn current() -> Option<Owner> {
        with_runtime(|rt| rt.owner.get().map(Owner))
    }
}

/// Handle returned by [`create_root`] that tears down the root's subtree.
///
/// Dropping the disposer without calling [`dispose`](Self::dispose) leaks
/// the subtree intentionally: the root stays alive for the rest of the
/// thread, which is the right behavior for application-lifetime scopes.
#[derive(Debug)]
pub struct RootDisposer(NodeId);

impl RootDisposer {
    /// Dispose the root and everything it transitively owns. Every cleanup
    /// registered in the subtree runs exactly once.
    pub fn dispose(self) {
        with_runtime(|rt| rt.dispose_node(self.0));
    }

    /// The root as an [`Owner`], usable with [`run_with_owner`].
    pub fn owner(&self) -> Owner {
        Owner(self.0)
    }
}

/// Create a detached ownership root and run `f` under it.
///
/// Signals, memos, and effects created inside `f` belong to the root and
/// are torn down when the returned [`RootDisposer`] is invoked. Dependency
/// tracking is suspended at the root boundary, so creating a root inside a
/// running computation does not subscribe that computation to anything `f`
/// reads.
pub fn create_root<T>(f: impl FnOnce() -> T) -> (T, RootDisposer) {
    with_runtime(|rt| {
        let id = rt.create_root_node();
        let result = {
            let _scope = ScopeGuard::enter(rt, None, Some(id));
            f()
        };
        (result, RootDisposer(id))
    })
}

/// Register a cleanup on the current owner.
///
/// Cleanups run in reverse registration order, before their owner re-runs
/// and when it is disposed. Calling this with no active owner is a silent
/// no-op: top-level, non-rooted usage is allowed, it just has no scope to
/// clean up with.
pub fn on_cleanup(f: impl FnOnce() + 'static) {
    with_runtime(|rt| {
        let Some(owner) = rt.owner.get() else {
            debug!("on_cleanup called outside any owner; cleanup will never run");
            return;
        };
        if let Some(node) = rt.nodes.borrow_mut().get_mut(&owner) {
            node.cleanups.push(Box::new(f));
        }
    });
}

/// Run `f` with `owner` as the active owner, restoring the previous owner
/// on all exit paths. Reads inside `f` are untracked; this swaps ownership
/// attribution, not dependency tracking.
pub fn run_with_owner<T>(owner: Owner, f: impl FnOnce() -> T) -> T {
    with_runtime(|rt| {
        let _scope = ScopeGuard::enter(rt, None, Some(owner.0));
        f()
    })
}

/// Provide a context value on the current owner, keyed by its type.
///
/// Descendant scopes retrieve it with [`use_context`]. Providing a second
/// value of the same type at the same owner replaces the first; providing
/// at a descendant shadows the ancestor. Without an active owner this is a
/// no-op, mirroring [`on_cleanup`].
pub fn provide_context<T: 'static>(value: T) {
    with_runtime(|rt| {
        let Some(owner) = rt.owner.get() else {
            debug!("provide_context called outside any owner; value dropped");
            return;
        };
        if let Some(node) = rt.nodes.borrow_mut().get_mut(&owner) {
            node.context
                .get_or_insert_with(HashMap::new)
                .insert(TypeId::of::<T>(), Rc::new(value));
        }
    });
}

/// Look up a context value of type `T`, walking from the current owner up
/// through its ancestors. Returns the nearest provided value, or `None` if
/// no ancestor provided one.
pub fn use_context<T: Clone + 'static>() -> Option<T> {
    with_runtime(|rt| {
        let nodes = rt.nodes.borrow();
        let mut cursor = rt.owner.get();
        while let Some(id) = cursor {
            let node = nodes.get(&id)?;
            if let Some(context) = &node.context {
                if let Some(value) = context.get(&TypeId::of::<T>()) {
                    return value.downcast_ref::<T>().cloned();
                }
            }
            cursor = node.owner;
        }
        None
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Effect, Signal};
    use std::cell::RefCell;

    #[test]
    fn cleanups_run_in_reverse_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));

        let log_a = log.clone();
        let log_b = log.clone();
        let ((), disposer) = create_root(move || {
            on_cleanup(move || log_a.borrow_mut().push("first"));
            on_cleanup(move || log_b.borrow_mut().push("second"));
        });

        assert!(log.borrow().is_empty());
        disposer.dispose();
        assert_eq!(*log.borrow(), vec!["second", "first"]);
    }

    #[test]
    fn nested_owner_cleanups_run_deepest_first() {
        let log = Rc::new(RefCell::new(Vec::new()));

        let outer_log = log.clone();
        let ((), disposer) = create_root(move || {
            let inner_log = outer_log.clone();
            let signal = Signal::new(0);
            // The effect is an owner; its cleanup belongs to it, not the
            // root.
            let _effect = Effect::new(move || {
                signal.get();
                let cy = inner_log.clone();
                on_cleanup(move || cy.borrow_mut().push("cy"));
            });
            let cx = outer_log.clone();
            on_cleanup(move || cx.borrow_mut().push("cx"));
        });

        disposer.dispose();
        assert_eq!(*log.borrow(), vec!["cy", "cx"]);
    }

    #[test]
    fn disposing_a_root_stops_its_effects() {
        let signal = Signal::new(0);
        let runs = Rc::new(RefCell::new(0));

        let runs_in = runs.clone();
        let ((), disposer) = create_root(move || {
            let _effect = Effect::new(move || {
                signal.get();
                *runs_in.borrow_mut() += 1;
            });
        });
        assert_eq!(*runs.borrow(), 1);

        signal.set(1);
        assert_eq!(*runs.borrow(), 2);

        disposer.dispose();
        signal.set(2);
        assert_eq!(*runs.borrow(), 2);
    }

    #[test]
    fn cleanup_runs_before_each_effect_rerun() {
        let signal = Signal::new(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let log_in = log.clone();
        let ((), _disposer) = create_root(move || {
            let _effect = Effect::new(move || {
                let value = signal.get();
                log_in.borrow_mut().push(format!("run {value}"));
                let log_cleanup = log_in.clone();
                on_cleanup(move || log_cleanup.borrow_mut().push("cleanup".into()));
            });
        });

        signal.set(1);
        assert_eq!(*log.borrow(), vec!["run 0", "cleanup", "run 1"]);
    }

    #[test]
    fn on_cleanup_without_an_owner_is_a_no_op() {
        // Must not panic; there is simply no scope to attach to.
        on_cleanup(|| unreachable!("never runs"));
    }

    #[test]
    fn context_is_visible_to_descendants() {
        #[derive(Clone, Debug, PartialEq)]
        struct Locale(&'static str);

        let (found, disposer) = create_root(|| {
            provide_context(Locale("en-US"));
            let (inner, inner_disposer) = create_root(|| use_context::<Locale>());
            inner_disposer.dispose();
            // A nested root is detached; it does not see ancestor context.
            assert_eq!(inner, None);
            use_context::<Locale>()
        });
        assert_eq!(found, Some(Locale("en-US")));
        disposer.dispose();
    }

    #[test]
    fn context_lookup_walks_nested_owners() {
        #[derive(Clone, Debug, PartialEq)]
        struct Theme(&'static str);

        let seen = Rc::new(RefCell::new(None));
        let seen_in = seen.clone();
        let ((), disposer) = create_root(move || {
            provide_context(Theme("dark"));
            let signal = Signal::new(0);
            let seen_effect = seen_in.clone();
            // The effect is a child owner; lookup walks up to the root.
            let _effect = Effect::new(move || {
                signal.get();
                *seen_effect.borrow_mut() = use_context::<Theme>();
            });
        });
        assert_eq!(*seen.borrow(), Some(Theme("dark")));
        disposer.dispose();
    }

    #[test]
    fn run_with_owner_attributes_cleanups_to_the_target() {
        let log = Rc::new(RefCell::new(Vec::new()));

        let ((), disposer) = create_root(|| ());
        let owner = disposer.owner();

        let log_in = log.clone();
        run_with_owner(owner, move || {
            on_cleanup(move || log_in.borrow_mut().push("ran"));
        });

        assert!(log.borrow().is_empty());
        disposer.dispose();
        assert_eq!(*log.borrow(), vec!["ran"]);
    }

    #[test]
    fn current_owner_is_scoped() {
        assert_eq!(Owner::current(), None);
        let ((), disposer) = create_root(|| {
            assert!(Owner::current().is_some());
        });
        assert_eq!(Owner::current(), None);
        disposer.dispose();
    }
}
