//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, memos,
//! effects, and the ownership scopes that bound their lifetimes.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is
//! read within a tracking context (such as a memo or effect), the signal
//! automatically registers that context as an observer. When the signal's
//! value changes, all observers are notified.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. It re-evaluates only
//! when one of its dependencies actually changes, and within a flush it
//! settles before any effect runs.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change. Effects synchronize reactive state with external
//! systems, such as updating a UI or logging.
//!
//! ## Owners
//!
//! Every computation is created under an owner. Disposing the owner tears
//! down everything created under it, so resource lifetimes follow scope
//! structure instead of requiring manual unsubscription.
//!
//! # Implementation Notes
//!
//! The system uses a thread-local tracking context to detect dependencies
//! automatically. When a signal is read, the active tracking context (if
//! any) is registered as an observer. This approach (sometimes called
//! "automatic dependency tracking" or "transparent reactivity") is used by
//! SolidJS, Vue 3, and Leptos.

mod effect;
mod memo;
mod owner;
pub(crate) mod runtime;
mod signal;

pub use effect::{Effect, StatefulEffect};
pub use memo::Memo;
pub use owner::{
    create_root, on_cleanup, provide_context, run_with_owner, use_context, Owner, RootDisposer,
};
pub use runtime::{untrack, DEFAULT_UPDATE_LIMIT};
pub use signal::Signal;

pub use crate::graph::scheduler::{batch, set_update_limit};
