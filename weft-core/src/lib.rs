//! Weft Core
//!
//! This crate provides the core runtime for the Weft fine-grained reactive
//! system. It implements:
//!
//! - Reactive primitives (signals, memos, effects)
//! - Automatic dependency tracking with per-run edge recollection
//! - A synchronous, glitch-free batch scheduler
//! - Ownership scopes with deterministic cleanup
//!
//! The runtime is single-threaded: each thread that touches a reactive
//! primitive gets its own independent graph, and all propagation happens
//! synchronously on the writing thread. Handles (`Signal`, `Memo`,
//! `Effect`) are `Copy` indices into that graph.
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `reactive`: the public primitives and the runtime that executes them
//! - `graph`: the dependency-graph arena and the update scheduler
//!
//! # Example
//!
//! ```rust
//! use weft_core::{batch, Effect, Memo, Signal};
//!
//! // Create a signal
//! let count = Signal::new(0);
//!
//! // Create a derived value
//! let doubled = Memo::new(move |_| count.get() * 2);
//!
//! // Create an effect
//! let _effect = Effect::new(move || {
//!     println!("Count: {}, Doubled: {}", count.get(), doubled.get());
//! });
//!
//! // Update the signal
//! count.set(5);
//! // Effect automatically runs, prints: "Count: 5, Doubled: 10"
//!
//! // Batch several writes into one propagation pass
//! batch(|| {
//!     count.set(6);
//!     count.set(7);
//! });
//! ```

pub mod error;
pub mod graph;
pub mod reactive;

pub use error::ReactiveError;
pub use graph::{DirtyState, NodeId, NodeKind};
pub use reactive::{
    batch, create_root, on_cleanup, provide_context, run_with_owner, set_update_limit, untrack,
    use_context, Effect, Memo, Owner, RootDisposer, Signal, StatefulEffect,
    DEFAULT_UPDATE_LIMIT,
};
