//! Dependency Graph
//!
//! This module implements the computational dependency graph that tracks
//! relationships between reactive values and computations, and the
//! scheduler that flushes changes through it.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes represent reactive values (signals) or computations (memos,
//!   effects), plus owner-only roots
//! - Edges represent dependencies: if A reads B, there is an edge from B
//!   to A
//!
//! When a signal changes, marking traverses the graph to find affected
//! nodes; the scheduler then decides which of them actually need to
//! recompute and in what order.
//!
//! # Design Decisions
//!
//! 1. Nodes live in one centralized arena rather than in per-node linked
//!    structures because:
//!    - It enables the ancestor-first flush ordering batch updates need
//!    - It keeps handles `Copy` (an ID, not a reference)
//!    - It gives disposal a single place to reclaim from
//!
//! 2. The arena is indexed by node ID for O(1) lookups.
//!
//! 3. Both forward (sources) and reverse (observers) edges are maintained,
//!    with slot indices, so traversal and edge retirement are cheap in
//!    both directions.

pub(crate) mod node;
pub(crate) mod scheduler;

pub use node::{DirtyState, NodeId, NodeKind};
pub use scheduler::{batch, set_update_limit};
