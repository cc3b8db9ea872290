//! Error Types
//!
//! The reactive core is synchronous and infallible in its success path, so
//! these errors never surface through `Result` returns. They exist to give
//! the two hard-failure modes a precise, matchable shape and a stable
//! message: the runaway-update circuit breaker and use-after-disposal.

use thiserror::Error;

use crate::graph::NodeId;

/// Failure modes of the reactive runtime.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// The scheduler processed more computations in a single flush than the
    /// configured limit allows. This almost always means a computation
    /// unconditionally rewrites one of its own dependencies on every run,
    /// forming an infinite update cycle.
    #[error("update flush exceeded {limit} computations; possible infinite update cycle")]
    TooManyUpdates {
        /// The limit that was exceeded (see [`set_update_limit`]).
        ///
        /// [`set_update_limit`]: crate::reactive::set_update_limit
        limit: usize,
    },

    /// A signal, memo, or effect handle was used after the node it refers
    /// to was disposed (its owning root was torn down).
    #[error("reactive node {0} was accessed after disposal")]
    Disposed(NodeId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_descriptive() {
        let err = ReactiveError::TooManyUpdates { limit: 1_000_000 };
        assert!(err.to_string().contains("1000000"));
        assert!(err.to_string().contains("infinite update cycle"));

        let err = ReactiveError::Disposed(NodeId::from(7));
        assert!(err.to_string().contains('7'));
        assert!(err.to_string().contains("disposal"));
    }
}
