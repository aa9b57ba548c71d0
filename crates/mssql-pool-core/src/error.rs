//! Pool primitive error types.

use thiserror::Error;

/// Errors returned by [`PoolCore`](crate::PoolCore) operations.
#[derive(Debug, Error)]
pub enum CoreError<E> {
    /// The pool has been closed; no further resources are handed out.
    #[error("resource pool is closed")]
    Closed,

    /// The cancellation token fired while waiting for a resource.
    #[error("resource acquisition cancelled")]
    Cancelled,

    /// The resource constructor failed. No pool slot was consumed.
    #[error(transparent)]
    Create(E),
}

impl<E> CoreError<E> {
    /// Whether this error was caused by the cancellation token.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
