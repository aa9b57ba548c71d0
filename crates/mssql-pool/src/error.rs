//! Pool error types.

use mssql_pool_core::CoreError;
use thiserror::Error;

/// Errors that can occur during pool operations.
///
/// `E` is the error type of the pooled client. Client errors, whether from
/// connection establishment, hooks or queries, are propagated unchanged in
/// the [`Client`](PoolError::Client) variant; the pool never rewraps or
/// retries them.
#[derive(Debug, Clone, Error)]
pub enum PoolError<E> {
    /// The pool has been closed.
    #[error("pool is closed")]
    PoolClosed,

    /// The cancellation token fired while waiting for a connection.
    #[error("connection acquisition cancelled")]
    Cancelled,

    /// Malformed configuration string or out-of-bounds value.
    #[error("pool configuration error: {0}")]
    Configuration(String),

    /// The pool API was used in a way that is always a caller bug, such as
    /// driving batch results after closing them.
    #[error("pool misuse: {0}")]
    Misuse(&'static str),

    /// An error from the underlying client, propagated unchanged.
    #[error(transparent)]
    Client(E),
}

impl<E> PoolError<E> {
    /// Whether acquisition was abandoned due to cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether the operation failed because the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::PoolClosed)
    }
}

impl<E> From<CoreError<E>> for PoolError<E> {
    fn from(err: CoreError<E>) -> Self {
        match err {
            CoreError::Closed => Self::PoolClosed,
            CoreError::Cancelled => Self::Cancelled,
            CoreError::Create(e) => Self::Client(e),
        }
    }
}
