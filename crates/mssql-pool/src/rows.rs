//! Pooled row cursor.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;

use crate::client::Connection;
use crate::conn::PooledConnection;
use crate::error::PoolError;

/// A row cursor that owns its connection lease.
///
/// Returned by [`Pool::query`](crate::Pool::query). The lease is released
/// exactly once: on stream exhaustion, on the first terminal error, or on
/// an explicit [`close`](PoolRows::close). After that the stream just
/// reports its end.
///
/// When acquisition or the initial query fails, `query` still returns a
/// `PoolRows`: an error-result sentinel that yields the failure as its
/// single item. Callers get uniform error plumbing whether or not a
/// connection was ever obtained.
pub struct PoolRows<C: Connection> {
    state: RowsState<C>,
}

enum RowsState<C: Connection> {
    Active {
        rows: C::Rows,
        // Held only to extend the lease; dropped to release it.
        #[allow(dead_code)]
        conn: PooledConnection<C>,
    },
    Errored {
        err: Option<PoolError<C::Error>>,
    },
    Finished,
}

impl<C: Connection> PoolRows<C> {
    pub(crate) fn new(rows: C::Rows, conn: PooledConnection<C>) -> Self {
        Self {
            state: RowsState::Active { rows, conn },
        }
    }

    pub(crate) fn errored(err: PoolError<C::Error>) -> Self {
        Self {
            state: RowsState::Errored { err: Some(err) },
        }
    }

    /// Close the cursor and release the connection.
    ///
    /// Idempotent; closing an already-terminated cursor does nothing.
    pub fn close(&mut self) {
        self.state = RowsState::Finished;
    }

    /// Whether the cursor has terminated (exhausted, failed or closed).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        match &self.state {
            RowsState::Active { .. } => false,
            RowsState::Errored { err } => err.is_none(),
            RowsState::Finished => true,
        }
    }
}

// The client type is never pinned through this wrapper; only the cursor
// is polled, and the contract requires cursors to be Unpin.
impl<C: Connection> Unpin for PoolRows<C> {}

impl<C: Connection> Stream for PoolRows<C> {
    type Item = Result<C::Row, PoolError<C::Error>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match &mut this.state {
            RowsState::Active { rows, .. } => match Pin::new(rows).poll_next(cx) {
                Poll::Ready(Some(Ok(row))) => Poll::Ready(Some(Ok(row))),
                Poll::Ready(Some(Err(err))) => {
                    // Errors are terminal: end the cursor and release the
                    // lease before surfacing the failure.
                    this.state = RowsState::Finished;
                    Poll::Ready(Some(Err(PoolError::Client(err))))
                }
                Poll::Ready(None) => {
                    this.state = RowsState::Finished;
                    Poll::Ready(None)
                }
                Poll::Pending => Poll::Pending,
            },
            RowsState::Errored { err } => match err.take() {
                Some(err) => Poll::Ready(Some(Err(err))),
                None => Poll::Ready(None),
            },
            RowsState::Finished => Poll::Ready(None),
        }
    }
}
