//! Pooled batch results.

use tokio_util::sync::CancellationToken;

use crate::client::{BatchResults, Connection};
use crate::conn::PooledConnection;
use crate::error::PoolError;

/// Batch results that own their connection lease.
///
/// Returned by [`Pool::send_batch`](crate::Pool::send_batch). The lease is
/// released when the results are [`close`](PoolBatchResults::close)d;
/// double-close is a no-op. When acquisition or the send itself fails,
/// this is an error-result sentinel: every read replays the same failure.
pub struct PoolBatchResults<C: Connection> {
    state: BatchState<C>,
}

enum BatchState<C: Connection> {
    Active {
        results: C::BatchResults,
        conn: PooledConnection<C>,
    },
    Errored(PoolError<C::Error>),
    Closed,
}

impl<C: Connection> PoolBatchResults<C> {
    pub(crate) fn new(results: C::BatchResults, conn: PooledConnection<C>) -> Self {
        Self {
            state: BatchState::Active { results, conn },
        }
    }

    pub(crate) fn errored(err: PoolError<C::Error>) -> Self {
        Self {
            state: BatchState::Errored(err),
        }
    }

    /// Read the next result as a statement execution.
    pub async fn exec(&mut self, token: &CancellationToken) -> Result<u64, PoolError<C::Error>> {
        match &mut self.state {
            BatchState::Active { results, .. } => {
                results.exec(token).await.map_err(PoolError::Client)
            }
            BatchState::Errored(err) => Err(err.clone()),
            BatchState::Closed => Err(PoolError::Misuse("batch results used after close")),
        }
    }

    /// Read the next result as a row cursor.
    pub async fn query(
        &mut self,
        token: &CancellationToken,
    ) -> Result<C::Rows, PoolError<C::Error>> {
        match &mut self.state {
            BatchState::Active { results, .. } => {
                results.query(token).await.map_err(PoolError::Client)
            }
            BatchState::Errored(err) => Err(err.clone()),
            BatchState::Closed => Err(PoolError::Misuse("batch results used after close")),
        }
    }

    /// Read the next result as a single materialized row.
    pub async fn query_row(
        &mut self,
        token: &CancellationToken,
    ) -> Result<C::Row, PoolError<C::Error>> {
        match &mut self.state {
            BatchState::Active { results, .. } => {
                results.query_row(token).await.map_err(PoolError::Client)
            }
            BatchState::Errored(err) => Err(err.clone()),
            BatchState::Closed => Err(PoolError::Misuse("batch results used after close")),
        }
    }

    /// Drain the pipeline and release the connection.
    ///
    /// The first close on a sentinel reports its error; any close after
    /// the first is a no-op.
    pub async fn close(&mut self, token: &CancellationToken) -> Result<(), PoolError<C::Error>> {
        match std::mem::replace(&mut self.state, BatchState::Closed) {
            BatchState::Active { mut results, conn } => {
                let outcome = results.close(token).await.map_err(PoolError::Client);
                drop(conn);
                outcome
            }
            BatchState::Errored(err) => Err(err),
            BatchState::Closed => Ok(()),
        }
    }
}
