//! Pooled transaction.

use tokio_util::sync::CancellationToken;

use crate::client::{Connection, Transaction};
use crate::conn::PooledConnection;
use crate::error::PoolError;

/// A transaction that owns its connection lease.
///
/// Returned by [`Pool::begin`](crate::Pool::begin) and
/// [`Pool::begin_tx`](crate::Pool::begin_tx). Committing or rolling back
/// consumes the wrapper and releases the lease, whatever the outcome of
/// the operation itself.
///
/// Dropping an unfinished transaction destroys the connection: the session
/// carries unknown state and must not rejoin the pool.
pub struct PoolTransaction<C: Connection> {
    tx: Option<C::Transaction>,
    conn: Option<PooledConnection<C>>,
}

impl<C: Connection> PoolTransaction<C> {
    pub(crate) fn new(tx: C::Transaction, conn: PooledConnection<C>) -> Self {
        Self {
            tx: Some(tx),
            conn: Some(conn),
        }
    }

    /// Execute a statement inside the transaction.
    pub async fn exec(
        &mut self,
        token: &CancellationToken,
        sql: &str,
        params: &[C::Param],
    ) -> Result<u64, PoolError<C::Error>> {
        match &mut self.tx {
            Some(tx) => tx.exec(token, sql, params).await.map_err(PoolError::Client),
            None => Err(PoolError::Misuse("transaction already finished")),
        }
    }

    /// Execute a query inside the transaction.
    pub async fn query(
        &mut self,
        token: &CancellationToken,
        sql: &str,
        params: &[C::Param],
    ) -> Result<C::Rows, PoolError<C::Error>> {
        match &mut self.tx {
            Some(tx) => tx
                .query(token, sql, params)
                .await
                .map_err(PoolError::Client),
            None => Err(PoolError::Misuse("transaction already finished")),
        }
    }

    /// Execute a single-row query inside the transaction.
    pub async fn query_row(
        &mut self,
        token: &CancellationToken,
        sql: &str,
        params: &[C::Param],
    ) -> Result<C::Row, PoolError<C::Error>> {
        match &mut self.tx {
            Some(tx) => tx
                .query_row(token, sql, params)
                .await
                .map_err(PoolError::Client),
            None => Err(PoolError::Misuse("transaction already finished")),
        }
    }

    /// The leased client, while the transaction is open.
    pub fn client_mut(&mut self) -> Option<&mut C> {
        self.conn.as_mut().map(PooledConnection::client_mut)
    }

    /// Commit the transaction and release the connection.
    pub async fn commit(mut self, token: &CancellationToken) -> Result<(), PoolError<C::Error>> {
        let Some(tx) = self.tx.take() else {
            return Err(PoolError::Misuse("transaction already finished"));
        };
        let outcome = tx.commit(token).await.map_err(PoolError::Client);
        // Release regardless of the commit outcome; after_release gets to
        // judge the connection either way.
        self.conn.take();
        outcome
    }

    /// Roll the transaction back and release the connection.
    pub async fn rollback(mut self, token: &CancellationToken) -> Result<(), PoolError<C::Error>> {
        let Some(tx) = self.tx.take() else {
            return Err(PoolError::Misuse("transaction already finished"));
        };
        let outcome = tx.rollback(token).await.map_err(PoolError::Client);
        self.conn.take();
        outcome
    }
}

impl<C: Connection> Drop for PoolTransaction<C> {
    fn drop(&mut self) {
        if self.tx.take().is_some() {
            if let Some(conn) = self.conn.take() {
                tracing::warn!("transaction dropped without commit or rollback");
                conn.take_and_destroy();
            }
        }
    }
}
