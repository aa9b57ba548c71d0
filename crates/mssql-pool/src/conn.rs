//! The connection lease.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use mssql_pool_core::Resource;
use tokio_util::sync::CancellationToken;

use crate::client::{Connection, TxOptions};
use crate::error::PoolError;
use crate::pool::PoolShared;

/// A connection checked out of the pool.
///
/// Dropping the lease resolves it exactly once: the connection is either
/// returned to the pool or destroyed, depending on its wire state and the
/// `after_release` hook. Holding the lease guarantees exclusive use of the
/// underlying client.
pub struct PooledConnection<C: Connection> {
    resource: Option<Resource<C, C::Error>>,
    pool: Arc<PoolShared<C>>,
}

impl<C: Connection> std::fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection").finish_non_exhaustive()
    }
}

impl<C: Connection> PooledConnection<C> {
    pub(crate) fn new(resource: Resource<C, C::Error>, pool: Arc<PoolShared<C>>) -> Self {
        Self {
            resource: Some(resource),
            pool,
        }
    }

    /// Lease invariant: the resource is present until drop resolves it.
    fn resource_mut(&mut self) -> &mut Resource<C, C::Error> {
        self.resource.as_mut().expect("lease already resolved")
    }

    /// The underlying client.
    #[must_use]
    pub fn client(&self) -> &C {
        self.resource
            .as_ref()
            .expect("lease already resolved")
            .value()
    }

    /// Mutable access to the underlying client. This is the escape hatch
    /// for operations the pool does not wrap, including raw transport
    /// access via [`Connection::transport`].
    pub fn client_mut(&mut self) -> &mut C {
        self.resource_mut().value_mut()
    }

    /// Execute a statement on the leased connection.
    pub async fn exec(
        &mut self,
        token: &CancellationToken,
        sql: &str,
        params: &[C::Param],
    ) -> Result<u64, PoolError<C::Error>> {
        self.client_mut()
            .exec(token, sql, params)
            .await
            .map_err(PoolError::Client)
    }

    /// Execute a query on the leased connection, returning the client's
    /// raw row cursor. The lease must outlive the cursor.
    pub async fn query(
        &mut self,
        token: &CancellationToken,
        sql: &str,
        params: &[C::Param],
    ) -> Result<C::Rows, PoolError<C::Error>> {
        self.client_mut()
            .query(token, sql, params)
            .await
            .map_err(PoolError::Client)
    }

    /// Execute a single-row query on the leased connection.
    pub async fn query_row(
        &mut self,
        token: &CancellationToken,
        sql: &str,
        params: &[C::Param],
    ) -> Result<C::Row, PoolError<C::Error>> {
        self.client_mut()
            .query_row(token, sql, params)
            .await
            .map_err(PoolError::Client)
    }

    /// Send a batch on the leased connection, returning the client's raw
    /// batch results. The lease must outlive them.
    pub async fn send_batch(
        &mut self,
        token: &CancellationToken,
        batch: C::Batch,
    ) -> Result<C::BatchResults, PoolError<C::Error>> {
        self.client_mut()
            .send_batch(token, batch)
            .await
            .map_err(PoolError::Client)
    }

    /// Begin a transaction on the leased connection, returning the
    /// client's raw transaction handle. The lease must outlive it.
    pub async fn begin(
        &mut self,
        token: &CancellationToken,
        options: TxOptions,
    ) -> Result<C::Transaction, PoolError<C::Error>> {
        self.client_mut()
            .begin(token, options)
            .await
            .map_err(PoolError::Client)
    }

    /// Bulk-copy rows into a table over the leased connection.
    pub async fn copy_from(
        &mut self,
        token: &CancellationToken,
        table: &str,
        columns: &[&str],
        source: C::CopySource,
    ) -> Result<u64, PoolError<C::Error>> {
        self.client_mut()
            .copy_from(token, table, columns, source)
            .await
            .map_err(PoolError::Client)
    }

    /// Age of the underlying connection.
    #[must_use]
    pub fn age(&self) -> std::time::Duration {
        self.resource
            .as_ref()
            .expect("lease already resolved")
            .age()
    }

    /// Resolve the lease by destroying the connection instead of
    /// returning it.
    pub(crate) fn take_and_destroy(mut self) {
        if let Some(resource) = self.resource.take() {
            resource.destroy();
        }
    }
}

impl<C: Connection> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        let Some(mut resource) = self.resource.take() else {
            return;
        };

        if resource.value().is_closed() {
            tracing::trace!("destroying connection with closed transport");
            resource.destroy();
            return;
        }

        match &self.pool.after_release {
            Some(hook) => {
                // A panicking hook must not return a suspect connection to
                // the pool: destroy it, then let the panic continue.
                match std::panic::catch_unwind(AssertUnwindSafe(|| hook(resource.value_mut()))) {
                    Ok(true) => resource.release(),
                    Ok(false) => {
                        tracing::trace!("after_release rejected connection");
                        resource.destroy();
                    }
                    Err(payload) => {
                        resource.destroy();
                        std::panic::resume_unwind(payload);
                    }
                }
            }
            None => resource.release(),
        }
    }
}
