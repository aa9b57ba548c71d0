//! The connection pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use mssql_pool_core::{Constructor, Destructor, PoolCore};
use tokio_util::sync::CancellationToken;

use crate::batch::PoolBatchResults;
use crate::client::{Connection, TxOptions};
use crate::config::{AfterRelease, BeforeAcquire, Config};
use crate::conn::PooledConnection;
use crate::error::PoolError;
use crate::rows::PoolRows;
use crate::stat::Stat;
use crate::tx::PoolTransaction;

/// Grace period for transport cleanup when a connection is destroyed.
const CLEANUP_GRACE: Duration = Duration::from_secs(15);

/// State shared between the pool handle, its leases and the health
/// maintainer.
pub(crate) struct PoolShared<C: Connection> {
    pub(crate) core: PoolCore<C, C::Error>,
    pub(crate) config: Config<C>,
    pub(crate) before_acquire: Option<BeforeAcquire<C>>,
    pub(crate) after_release: Option<AfterRelease<C>>,
    pub(crate) close_token: CancellationToken,
    pub(crate) replenish_failures: AtomicU64,
}

/// A connection pool for SQL Server clients.
///
/// The pool manages a bounded set of connections, handing each out to at
/// most one task at a time. Cloning is cheap and shares the pool. All
/// methods are safe for concurrent use.
///
/// Convenience methods (`exec`, `query`, `query_row`, `query_func`,
/// `send_batch`, `begin`, `copy_from`) check a connection out, run the
/// operation and guarantee the connection is returned exactly once, even
/// for operations that outlive the call, such as streaming result sets.
///
/// Hooks run outside the pool's internal lock and may call back into the
/// pool, with one exception: a hook must not call `acquire` on its own
/// pool, which can deadlock at saturation.
pub struct Pool<C: Connection> {
    inner: Arc<PoolShared<C>>,
}

impl<C: Connection> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connection> std::fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").field("stat", &self.stat()).finish()
    }
}

impl<C: Connection> Pool<C> {
    /// Parse `conn_string` and build a pool from it.
    ///
    /// Unless `lazy_connect` is requested via the config path, one
    /// connection is established eagerly so configuration errors surface
    /// here; `token` bounds that initial attempt.
    pub async fn connect(
        token: &CancellationToken,
        conn_string: &str,
    ) -> Result<Self, PoolError<C::Error>> {
        let config = Config::parse(conn_string)?;
        Self::connect_config(token, config).await
    }

    /// Build a pool from a parsed [`Config`].
    ///
    /// The config must come from [`Config::parse`]; a hand-assembled one
    /// is rejected with [`PoolError::Misuse`].
    pub async fn connect_config(
        token: &CancellationToken,
        config: Config<C>,
    ) -> Result<Self, PoolError<C::Error>> {
        if !config.is_parsed() {
            return Err(PoolError::Misuse(
                "pool configuration must be created by Config::parse",
            ));
        }

        let constructor: Constructor<C, C::Error> = {
            let conn_config = config.conn_config.clone();
            let before_connect = config.before_connect.clone();
            let after_connect = config.after_connect.clone();
            Arc::new(move |token: CancellationToken| {
                let mut conn_config = conn_config.clone();
                let before_connect = before_connect.clone();
                let after_connect = after_connect.clone();
                Box::pin(async move {
                    if let Some(hook) = &before_connect {
                        hook(&token, &mut conn_config).await?;
                    }
                    let mut client = C::open(&conn_config, &token).await?;
                    if let Some(hook) = &after_connect {
                        if let Err(err) = hook(&token, &mut client).await {
                            client.close().await;
                            return Err(err);
                        }
                    }
                    Ok(client)
                })
            })
        };

        let destructor: Destructor<C> = Arc::new(|client: C| {
            Box::pin(async move {
                let mut client = client;
                // A wedged transport must not stall teardown forever.
                let _ = tokio::time::timeout(CLEANUP_GRACE, client.close()).await;
            })
        });

        let core = PoolCore::new(constructor, destructor, config.max_conns as usize);
        let inner = Arc::new(PoolShared {
            core,
            before_acquire: config.before_acquire.clone(),
            after_release: config.after_release.clone(),
            close_token: CancellationToken::new(),
            replenish_failures: AtomicU64::new(0),
            config,
        });

        crate::health::spawn_maintainer(&inner);

        let pool = Self { inner };
        tracing::info!(
            max_conns = pool.inner.config.max_conns,
            min_conns = pool.inner.config.min_conns,
            "connection pool created"
        );

        if !pool.inner.config.lazy_connect {
            match pool.inner.core.acquire(token).await {
                Ok(resource) => resource.release(),
                Err(err) => {
                    pool.close().await;
                    return Err(err.into());
                }
            }
        }

        Ok(pool)
    }

    /// Check a connection out of the pool.
    ///
    /// Waits in FIFO order when the pool is saturated; `token` cancels the
    /// wait promptly without consuming a connection. When a `before_acquire`
    /// hook rejects a connection, the connection is destroyed and the
    /// acquisition retries with another one. The loop terminates because
    /// every rejection shrinks the set of pre-existing connections.
    pub async fn acquire(
        &self,
        token: &CancellationToken,
    ) -> Result<PooledConnection<C>, PoolError<C::Error>> {
        loop {
            let mut resource = self.inner.core.acquire(token).await?;
            if let Some(hook) = &self.inner.before_acquire {
                if !hook(token, resource.value_mut()).await {
                    tracing::trace!("before_acquire rejected connection");
                    resource.destroy();
                    continue;
                }
            }
            return Ok(PooledConnection::new(resource, Arc::clone(&self.inner)));
        }
    }

    /// Atomically check out every currently idle connection.
    ///
    /// Intended for health checking and keep-alive fan-out. Applies the
    /// `before_acquire` hook to each connection, destroying rejects.
    pub async fn acquire_all_idle(&self, token: &CancellationToken) -> Vec<PooledConnection<C>> {
        let resources = self.inner.core.acquire_all_idle();
        let mut conns = Vec::with_capacity(resources.len());
        for mut resource in resources {
            if let Some(hook) = &self.inner.before_acquire {
                if !hook(token, resource.value_mut()).await {
                    resource.destroy();
                    continue;
                }
            }
            conns.push(PooledConnection::new(resource, Arc::clone(&self.inner)));
        }
        conns
    }

    /// Execute a statement on a pooled connection.
    pub async fn exec(
        &self,
        token: &CancellationToken,
        sql: &str,
        params: &[C::Param],
    ) -> Result<u64, PoolError<C::Error>> {
        let mut conn = self.acquire(token).await?;
        conn.exec(token, sql, params).await
    }

    /// Execute a query on a pooled connection.
    ///
    /// The returned cursor holds its connection for as long as it streams;
    /// see [`PoolRows`] for the release contract and the error-sentinel
    /// behavior when no connection could be obtained.
    pub async fn query(
        &self,
        token: &CancellationToken,
        sql: &str,
        params: &[C::Param],
    ) -> PoolRows<C> {
        let mut conn = match self.acquire(token).await {
            Ok(conn) => conn,
            Err(err) => return PoolRows::errored(err),
        };
        match conn.client_mut().query(token, sql, params).await {
            Ok(rows) => PoolRows::new(rows, conn),
            Err(err) => PoolRows::errored(PoolError::Client(err)),
        }
    }

    /// Execute a single-row query on a pooled connection, materializing
    /// the row so the connection can be returned before this call ends.
    pub async fn query_row(
        &self,
        token: &CancellationToken,
        sql: &str,
        params: &[C::Param],
    ) -> Result<C::Row, PoolError<C::Error>> {
        let mut conn = self.acquire(token).await?;
        conn.query_row(token, sql, params).await
    }

    /// Execute a query and invoke `f` for every row.
    ///
    /// Returns the number of rows processed. The connection is held for
    /// the duration of the call only.
    pub async fn query_func<F>(
        &self,
        token: &CancellationToken,
        sql: &str,
        params: &[C::Param],
        mut f: F,
    ) -> Result<u64, PoolError<C::Error>>
    where
        F: FnMut(C::Row) -> Result<(), C::Error> + Send,
    {
        let mut conn = self.acquire(token).await?;
        let mut rows = conn
            .client_mut()
            .query(token, sql, params)
            .await
            .map_err(PoolError::Client)?;
        let mut processed = 0u64;
        while let Some(item) = rows.next().await {
            let row = item.map_err(PoolError::Client)?;
            f(row).map_err(PoolError::Client)?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Send a batch of queries on a pooled connection.
    ///
    /// The returned results hold their connection until closed; see
    /// [`PoolBatchResults`] for the sentinel behavior on failure.
    pub async fn send_batch(
        &self,
        token: &CancellationToken,
        batch: C::Batch,
    ) -> PoolBatchResults<C> {
        let mut conn = match self.acquire(token).await {
            Ok(conn) => conn,
            Err(err) => return PoolBatchResults::errored(err),
        };
        match conn.client_mut().send_batch(token, batch).await {
            Ok(results) => PoolBatchResults::new(results, conn),
            Err(err) => PoolBatchResults::errored(PoolError::Client(err)),
        }
    }

    /// Begin a transaction with default options on a pooled connection.
    pub async fn begin(
        &self,
        token: &CancellationToken,
    ) -> Result<PoolTransaction<C>, PoolError<C::Error>> {
        self.begin_tx(token, TxOptions::default()).await
    }

    /// Begin a transaction on a pooled connection.
    ///
    /// The transaction holds its connection until commit or rollback; see
    /// [`PoolTransaction`] for the drop behavior.
    pub async fn begin_tx(
        &self,
        token: &CancellationToken,
        options: TxOptions,
    ) -> Result<PoolTransaction<C>, PoolError<C::Error>> {
        let mut conn = self.acquire(token).await?;
        match conn.client_mut().begin(token, options).await {
            Ok(tx) => Ok(PoolTransaction::new(tx, conn)),
            Err(err) => Err(PoolError::Client(err)),
        }
    }

    /// Bulk-copy rows into `table` over a pooled connection.
    pub async fn copy_from(
        &self,
        token: &CancellationToken,
        table: &str,
        columns: &[&str],
        source: C::CopySource,
    ) -> Result<u64, PoolError<C::Error>> {
        let mut conn = self.acquire(token).await?;
        conn.copy_from(token, table, columns, source).await
    }

    /// Snapshot the pool counts and counters.
    #[must_use]
    pub fn stat(&self) -> Stat {
        Stat::from_core(
            self.inner.core.stat(),
            self.inner.replenish_failures.load(Ordering::Relaxed),
        )
    }

    /// A copy of the configuration the pool was built from.
    ///
    /// Mutating the copy does not affect the running pool.
    #[must_use]
    pub fn config(&self) -> Config<C> {
        self.inner.config.clone()
    }

    /// Whether [`close`](Pool::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.core.is_closed()
    }

    /// Close the pool.
    ///
    /// Stops the health maintainer, rejects future acquisitions and blocks
    /// until every connection has been returned and torn down. Safe to
    /// call more than once.
    pub async fn close(&self) {
        self.inner.close_token.cancel();
        self.inner.core.close().await;
        tracing::info!("connection pool closed");
    }
}

