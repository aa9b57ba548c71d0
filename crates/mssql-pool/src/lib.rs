//! # mssql-driver-pool
//!
//! Purpose-built connection pool for SQL Server clients with lifecycle
//! management.
//!
//! The pool maps many concurrent tasks onto a small, bounded set of
//! expensive, stateful connections. It owns acquisition (FIFO under
//! saturation, prompt cancellation), the connection lifecycle (user hooks,
//! idle and lifetime aging, replenishment to a minimum population) and the
//! leasing protocol that keeps a connection checked out for exactly as
//! long as an operation needs it, including operations that outlive a
//! single call such as streaming result sets, batch pipelines and
//! transactions.
//!
//! The pool is generic over the [`Connection`] contract, so the wire
//! protocol, SQL dialect and row decoding stay out of this crate.
//!
//! ## Features
//!
//! - Configurable min/max pool sizes with background replenishment
//! - Connection lifetime and idle-time expiry via a periodic health sweep
//! - `before_connect`, `after_connect`, `before_acquire` and
//!   `after_release` hooks
//! - Connection-string configuration (`pool_max_conns=10`, ...)
//! - Cancellation tokens bound every wait
//!
//! ## Example
//!
//! ```rust,ignore
//! use mssql_driver_pool::Pool;
//! use tokio_util::sync::CancellationToken;
//!
//! let token = CancellationToken::new();
//! let pool: Pool<MyClient> = Pool::connect(
//!     &token,
//!     "host=db.example.com user=app pool_max_conns=10 pool_min_conns=2",
//! )
//! .await?;
//!
//! let n = pool.exec(&token, "UPDATE jobs SET done = 1 WHERE id = @p1", &[id]).await?;
//!
//! // Streaming results keep their connection until the cursor ends.
//! let mut rows = pool.query(&token, "SELECT id FROM jobs", &[]).await;
//! while let Some(row) = rows.next().await {
//!     let row = row?;
//!     // ...
//! }
//!
//! pool.close().await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod batch;
pub mod client;
pub mod config;
pub mod conn;
pub mod error;
mod health;
pub mod pool;
pub mod rows;
pub mod stat;
pub mod tx;

pub use batch::PoolBatchResults;
pub use client::{BatchResults, ConnectConfig, Connection, IsolationLevel, Transaction, TxOptions};
pub use config::{
    AfterConnect, AfterRelease, BeforeAcquire, BeforeConnect, Config, DEFAULT_HEALTH_CHECK_PERIOD,
    DEFAULT_MAX_CONN_IDLE_TIME, DEFAULT_MAX_CONN_LIFETIME, DEFAULT_MAX_CONNS, DEFAULT_MIN_CONNS,
};
pub use conn::PooledConnection;
pub use error::PoolError;
pub use pool::Pool;
pub use rows::PoolRows;
pub use stat::Stat;
pub use tx::PoolTransaction;
