//! The connection contract consumed by the pool.
//!
//! The pool treats the database client as an opaque capability: anything
//! that can open a connection, run the operations below and tear itself
//! down can be pooled. The wire protocol, SQL dialect handling, parameter
//! encoding and row decoding all live behind this boundary.
//!
//! All traits here use native async methods (Rust 2024 edition). The pool
//! is generic over the client type and never needs trait objects, so there
//! is no `dyn` variant.

use std::collections::HashMap;
use std::fmt;

use futures_core::Stream;
use tokio_util::sync::CancellationToken;

/// Transport and authentication configuration for one connection attempt.
///
/// Deep-copyable: the pool clones the config for every attempt so a
/// `before_connect` hook can mutate the copy without affecting connections
/// that are already open.
pub trait ConnectConfig: Clone + fmt::Debug + Send + Sync + 'static {
    /// Error produced by the parser.
    type Error;

    /// Parse a connection string.
    ///
    /// Implementations decide the accepted syntax (DSN key/value pairs,
    /// URL form, or both). Options the parser does not recognise must land
    /// in the runtime-params map rather than fail, so that layered parsers
    /// such as the pool's can consume them afterwards.
    fn parse(conn_string: &str) -> Result<Self, Self::Error>;

    /// Render the configuration back into a connection string.
    fn conn_string(&self) -> String;

    /// Server-bound runtime parameters.
    ///
    /// The pool removes the keys it recognises before the config reaches
    /// the transport layer; everything else passes through untouched.
    fn runtime_params(&self) -> &HashMap<String, String>;

    /// Mutable access to the runtime parameters.
    fn runtime_params_mut(&mut self) -> &mut HashMap<String, String>;
}

/// Transaction isolation level.
///
/// SQL Server supports these isolation levels for transaction management.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Read uncommitted (dirty reads allowed).
    ReadUncommitted,

    /// Read committed, the SQL Server default.
    #[default]
    ReadCommitted,

    /// Repeatable read.
    RepeatableRead,

    /// Serializable, the strictest level.
    Serializable,

    /// Snapshot isolation via row versioning. Requires snapshot isolation
    /// to be enabled on the database.
    Snapshot,
}

impl IsolationLevel {
    /// Get the SQL statement that sets this isolation level.
    #[must_use]
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "SET TRANSACTION ISOLATION LEVEL READ UNCOMMITTED",
            Self::ReadCommitted => "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
            Self::RepeatableRead => "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ",
            Self::Serializable => "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
            Self::Snapshot => "SET TRANSACTION ISOLATION LEVEL SNAPSHOT",
        }
    }

    /// Get the isolation level name as used in SQL Server.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
            Self::Snapshot => "SNAPSHOT",
        }
    }
}

/// Options for starting a transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct TxOptions {
    /// Isolation level to set before the transaction begins, if any.
    pub isolation_level: Option<IsolationLevel>,
}

impl TxOptions {
    /// Create default transaction options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the isolation level.
    #[must_use]
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }
}

/// A poolable database client.
///
/// Implementations are expected to hand out operation handles (`Rows`,
/// `BatchResults`, `Transaction`) that do not borrow the client, the way
/// channel-based protocol cores do. That is what lets the pool extend a
/// connection lease for the lifetime of a streaming result without
/// self-referential types.
///
/// Errors must be `Clone` so the pool can replay the same error from every
/// method of an error-result sentinel; wrap non-cloneable sources (such as
/// `std::io::Error`) in an `Arc`.
#[allow(async_fn_in_trait)]
pub trait Connection: Send + Sized + 'static {
    /// Transport configuration consumed by [`open`](Connection::open).
    type Config: ConnectConfig<Error = Self::Error>;

    /// Error type for every fallible operation.
    type Error: std::error::Error + Clone + Send + Sync + 'static;

    /// A query parameter value.
    type Param: Send + Sync;

    /// A materialized result row.
    type Row: Send + 'static;

    /// A lazy server-side row cursor.
    type Rows: Stream<Item = Result<Self::Row, Self::Error>> + Send + Unpin + 'static;

    /// An accumulated batch of queries for pipelined execution.
    type Batch: Send;

    /// Pipelined results of a sent batch.
    type BatchResults: BatchResults<Error = Self::Error, Row = Self::Row, Rows = Self::Rows>
        + Send
        + 'static;

    /// An open transaction handle.
    type Transaction: Transaction<
            Error = Self::Error,
            Param = Self::Param,
            Row = Self::Row,
            Rows = Self::Rows,
        > + Send
        + 'static;

    /// A source of rows for bulk-copy ingestion.
    type CopySource: Send;

    /// The raw transport beneath the client, for callers that need to go
    /// below the SQL surface.
    type Transport;

    /// Open a connection described by `config`.
    fn open(
        config: &Self::Config,
        token: &CancellationToken,
    ) -> impl std::future::Future<Output = Result<Self, Self::Error>> + Send;

    /// Close the connection and wait for transport cleanup.
    ///
    /// Infallible by design: close errors have no caller that can act on
    /// them. The pool bounds the overall wait.
    fn close(&mut self) -> impl std::future::Future<Output = ()> + Send;

    /// Execute a statement, returning the number of affected rows.
    async fn exec(
        &mut self,
        token: &CancellationToken,
        sql: &str,
        params: &[Self::Param],
    ) -> Result<u64, Self::Error>;

    /// Execute a query, returning a lazy row cursor.
    async fn query(
        &mut self,
        token: &CancellationToken,
        sql: &str,
        params: &[Self::Param],
    ) -> Result<Self::Rows, Self::Error>;

    /// Execute a query expected to return a single row, materialized.
    async fn query_row(
        &mut self,
        token: &CancellationToken,
        sql: &str,
        params: &[Self::Param],
    ) -> Result<Self::Row, Self::Error>;

    /// Send a batch of queries down the pipe in one round trip.
    async fn send_batch(
        &mut self,
        token: &CancellationToken,
        batch: Self::Batch,
    ) -> Result<Self::BatchResults, Self::Error>;

    /// Begin a transaction.
    async fn begin(
        &mut self,
        token: &CancellationToken,
        options: TxOptions,
    ) -> Result<Self::Transaction, Self::Error>;

    /// Bulk-copy rows into `table`, returning the number of rows written.
    async fn copy_from(
        &mut self,
        token: &CancellationToken,
        table: &str,
        columns: &[&str],
        source: Self::CopySource,
    ) -> Result<u64, Self::Error>;

    /// The raw transport handle.
    fn transport(&mut self) -> &mut Self::Transport;

    /// Whether the underlying wire connection is gone.
    ///
    /// The pool destroys closed connections on release instead of asking
    /// the `after_release` hook about them.
    fn is_closed(&self) -> bool;
}

/// Pipelined results of a batch, consumed one result at a time in the
/// order the queries were queued.
#[allow(async_fn_in_trait)]
pub trait BatchResults {
    /// Error type shared with the owning client.
    type Error;
    /// Materialized row type shared with the owning client.
    type Row;
    /// Row cursor type shared with the owning client.
    type Rows;

    /// Read the next result as a statement execution.
    async fn exec(&mut self, token: &CancellationToken) -> Result<u64, Self::Error>;

    /// Read the next result as a row cursor.
    async fn query(&mut self, token: &CancellationToken) -> Result<Self::Rows, Self::Error>;

    /// Read the next result as a single materialized row.
    async fn query_row(&mut self, token: &CancellationToken) -> Result<Self::Row, Self::Error>;

    /// Drain any unread results and release the pipeline.
    async fn close(&mut self, token: &CancellationToken) -> Result<(), Self::Error>;
}

/// An open transaction on a client connection.
#[allow(async_fn_in_trait)]
pub trait Transaction {
    /// Error type shared with the owning client.
    type Error;
    /// Parameter type shared with the owning client.
    type Param;
    /// Materialized row type shared with the owning client.
    type Row;
    /// Row cursor type shared with the owning client.
    type Rows;

    /// Execute a statement inside the transaction.
    async fn exec(
        &mut self,
        token: &CancellationToken,
        sql: &str,
        params: &[Self::Param],
    ) -> Result<u64, Self::Error>;

    /// Execute a query inside the transaction.
    async fn query(
        &mut self,
        token: &CancellationToken,
        sql: &str,
        params: &[Self::Param],
    ) -> Result<Self::Rows, Self::Error>;

    /// Execute a single-row query inside the transaction.
    async fn query_row(
        &mut self,
        token: &CancellationToken,
        sql: &str,
        params: &[Self::Param],
    ) -> Result<Self::Row, Self::Error>;

    /// Commit the transaction.
    async fn commit(self, token: &CancellationToken) -> Result<(), Self::Error>
    where
        Self: Sized;

    /// Roll the transaction back.
    async fn rollback(self, token: &CancellationToken) -> Result<(), Self::Error>
    where
        Self: Sized;
}
