//! The mock client and its companion types.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use mssql_driver_pool::{BatchResults, ConnectConfig, Connection, Transaction, TxOptions};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::control::MockControl;

/// Errors produced by the mock client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MockError {
    /// Connection establishment failed.
    #[error("mock connect error: {0}")]
    Connect(String),

    /// Malformed connection string.
    #[error("mock config error: {0}")]
    Config(String),

    /// Operation attempted on a closed connection.
    #[error("connection is closed")]
    Closed,

    /// Query-level failure.
    #[error("query error: {0}")]
    Query(String),

    /// A single-row query produced no rows.
    #[error("no rows in result")]
    NoRows,
}

/// Parsed mock connection configuration.
///
/// Accepts both DSN form (`host=localhost port=1433 user=sa`) and URL form
/// (`mock://sa@localhost:1433/master?application_name=test`). Options the
/// parser does not recognise land in the runtime-params map, which is
/// where the pool finds its `pool_*` settings.
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Database name, if any.
    pub database: Option<String>,
    /// Login user, if any.
    pub user: Option<String>,
    source: String,
    runtime_params: HashMap<String, String>,
    control: MockControl,
}

impl MockConfig {
    /// The control shared by every client opened from this config.
    #[must_use]
    pub fn control(&self) -> &MockControl {
        &self.control
    }

    fn apply_param(&mut self, key: &str, value: &str) -> Result<(), MockError> {
        match key {
            "host" => self.host = value.to_string(),
            "port" => {
                self.port = value
                    .parse()
                    .map_err(|_| MockError::Config(format!("invalid port: {value}")))?;
            }
            "database" | "dbname" => self.database = Some(value.to_string()),
            "user" => self.user = Some(value.to_string()),
            _ => {
                self.runtime_params
                    .insert(key.to_string(), value.to_string());
            }
        }
        Ok(())
    }
}

impl ConnectConfig for MockConfig {
    type Error = MockError;

    fn parse(conn_string: &str) -> Result<Self, MockError> {
        let mut config = Self {
            host: "localhost".to_string(),
            port: 1433,
            database: None,
            user: None,
            source: conn_string.to_string(),
            runtime_params: HashMap::new(),
            control: MockControl::new(),
        };

        if let Some(rest) = conn_string.strip_prefix("mock://") {
            let (authority, query) = match rest.split_once('?') {
                Some((authority, query)) => (authority, Some(query)),
                None => (rest, None),
            };
            let authority = match authority.split_once('@') {
                Some((user, tail)) => {
                    config.user = Some(user.to_string());
                    tail
                }
                None => authority,
            };
            let (host_port, database) = match authority.split_once('/') {
                Some((host_port, database)) => (host_port, Some(database)),
                None => (authority, None),
            };
            if let Some(database) = database.filter(|d| !d.is_empty()) {
                config.database = Some(database.to_string());
            }
            match host_port.split_once(':') {
                Some((host, port)) => {
                    config.host = host.to_string();
                    config.port = port
                        .parse()
                        .map_err(|_| MockError::Config(format!("invalid port: {port}")))?;
                }
                None => {
                    if !host_port.is_empty() {
                        config.host = host_port.to_string();
                    }
                }
            }
            if let Some(query) = query {
                for pair in query.split('&').filter(|p| !p.is_empty()) {
                    let (key, value) = pair
                        .split_once('=')
                        .ok_or_else(|| MockError::Config(format!("invalid option: {pair}")))?;
                    config.apply_param(key, value)?;
                }
            }
        } else {
            for part in conn_string.split_whitespace() {
                let (key, value) = part
                    .split_once('=')
                    .ok_or_else(|| MockError::Config(format!("invalid key-value: {part}")))?;
                config.apply_param(key, value)?;
            }
        }

        Ok(config)
    }

    fn conn_string(&self) -> String {
        // The original string, unchanged, like real drivers report it.
        self.source.clone()
    }

    fn runtime_params(&self) -> &HashMap<String, String> {
        &self.runtime_params
    }

    fn runtime_params_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.runtime_params
    }
}

/// Raw transport stand-in; lets tests assert the below-SQL escape hatch.
#[derive(Debug)]
pub struct MockTransport {
    /// Server-side process id stand-in, unique per client.
    pub backend_pid: u64,
}

/// An in-memory client implementing the pool's [`Connection`] contract.
#[derive(Debug)]
pub struct MockClient {
    id: u64,
    database: Option<String>,
    closed: bool,
    control: MockControl,
    transport: MockTransport,
}

impl MockClient {
    /// Unique id of this client, in connection order.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Database the client was opened against.
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    fn ensure_open(&self) -> Result<(), MockError> {
        if self.closed {
            return Err(MockError::Closed);
        }
        Ok(())
    }
}

impl Connection for MockClient {
    type Config = MockConfig;
    type Error = MockError;
    type Param = i64;
    type Row = i64;
    type Rows = MockRows;
    type Batch = MockBatch;
    type BatchResults = MockBatchResults;
    type Transaction = MockTransaction;
    type CopySource = Vec<i64>;
    type Transport = MockTransport;

    async fn open(config: &MockConfig, token: &CancellationToken) -> Result<Self, MockError> {
        let control = config.control.clone();
        let id = control.begin_connect()?;
        let delay = control.connect_delay();
        if !delay.is_zero() {
            tokio::select! {
                () = token.cancelled() => {
                    return Err(MockError::Connect("connect cancelled".into()));
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
        Ok(Self {
            id,
            database: config.database.clone(),
            closed: false,
            control,
            transport: MockTransport { backend_pid: id },
        })
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.control.record_close();
        }
    }

    async fn exec(
        &mut self,
        _token: &CancellationToken,
        _sql: &str,
        _params: &[i64],
    ) -> Result<u64, MockError> {
        self.ensure_open()?;
        Ok(self.control.next_exec())
    }

    async fn query(
        &mut self,
        _token: &CancellationToken,
        _sql: &str,
        _params: &[i64],
    ) -> Result<MockRows, MockError> {
        self.ensure_open()?;
        if self.control.take_query_failure() {
            return Err(MockError::Query("scripted query failure".into()));
        }
        Ok(MockRows::new(self.control.next_rows()))
    }

    async fn query_row(
        &mut self,
        _token: &CancellationToken,
        _sql: &str,
        _params: &[i64],
    ) -> Result<i64, MockError> {
        self.ensure_open()?;
        match self.control.next_rows().into_iter().next() {
            Some(row) => row,
            None => Err(MockError::NoRows),
        }
    }

    async fn send_batch(
        &mut self,
        _token: &CancellationToken,
        batch: MockBatch,
    ) -> Result<MockBatchResults, MockError> {
        self.ensure_open()?;
        if let Some(err) = batch.fail {
            return Err(err);
        }
        Ok(MockBatchResults {
            remaining: batch.queries.len(),
            control: self.control.clone(),
            closed: false,
        })
    }

    async fn begin(
        &mut self,
        _token: &CancellationToken,
        options: TxOptions,
    ) -> Result<MockTransaction, MockError> {
        self.ensure_open()?;
        Ok(MockTransaction {
            control: self.control.clone(),
            options,
        })
    }

    async fn copy_from(
        &mut self,
        _token: &CancellationToken,
        _table: &str,
        _columns: &[&str],
        source: Vec<i64>,
    ) -> Result<u64, MockError> {
        self.ensure_open()?;
        Ok(source.len() as u64)
    }

    fn transport(&mut self) -> &mut MockTransport {
        &mut self.transport
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// An in-memory row cursor.
pub struct MockRows {
    items: VecDeque<Result<i64, MockError>>,
}

impl MockRows {
    /// Build a cursor over the given items.
    #[must_use]
    pub fn new(items: Vec<Result<i64, MockError>>) -> Self {
        Self {
            items: items.into(),
        }
    }
}

impl Stream for MockRows {
    type Item = Result<i64, MockError>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.get_mut().items.pop_front())
    }
}

/// A batch of queries to pipeline.
#[derive(Debug, Default)]
pub struct MockBatch {
    /// Queued SQL statements.
    pub queries: Vec<String>,
    fail: Option<MockError>,
}

impl MockBatch {
    /// Create an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a statement.
    #[must_use]
    pub fn queue(mut self, sql: impl Into<String>) -> Self {
        self.queries.push(sql.into());
        self
    }

    /// Make sending this batch fail with `err`.
    #[must_use]
    pub fn failing(err: MockError) -> Self {
        Self {
            queries: Vec::new(),
            fail: Some(err),
        }
    }
}

/// Pipelined results for a mock batch.
pub struct MockBatchResults {
    remaining: usize,
    control: MockControl,
    closed: bool,
}

impl MockBatchResults {
    fn take_result(&mut self) -> Result<(), MockError> {
        if self.closed {
            return Err(MockError::Closed);
        }
        if self.remaining == 0 {
            return Err(MockError::Query("batch pipeline exhausted".into()));
        }
        self.remaining -= 1;
        Ok(())
    }
}

impl BatchResults for MockBatchResults {
    type Error = MockError;
    type Row = i64;
    type Rows = MockRows;

    async fn exec(&mut self, _token: &CancellationToken) -> Result<u64, MockError> {
        self.take_result()?;
        Ok(self.control.next_exec())
    }

    async fn query(&mut self, _token: &CancellationToken) -> Result<MockRows, MockError> {
        self.take_result()?;
        Ok(MockRows::new(self.control.next_rows()))
    }

    async fn query_row(&mut self, _token: &CancellationToken) -> Result<i64, MockError> {
        self.take_result()?;
        match self.control.next_rows().into_iter().next() {
            Some(row) => row,
            None => Err(MockError::NoRows),
        }
    }

    async fn close(&mut self, _token: &CancellationToken) -> Result<(), MockError> {
        self.closed = true;
        self.remaining = 0;
        Ok(())
    }
}

/// An in-memory transaction handle.
pub struct MockTransaction {
    control: MockControl,
    options: TxOptions,
}

impl MockTransaction {
    /// The options the transaction was started with.
    #[must_use]
    pub fn options(&self) -> TxOptions {
        self.options
    }
}

impl Transaction for MockTransaction {
    type Error = MockError;
    type Param = i64;
    type Row = i64;
    type Rows = MockRows;

    async fn exec(
        &mut self,
        _token: &CancellationToken,
        _sql: &str,
        _params: &[i64],
    ) -> Result<u64, MockError> {
        Ok(self.control.next_exec())
    }

    async fn query(
        &mut self,
        _token: &CancellationToken,
        _sql: &str,
        _params: &[i64],
    ) -> Result<MockRows, MockError> {
        Ok(MockRows::new(self.control.next_rows()))
    }

    async fn query_row(
        &mut self,
        _token: &CancellationToken,
        _sql: &str,
        _params: &[i64],
    ) -> Result<i64, MockError> {
        match self.control.next_rows().into_iter().next() {
            Some(row) => row,
            None => Err(MockError::NoRows),
        }
    }

    async fn commit(self, _token: &CancellationToken) -> Result<(), MockError> {
        self.control.record_commit();
        Ok(())
    }

    async fn rollback(self, _token: &CancellationToken) -> Result<(), MockError> {
        self.control.record_rollback();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dsn_form() {
        let config = MockConfig::parse("host=db.example.com port=1434 user=sa dbname=master")
            .unwrap();
        assert_eq!(config.host, "db.example.com");
        assert_eq!(config.port, 1434);
        assert_eq!(config.user.as_deref(), Some("sa"));
        assert_eq!(config.database.as_deref(), Some("master"));
        assert!(config.runtime_params().is_empty());
    }

    #[test]
    fn test_parse_url_form() {
        let config =
            MockConfig::parse("mock://sa@db.example.com:1434/master?application_name=test")
                .unwrap();
        assert_eq!(config.host, "db.example.com");
        assert_eq!(config.port, 1434);
        assert_eq!(config.user.as_deref(), Some("sa"));
        assert_eq!(config.database.as_deref(), Some("master"));
        assert_eq!(
            config.runtime_params().get("application_name").map(String::as_str),
            Some("test")
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(MockConfig::parse("host localhost").is_err());
        assert!(MockConfig::parse("host=h port=banana").is_err());
    }

    #[test]
    fn test_conn_string_reports_original() {
        let source = "host=localhost pool_max_conns=3";
        let config = MockConfig::parse(source).unwrap();
        assert_eq!(config.conn_string(), source);
    }

    #[tokio::test]
    async fn test_scripted_connect_failure() {
        let config = MockConfig::parse("host=localhost").unwrap();
        config.control().fail_next_connects(1);

        let token = CancellationToken::new();
        let err = MockClient::open(&config, &token).await.unwrap_err();
        assert!(matches!(err, MockError::Connect(_)));

        let client = MockClient::open(&config, &token).await.unwrap();
        assert_eq!(config.control().connects(), 2);
        assert!(!client.is_closed());
    }
}
