//! # mssql-pool-testing
//!
//! Test infrastructure for pool development: a scriptable in-memory client
//! that implements the pool's [`Connection`](mssql_driver_pool::Connection)
//! contract without touching the network.
//!
//! The mock counts lifecycle events (connects, closes, commits, rollbacks)
//! and can be scripted to fail connections, delay establishment, or yield
//! particular result sets, which is enough to exercise every pool path:
//! saturation, cancellation, hook rejection, health expiry and
//! replenishment.
//!
//! ## Example
//!
//! ```rust,ignore
//! use mssql_driver_pool::{Config, Pool};
//! use mssql_pool_testing::MockClient;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::test]
//! async fn test_with_mock_client() {
//!     let token = CancellationToken::new();
//!     let config = Config::<MockClient>::parse("host=localhost pool_max_conns=2").unwrap();
//!     let control = config.conn_config.control().clone();
//!
//!     let pool = Pool::connect_config(&token, config).await.unwrap();
//!     assert_eq!(control.connects(), 1);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod control;

pub use client::{
    MockBatch, MockBatchResults, MockClient, MockConfig, MockError, MockRows, MockTransaction,
    MockTransport,
};
pub use control::MockControl;
