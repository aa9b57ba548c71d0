//! # mssql-pool-core
//!
//! Generic bounded resource pool underpinning `mssql-driver-pool`.
//!
//! This crate knows nothing about SQL Server. It manages a bounded multiset
//! of opaque resources with FIFO acquisition, on-demand construction via a
//! caller-supplied async constructor, and direct handoff from release to the
//! longest-waiting acquirer. The connection pool crate layers connection
//! semantics (hooks, health maintenance, the lease façade) on top.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use mssql_pool_core::PoolCore;
//! use tokio_util::sync::CancellationToken;
//!
//! let pool = PoolCore::new(
//!     Arc::new(|_token| Box::pin(async { open_connection().await })),
//!     Arc::new(|conn| Box::pin(async move { close_connection(conn).await })),
//!     8,
//! );
//!
//! let token = CancellationToken::new();
//! let res = pool.acquire(&token).await?;
//! // use res.value() ...
//! res.release();
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod pool;
pub mod stat;

pub use error::CoreError;
pub use pool::{Constructor, Destructor, PoolCore, Resource};
pub use stat::Stat;
