//! Pool configuration and connection-string parsing.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_core::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::client::{ConnectConfig, Connection};
use crate::error::PoolError;

/// Floor for the default `pool_max_conns`; the actual default also
/// considers the number of CPUs.
pub const DEFAULT_MAX_CONNS: u32 = 4;

/// Default `pool_min_conns`.
pub const DEFAULT_MIN_CONNS: u32 = 0;

/// Default `pool_max_conn_lifetime`.
pub const DEFAULT_MAX_CONN_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// Default `pool_max_conn_idle_time`.
pub const DEFAULT_MAX_CONN_IDLE_TIME: Duration = Duration::from_secs(30 * 60);

/// Default `pool_health_check_period`.
pub const DEFAULT_HEALTH_CHECK_PERIOD: Duration = Duration::from_secs(60);

/// Hook invoked before a new connection is opened.
///
/// Receives a copy of the connection config; mutations affect only the
/// attempt at hand, never connections that are already open. An error
/// aborts the attempt.
pub type BeforeConnect<C> = Arc<
    dyn for<'a> Fn(
            &'a CancellationToken,
            &'a mut <C as Connection>::Config,
        ) -> BoxFuture<'a, Result<(), <C as Connection>::Error>>
        + Send
        + Sync,
>;

/// Hook invoked after a connection is established, before it joins the
/// pool. An error closes the new connection and fails the attempt.
pub type AfterConnect<C> = Arc<
    dyn for<'a> Fn(
            &'a CancellationToken,
            &'a mut C,
        ) -> BoxFuture<'a, Result<(), <C as Connection>::Error>>
        + Send
        + Sync,
>;

/// Hook invoked before a connection is handed to an acquirer.
///
/// Return `true` to allow the acquisition, `false` to destroy the
/// connection and acquire a different one.
pub type BeforeAcquire<C> =
    Arc<dyn for<'a> Fn(&'a CancellationToken, &'a mut C) -> BoxFuture<'a, bool> + Send + Sync>;

/// Hook invoked after a connection is released, before it rejoins the
/// pool. Return `true` to return the connection to the pool, `false` to
/// destroy it. Synchronous so it can run from the lease's drop path.
pub type AfterRelease<C> = Arc<dyn Fn(&mut C) -> bool + Send + Sync>;

/// Pool configuration.
///
/// Must be created by [`Config::parse`] (directly or via
/// [`Pool::connect`](crate::Pool::connect)); a hand-assembled config is
/// rejected at pool construction. After parsing, every field may be
/// adjusted before the config is handed to the pool.
pub struct Config<C: Connection> {
    /// Transport configuration passed to the client on every attempt.
    pub conn_config: C::Config,

    /// Maximum size of the pool.
    pub max_conns: u32,

    /// Minimum size of the pool; the health maintainer replenishes the
    /// pool up to this count after destructions.
    pub min_conns: u32,

    /// Age after which a connection is destroyed by the health sweep,
    /// regardless of idleness.
    pub max_conn_lifetime: Duration,

    /// Continuous idle time after which a connection is destroyed.
    pub max_conn_idle_time: Duration,

    /// Interval between health sweeps.
    pub health_check_period: Duration,

    /// When true, pool construction performs no I/O; the first connection
    /// is established on first use.
    pub lazy_connect: bool,

    /// See [`BeforeConnect`].
    pub before_connect: Option<BeforeConnect<C>>,

    /// See [`AfterConnect`].
    pub after_connect: Option<AfterConnect<C>>,

    /// See [`BeforeAcquire`].
    pub before_acquire: Option<BeforeAcquire<C>>,

    /// See [`AfterRelease`].
    pub after_release: Option<AfterRelease<C>>,

    created_by_parse: bool,
}

impl<C: Connection> Config<C> {
    /// Parse a connection string into a pool configuration.
    ///
    /// The string is first parsed by the client's own config parser; the
    /// pool then consumes the options below from the runtime-params map,
    /// so they never reach the server. Unrecognised options pass through.
    ///
    /// | Option | Default | Constraint |
    /// |---|---|---|
    /// | `pool_max_conns` | max(4, CPU count) | >= 1 |
    /// | `pool_min_conns` | 0 | <= `pool_max_conns` |
    /// | `pool_max_conn_lifetime` | `1h` | > 0 |
    /// | `pool_max_conn_idle_time` | `30m` | > 0 |
    /// | `pool_health_check_period` | `1m` | > 0 |
    ///
    /// Durations use human-readable syntax (`90s`, `30m`, `1h 30m`).
    pub fn parse(conn_string: &str) -> Result<Self, PoolError<C::Error>> {
        let mut conn_config = C::Config::parse(conn_string).map_err(PoolError::Client)?;
        let params = conn_config.runtime_params_mut();

        let max_conns = match params.remove("pool_max_conns") {
            Some(raw) => {
                let n: u32 = raw.parse().map_err(|_| {
                    PoolError::Configuration(format!("cannot parse pool_max_conns: {raw:?}"))
                })?;
                if n < 1 {
                    return Err(PoolError::Configuration(format!(
                        "pool_max_conns too small: {n}"
                    )));
                }
                n
            }
            None => default_max_conns(),
        };

        let min_conns = match params.remove("pool_min_conns") {
            Some(raw) => raw.parse().map_err(|_| {
                PoolError::Configuration(format!("cannot parse pool_min_conns: {raw:?}"))
            })?,
            None => DEFAULT_MIN_CONNS,
        };
        if min_conns > max_conns {
            return Err(PoolError::Configuration(format!(
                "pool_min_conns ({min_conns}) exceeds pool_max_conns ({max_conns})"
            )));
        }

        let max_conn_lifetime =
            duration_param(params, "pool_max_conn_lifetime", DEFAULT_MAX_CONN_LIFETIME)?;
        let max_conn_idle_time =
            duration_param(params, "pool_max_conn_idle_time", DEFAULT_MAX_CONN_IDLE_TIME)?;
        let health_check_period = duration_param(
            params,
            "pool_health_check_period",
            DEFAULT_HEALTH_CHECK_PERIOD,
        )?;

        Ok(Self {
            conn_config,
            max_conns,
            min_conns,
            max_conn_lifetime,
            max_conn_idle_time,
            health_check_period,
            lazy_connect: false,
            before_connect: None,
            after_connect: None,
            before_acquire: None,
            after_release: None,
            created_by_parse: true,
        })
    }

    /// Render the underlying connection string.
    #[must_use]
    pub fn conn_string(&self) -> String {
        self.conn_config.conn_string()
    }

    pub(crate) fn is_parsed(&self) -> bool {
        self.created_by_parse
    }

    /// Test-only: whether this config was produced by [`Config::parse`].
    #[cfg(feature = "test-util")]
    #[doc(hidden)]
    #[must_use]
    pub fn is_parsed_for_test(&self) -> bool {
        self.is_parsed()
    }

    /// Strip the parser provenance, standing in for a hand-assembled
    /// config. Field privacy keeps user code from building one.
    #[cfg(feature = "test-util")]
    #[doc(hidden)]
    #[must_use]
    pub fn mark_unparsed(mut self) -> Self {
        self.created_by_parse = false;
        self
    }
}

impl<C: Connection> Clone for Config<C> {
    fn clone(&self) -> Self {
        Self {
            conn_config: self.conn_config.clone(),
            max_conns: self.max_conns,
            min_conns: self.min_conns,
            max_conn_lifetime: self.max_conn_lifetime,
            max_conn_idle_time: self.max_conn_idle_time,
            health_check_period: self.health_check_period,
            lazy_connect: self.lazy_connect,
            before_connect: self.before_connect.clone(),
            after_connect: self.after_connect.clone(),
            before_acquire: self.before_acquire.clone(),
            after_release: self.after_release.clone(),
            created_by_parse: self.created_by_parse,
        }
    }
}

impl<C: Connection> fmt::Debug for Config<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("conn_config", &self.conn_config)
            .field("max_conns", &self.max_conns)
            .field("min_conns", &self.min_conns)
            .field("max_conn_lifetime", &self.max_conn_lifetime)
            .field("max_conn_idle_time", &self.max_conn_idle_time)
            .field("health_check_period", &self.health_check_period)
            .field("lazy_connect", &self.lazy_connect)
            .field("before_connect", &self.before_connect.is_some())
            .field("after_connect", &self.after_connect.is_some())
            .field("before_acquire", &self.before_acquire.is_some())
            .field("after_release", &self.after_release.is_some())
            .finish()
    }
}

fn default_max_conns() -> u32 {
    let cpus = std::thread::available_parallelism().map_or(1, |n| n.get()) as u32;
    cpus.max(DEFAULT_MAX_CONNS)
}

fn duration_param<E>(
    params: &mut HashMap<String, String>,
    key: &str,
    default: Duration,
) -> Result<Duration, PoolError<E>> {
    let Some(raw) = params.remove(key) else {
        return Ok(default);
    };
    let value = humantime::parse_duration(&raw)
        .map_err(|err| PoolError::Configuration(format!("invalid {key}: {err}")))?;
    if value.is_zero() {
        return Err(PoolError::Configuration(format!(
            "{key} must be greater than zero"
        )));
    }
    Ok(value)
}

