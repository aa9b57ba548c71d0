//! Pool statistics.

use std::time::Duration;

/// A snapshot of pool state and lifetime counters.
///
/// Obtained from [`Pool::stat`](crate::Pool::stat). Counts are consistent
/// with each other; counters are monotonic.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stat {
    /// Maximum size of the pool.
    pub max_conns: u32,
    /// Connections currently checked out.
    pub acquired_conns: u32,
    /// Connections sitting idle in the pool.
    pub idle_conns: u32,
    /// Connections currently being established.
    pub constructing_conns: u32,
    /// Successful acquires since the pool was created.
    pub acquire_count: u64,
    /// Total time spent inside successful acquires.
    pub acquire_duration: Duration,
    /// Acquires abandoned because the cancellation token fired.
    pub cancelled_acquire_count: u64,
    /// Successful acquires that had to establish a connection or wait for
    /// a release because the idle queue was empty.
    pub empty_acquire_count: u64,
    /// Background min-conns replenishment attempts that failed. Those
    /// failures are otherwise silent; the next health tick retries.
    pub replenish_failure_count: u64,
}

impl Stat {
    pub(crate) fn from_core(core: mssql_pool_core::Stat, replenish_failure_count: u64) -> Self {
        Self {
            max_conns: core.max_resources as u32,
            acquired_conns: core.acquired_resources as u32,
            idle_conns: core.idle_resources as u32,
            constructing_conns: core.constructing_resources as u32,
            acquire_count: core.acquire_count,
            acquire_duration: core.acquire_duration,
            cancelled_acquire_count: core.cancelled_acquire_count,
            empty_acquire_count: core.empty_acquire_count,
            replenish_failure_count,
        }
    }

    /// Live connections: acquired + idle + constructing.
    #[must_use]
    pub fn total_conns(&self) -> u32 {
        self.acquired_conns + self.idle_conns + self.constructing_conns
    }
}
