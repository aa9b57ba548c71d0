//! Pool statistics snapshot.

use std::time::Duration;

/// A point-in-time snapshot of pool state plus lifetime counters.
///
/// Obtained from [`PoolCore::stat`](crate::PoolCore::stat). The counts are
/// consistent with each other (taken under the pool lock); the counters are
/// monotonic over the lifetime of the pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stat {
    /// Upper bound on live resources.
    pub max_resources: usize,
    /// Resources currently leased out.
    pub acquired_resources: usize,
    /// Resources sitting idle in the pool.
    pub idle_resources: usize,
    /// Resources currently being constructed.
    pub constructing_resources: usize,
    /// Successful acquires since the pool was created.
    pub acquire_count: u64,
    /// Total time spent inside successful acquires.
    pub acquire_duration: Duration,
    /// Acquires abandoned because the cancellation token fired.
    pub cancelled_acquire_count: u64,
    /// Successful acquires that could not be served from the idle queue
    /// and had to construct a resource or wait for one.
    pub empty_acquire_count: u64,
}

impl Stat {
    /// Live resources: acquired + idle + constructing.
    #[must_use]
    pub fn total_resources(&self) -> usize {
        self.acquired_resources + self.idle_resources + self.constructing_resources
    }
}
