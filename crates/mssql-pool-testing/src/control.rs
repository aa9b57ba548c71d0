//! Scripted behavior and counters shared between a test and its clients.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::client::MockError;

/// Shared handle for steering mock clients and observing what they did.
///
/// Every client opened from the same parsed [`MockConfig`](crate::MockConfig)
/// (including the copies the pool makes internally) reports to the same
/// control, so a test can count factory invocations, force connection
/// failures or enqueue result sets before driving the pool.
#[derive(Clone, Default)]
pub struct MockControl {
    inner: Arc<ControlInner>,
}

#[derive(Default)]
struct ControlInner {
    next_client_id: AtomicU64,
    connect_count: AtomicU64,
    close_count: AtomicU64,
    commit_count: AtomicU64,
    rollback_count: AtomicU64,
    connect_failures: AtomicU64,
    query_failures: AtomicU64,
    connect_delay: Mutex<Duration>,
    scripted_rows: Mutex<VecDeque<Vec<Result<i64, MockError>>>>,
    scripted_exec: Mutex<VecDeque<u64>>,
}

impl MockControl {
    /// Create a fresh control with no scripted behavior.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connection attempts so far, successful or not.
    #[must_use]
    pub fn connects(&self) -> u64 {
        self.inner.connect_count.load(Ordering::SeqCst)
    }

    /// Clients closed so far. Each client counts once, whether it was
    /// closed explicitly or torn down by the pool.
    #[must_use]
    pub fn closes(&self) -> u64 {
        self.inner.close_count.load(Ordering::SeqCst)
    }

    /// Transactions committed so far.
    #[must_use]
    pub fn commits(&self) -> u64 {
        self.inner.commit_count.load(Ordering::SeqCst)
    }

    /// Transactions rolled back so far.
    #[must_use]
    pub fn rollbacks(&self) -> u64 {
        self.inner.rollback_count.load(Ordering::SeqCst)
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: u64) {
        self.inner.connect_failures.store(n, Ordering::SeqCst);
    }

    /// Delay every connection attempt by `delay`. Attempts honor the
    /// cancellation token while delayed.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.inner.connect_delay.lock() = delay;
    }

    /// Make the next `n` query calls fail before producing a cursor.
    pub fn fail_next_queries(&self, n: u64) {
        self.inner.query_failures.store(n, Ordering::SeqCst);
    }

    /// Enqueue the result set served by the next query.
    pub fn script_rows(&self, rows: Vec<Result<i64, MockError>>) {
        self.inner.scripted_rows.lock().push_back(rows);
    }

    /// Enqueue the affected-row count reported by the next exec.
    pub fn script_exec(&self, rows_affected: u64) {
        self.inner.scripted_exec.lock().push_back(rows_affected);
    }

    pub(crate) fn begin_connect(&self) -> Result<u64, MockError> {
        self.inner.connect_count.fetch_add(1, Ordering::SeqCst);
        let failures = &self.inner.connect_failures;
        let mut remaining = failures.load(Ordering::SeqCst);
        while remaining > 0 {
            match failures.compare_exchange(
                remaining,
                remaining - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Err(MockError::Connect("scripted connect failure".into())),
                Err(current) => remaining = current,
            }
        }
        Ok(self.inner.next_client_id.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) fn connect_delay(&self) -> Duration {
        *self.inner.connect_delay.lock()
    }

    pub(crate) fn take_query_failure(&self) -> bool {
        let failures = &self.inner.query_failures;
        let mut remaining = failures.load(Ordering::SeqCst);
        while remaining > 0 {
            match failures.compare_exchange(
                remaining,
                remaining - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(current) => remaining = current,
            }
        }
        false
    }

    pub(crate) fn record_close(&self) {
        self.inner.close_count.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_commit(&self) {
        self.inner.commit_count.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_rollback(&self) {
        self.inner.rollback_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Next scripted result set; one `Ok(1)` row when nothing is queued.
    pub(crate) fn next_rows(&self) -> Vec<Result<i64, MockError>> {
        self.inner
            .scripted_rows
            .lock()
            .pop_front()
            .unwrap_or_else(|| vec![Ok(1)])
    }

    /// Next scripted exec outcome; `1` when nothing is queued.
    pub(crate) fn next_exec(&self) -> u64 {
        self.inner.scripted_exec.lock().pop_front().unwrap_or(1)
    }
}

impl fmt::Debug for MockControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockControl")
            .field("connects", &self.connects())
            .field("closes", &self.closes())
            .field("commits", &self.commits())
            .field("rollbacks", &self.rollbacks())
            .finish()
    }
}
