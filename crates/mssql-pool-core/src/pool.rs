//! Generic bounded resource pool.
//!
//! [`PoolCore`] hands out exclusive [`Resource`] leases over opaque values
//! of type `T`. A single mutex serializes all pool state: the idle queue,
//! the waiter queue and the slot accounting. Construction and destruction
//! run outside the lock; releases hand resources directly to the
//! longest-waiting acquirer instead of bouncing them through the idle
//! queue, which bounds latency under saturation.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_core::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;
use crate::stat::Stat;

/// Asynchronous resource constructor.
///
/// Invoked outside the pool lock. The token is the one passed to the
/// triggering `acquire`/`create_resource` call; constructors are expected
/// to abort promptly once it fires.
pub type Constructor<T, E> =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

/// Asynchronous resource destructor.
///
/// Runs on a spawned task, so destruction never blocks the caller that
/// triggered it. The destructor is responsible for bounding its own
/// cleanup time; [`PoolCore::close`] waits for every in-flight destructor.
pub type Destructor<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

/// A pooled value together with its bookkeeping timestamps.
struct Slot<T> {
    value: T,
    created_at: Instant,
    idle_since: Instant,
}

impl<T> Slot<T> {
    fn new(value: T) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            idle_since: now,
        }
    }
}

/// All mutable pool state, serialized by one mutex.
struct State<T: Send + 'static, E: Send + 'static> {
    idle: VecDeque<Slot<T>>,
    waiters: VecDeque<oneshot::Sender<Resource<T, E>>>,
    acquired: usize,
    constructing: usize,
    destroying: usize,
    closed: bool,
    acquire_count: u64,
    acquire_duration: Duration,
    cancelled_acquire_count: u64,
    empty_acquire_count: u64,
}

impl<T: Send + 'static, E: Send + 'static> State<T, E> {
    fn new() -> Self {
        Self {
            idle: VecDeque::new(),
            waiters: VecDeque::new(),
            acquired: 0,
            constructing: 0,
            destroying: 0,
            closed: false,
            acquire_count: 0,
            acquire_duration: Duration::ZERO,
            cancelled_acquire_count: 0,
            empty_acquire_count: 0,
        }
    }

    /// Resources counted against the capacity bound.
    fn live(&self) -> usize {
        self.acquired + self.idle.len() + self.constructing
    }

    fn record_acquire(&mut self, started: Instant, waited: bool) {
        self.acquire_count += 1;
        self.acquire_duration += started.elapsed();
        if waited {
            self.empty_acquire_count += 1;
        }
    }
}

struct Inner<T: Send + 'static, E: Send + 'static> {
    state: Mutex<State<T, E>>,
    constructor: Constructor<T, E>,
    destructor: Destructor<T>,
    max_size: usize,
    /// Signalled whenever a live-count bucket shrinks; `close` waits on it.
    drained: Notify,
}

impl<T: Send + 'static, E: Send + 'static> Inner<T, E> {
    /// Wake the longest-waiting live waiter so it re-evaluates pool state.
    /// Used when a capacity slot frees up without a resource to hand over.
    fn wake_one_waiter(state: &mut State<T, E>) {
        while let Some(tx) = state.waiters.pop_front() {
            if !tx.is_closed() {
                drop(tx);
                return;
            }
        }
    }

    /// Run the destructor on a spawned task. The caller must have already
    /// incremented `destroying` under the lock.
    fn spawn_destroy(this: &Arc<Self>, value: T) {
        let inner = Arc::clone(this);
        let destructor = Arc::clone(&this.destructor);
        tokio::spawn(async move {
            destructor(value).await;
            {
                let mut state = inner.state.lock();
                state.destroying -= 1;
            }
            inner.drained.notify_waiters();
        });
    }

    /// Put a slot under pool management: hand it to the first live waiter,
    /// queue it idle, or destroy it if the pool closed meanwhile. The slot
    /// must not be counted in any bucket on entry.
    fn install_slot_locked(this: &Arc<Self>, state: &mut State<T, E>, slot: Slot<T>) {
        if state.closed {
            state.destroying += 1;
            Self::spawn_destroy(this, slot.value);
            return;
        }
        let mut slot = slot;
        loop {
            match state.waiters.pop_front() {
                Some(tx) => {
                    state.acquired += 1;
                    match tx.send(Resource::new(slot, Arc::clone(this))) {
                        Ok(()) => return,
                        Err(res) => {
                            // Waiter went away; recover the slot and move on.
                            state.acquired -= 1;
                            slot = res.into_slot();
                        }
                    }
                }
                None => {
                    state.idle.push_back(slot);
                    return;
                }
            }
        }
    }

    /// Return a leased slot to the pool.
    fn return_slot(this: &Arc<Self>, mut slot: Slot<T>, touch: bool) {
        if touch {
            slot.idle_since = Instant::now();
        }
        {
            let mut state = this.state.lock();
            state.acquired -= 1;
            Self::install_slot_locked(this, &mut state, slot);
        }
        this.drained.notify_waiters();
    }

    /// Remove a leased slot from accounting and tear it down.
    fn destroy_slot(this: &Arc<Self>, slot: Slot<T>) {
        {
            let mut state = this.state.lock();
            state.acquired -= 1;
            state.destroying += 1;
            if state.live() < this.max_size {
                Self::wake_one_waiter(&mut state);
            }
            Self::spawn_destroy(this, slot.value);
        }
        this.drained.notify_waiters();
    }
}

/// Releases a reserved construction slot if the owning future is dropped
/// or the constructor fails before the resource is published. Futures can
/// be dropped mid-poll; without this the `constructing` count would leak.
struct ConstructGuard<'a, T: Send + 'static, E: Send + 'static> {
    inner: &'a Arc<Inner<T, E>>,
    armed: bool,
}

impl<'a, T: Send + 'static, E: Send + 'static> ConstructGuard<'a, T, E> {
    fn new(inner: &'a Arc<Inner<T, E>>) -> Self {
        Self { inner, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<T: Send + 'static, E: Send + 'static> Drop for ConstructGuard<'_, T, E> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        {
            let mut state = self.inner.state.lock();
            state.constructing -= 1;
            if state.live() < self.inner.max_size {
                Inner::wake_one_waiter(&mut state);
            }
        }
        self.inner.drained.notify_waiters();
    }
}

/// What an acquire attempt decided to do after inspecting pool state.
enum Plan<T: Send + 'static, E: Send + 'static> {
    Construct,
    Wait(oneshot::Receiver<Resource<T, E>>),
}

/// A bounded pool of opaque resources.
///
/// Cloning is cheap and shares the underlying pool. All methods are safe
/// for concurrent use. Resources must be dropped inside a Tokio runtime:
/// destruction runs on spawned tasks.
///
/// Dropping the pool itself without calling [`close`](PoolCore::close)
/// drops idle resources without running the destructor; call `close` for
/// an orderly teardown.
pub struct PoolCore<T: Send + 'static, E: Send + 'static> {
    inner: Arc<Inner<T, E>>,
}

impl<T: Send + 'static, E: Send + 'static> Clone for PoolCore<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static, E: Send + 'static> PoolCore<T, E> {
    /// Create a pool that holds at most `max_size` live resources.
    #[must_use]
    pub fn new(constructor: Constructor<T, E>, destructor: Destructor<T>, max_size: usize) -> Self {
        debug_assert!(max_size > 0, "pool capacity must be at least 1");
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::new()),
                constructor,
                destructor,
                max_size,
                drained: Notify::new(),
            }),
        }
    }

    /// Acquire an exclusive lease on a resource.
    ///
    /// Serves from the idle queue when possible, constructs a new resource
    /// when the pool is below capacity, and otherwise waits in FIFO order
    /// for a release. Cancelling the token while waiting returns
    /// [`CoreError::Cancelled`] without consuming a resource; if the token
    /// fires in the same instant a resource is handed over, the token wins
    /// and the resource goes back to the idle queue.
    pub async fn acquire(&self, token: &CancellationToken) -> Result<Resource<T, E>, CoreError<E>> {
        if token.is_cancelled() {
            let mut state = self.inner.state.lock();
            state.cancelled_acquire_count += 1;
            return Err(CoreError::Cancelled);
        }
        let started = Instant::now();
        let mut waited = false;
        loop {
            let plan = {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return Err(CoreError::Closed);
                }
                if let Some(slot) = state.idle.pop_front() {
                    state.acquired += 1;
                    state.record_acquire(started, waited);
                    return Ok(Resource::new(slot, Arc::clone(&self.inner)));
                }
                if state.acquired + state.constructing < self.inner.max_size {
                    state.constructing += 1;
                    Plan::Construct
                } else {
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push_back(tx);
                    Plan::Wait(rx)
                }
            };

            match plan {
                Plan::Construct => {
                    waited = true;
                    let guard = ConstructGuard::new(&self.inner);
                    let value = match (self.inner.constructor)(token.clone()).await {
                        Ok(value) => value,
                        Err(err) => {
                            // Guard frees the slot and wakes a waiter.
                            drop(guard);
                            return Err(CoreError::Create(err));
                        }
                    };
                    let mut state = self.inner.state.lock();
                    guard.disarm();
                    state.constructing -= 1;
                    if state.closed {
                        state.destroying += 1;
                        Inner::spawn_destroy(&self.inner, value);
                        drop(state);
                        self.inner.drained.notify_waiters();
                        return Err(CoreError::Closed);
                    }
                    state.acquired += 1;
                    state.record_acquire(started, waited);
                    return Ok(Resource::new(Slot::new(value), Arc::clone(&self.inner)));
                }
                Plan::Wait(mut rx) => {
                    waited = true;
                    tokio::select! {
                        biased;
                        () = token.cancelled() => {
                            // If the handoff already happened, dropping the
                            // receiver drops the in-flight resource, whose
                            // Drop returns it to the idle queue.
                            drop(rx);
                            let mut state = self.inner.state.lock();
                            state.cancelled_acquire_count += 1;
                            if state.live() < self.inner.max_size {
                                Inner::wake_one_waiter(&mut state);
                            }
                            return Err(CoreError::Cancelled);
                        }
                        res = &mut rx => {
                            match res {
                                Ok(resource) => {
                                    let mut state = self.inner.state.lock();
                                    state.record_acquire(started, waited);
                                    drop(state);
                                    return Ok(resource);
                                }
                                // Sender dropped: capacity freed or pool
                                // closed. Re-evaluate from the top.
                                Err(_) => continue,
                            }
                        }
                    }
                }
            }
        }
    }

    /// Atomically lease every currently idle resource.
    ///
    /// Never blocks and never constructs. Intended for health sweeps and
    /// keep-alive fan-out.
    #[must_use]
    pub fn acquire_all_idle(&self) -> Vec<Resource<T, E>> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Vec::new();
        }
        let slots: Vec<Slot<T>> = state.idle.drain(..).collect();
        state.acquired += slots.len();
        slots
            .into_iter()
            .map(|slot| Resource::new(slot, Arc::clone(&self.inner)))
            .collect()
    }

    /// Grow the pool by one idle resource, up to capacity.
    ///
    /// A no-op when the pool is already at capacity. If an acquirer is
    /// waiting when construction finishes, the new resource is handed to
    /// it directly.
    pub async fn create_resource(&self, token: &CancellationToken) -> Result<(), CoreError<E>> {
        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(CoreError::Closed);
            }
            if state.live() >= self.inner.max_size {
                return Ok(());
            }
            state.constructing += 1;
        }
        let guard = ConstructGuard::new(&self.inner);
        match (self.inner.constructor)(token.clone()).await {
            Ok(value) => {
                let mut state = self.inner.state.lock();
                guard.disarm();
                state.constructing -= 1;
                if state.closed {
                    state.destroying += 1;
                    Inner::spawn_destroy(&self.inner, value);
                    drop(state);
                    self.inner.drained.notify_waiters();
                    return Err(CoreError::Closed);
                }
                Inner::install_slot_locked(&self.inner, &mut state, Slot::new(value));
                Ok(())
            }
            Err(err) => {
                drop(guard);
                Err(CoreError::Create(err))
            }
        }
    }

    /// Close the pool.
    ///
    /// Rejects future acquisitions immediately, wakes every waiter, then
    /// blocks until all leased resources have been returned and every
    /// resource (including in-flight constructions) has been destroyed.
    /// Safe to call more than once.
    pub async fn close(&self) {
        {
            let mut state = self.inner.state.lock();
            if !state.closed {
                state.closed = true;
                // Dropping the senders wakes every waiter; each observes
                // the closed flag on its next pass.
                state.waiters.clear();
                let idle: Vec<Slot<T>> = state.idle.drain(..).collect();
                state.destroying += idle.len();
                for slot in idle {
                    Inner::spawn_destroy(&self.inner, slot.value);
                }
            }
        }
        self.inner.drained.notify_waiters();

        tracing::debug!("waiting for pool to drain");
        loop {
            let notified = self.inner.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.inner.state.lock();
                if state.acquired == 0 && state.constructing == 0 && state.destroying == 0 {
                    break;
                }
            }
            notified.await;
        }
    }

    /// Whether [`close`](PoolCore::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Snapshot the pool counts and counters.
    #[must_use]
    pub fn stat(&self) -> Stat {
        let state = self.inner.state.lock();
        Stat {
            max_resources: self.inner.max_size,
            acquired_resources: state.acquired,
            idle_resources: state.idle.len(),
            constructing_resources: state.constructing,
            acquire_count: state.acquire_count,
            acquire_duration: state.acquire_duration,
            cancelled_acquire_count: state.cancelled_acquire_count,
            empty_acquire_count: state.empty_acquire_count,
        }
    }
}

/// An exclusive lease on a pooled resource.
///
/// Exactly one of [`release`](Resource::release),
/// [`release_unused`](Resource::release_unused) or
/// [`destroy`](Resource::destroy) resolves the lease. Dropping the handle
/// without an explicit verdict counts as a release, which keeps the pool
/// consistent across panics and early returns in callers.
pub struct Resource<T: Send + 'static, E: Send + 'static> {
    slot: Option<Slot<T>>,
    pool: Arc<Inner<T, E>>,
}

impl<T: Send + 'static, E: Send + 'static> std::fmt::Debug for Resource<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource").finish_non_exhaustive()
    }
}

impl<T: Send + 'static, E: Send + 'static> Resource<T, E> {
    fn new(slot: Slot<T>, pool: Arc<Inner<T, E>>) -> Self {
        Self {
            slot: Some(slot),
            pool,
        }
    }

    /// Lease invariant: the slot is present until a verdict consumes it.
    fn slot(&self) -> &Slot<T> {
        self.slot.as_ref().expect("resource already resolved")
    }

    fn into_slot(mut self) -> Slot<T> {
        self.slot.take().expect("resource already resolved")
    }

    /// The pooled value.
    #[must_use]
    pub fn value(&self) -> &T {
        &self.slot().value
    }

    /// Mutable access to the pooled value.
    pub fn value_mut(&mut self) -> &mut T {
        &mut self
            .slot
            .as_mut()
            .expect("resource already resolved")
            .value
    }

    /// When the resource was constructed.
    #[must_use]
    pub fn creation_time(&self) -> Instant {
        self.slot().created_at
    }

    /// Time since the resource was constructed.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.slot().created_at.elapsed()
    }

    /// Time since the resource last went idle.
    ///
    /// Not reset by [`release_unused`](Resource::release_unused), so a
    /// health sweep that touches an idle resource does not mask a long
    /// idle period.
    #[must_use]
    pub fn idle_duration(&self) -> Duration {
        self.slot().idle_since.elapsed()
    }

    /// Return the resource to the pool as freshly used.
    pub fn release(mut self) {
        if let Some(slot) = self.slot.take() {
            Inner::return_slot(&self.pool, slot, true);
        }
    }

    /// Return the resource to the pool without marking it used.
    pub fn release_unused(mut self) {
        if let Some(slot) = self.slot.take() {
            Inner::return_slot(&self.pool, slot, false);
        }
    }

    /// Remove the resource from the pool and run the destructor.
    ///
    /// The destructor runs on a spawned task; accounting is updated
    /// immediately, so a destroyed resource frees its capacity slot
    /// before teardown finishes.
    pub fn destroy(mut self) {
        if let Some(slot) = self.slot.take() {
            Inner::destroy_slot(&self.pool, slot);
        }
    }
}

impl<T: Send + 'static, E: Send + 'static> Drop for Resource<T, E> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            Inner::return_slot(&self.pool, slot, true);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use thiserror::Error;

    use super::*;

    #[derive(Debug, Error, PartialEq, Eq)]
    #[error("constructor refused")]
    struct Refused;

    struct Counters {
        constructed: AtomicU64,
        destroyed: AtomicU64,
        refuse: AtomicU64,
    }

    fn counting_pool(max_size: usize) -> (PoolCore<u64, Refused>, Arc<Counters>) {
        let counters = Arc::new(Counters {
            constructed: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            refuse: AtomicU64::new(0),
        });

        let constructor: Constructor<u64, Refused> = {
            let counters = Arc::clone(&counters);
            Arc::new(move |_token| {
                let counters = Arc::clone(&counters);
                Box::pin(async move {
                    if counters.refuse.load(Ordering::SeqCst) > 0 {
                        counters.refuse.fetch_sub(1, Ordering::SeqCst);
                        return Err(Refused);
                    }
                    Ok(counters.constructed.fetch_add(1, Ordering::SeqCst))
                })
            })
        };
        let destructor: Destructor<u64> = {
            let counters = Arc::clone(&counters);
            Arc::new(move |_value| {
                let counters = Arc::clone(&counters);
                Box::pin(async move {
                    counters.destroyed.fetch_add(1, Ordering::SeqCst);
                })
            })
        };

        (PoolCore::new(constructor, destructor, max_size), counters)
    }

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn acquire_constructs_then_reuses() {
        let (pool, counters) = counting_pool(2);
        let res = pool.acquire(&token()).await.unwrap();
        assert_eq!(*res.value(), 0);
        res.release();

        let res = pool.acquire(&token()).await.unwrap();
        assert_eq!(*res.value(), 0, "idle resource should be reused");
        assert_eq!(counters.constructed.load(Ordering::SeqCst), 1);
        res.release();

        let stat = pool.stat();
        assert_eq!(stat.acquire_count, 2);
        assert_eq!(stat.idle_resources, 1);
        assert_eq!(stat.acquired_resources, 0);
    }

    #[tokio::test]
    async fn capacity_is_respected() {
        let (pool, _counters) = counting_pool(2);
        let a = pool.acquire(&token()).await.unwrap();
        let b = pool.acquire(&token()).await.unwrap();
        assert_eq!(pool.stat().total_resources(), 2);

        // Third acquire parks; cancel it to verify it never got a slot.
        let cancel = token();
        cancel.cancel();
        let err = pool.acquire(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(pool.stat().total_resources(), 2);

        a.release();
        b.release();
    }

    #[tokio::test(start_paused = true)]
    async fn release_hands_off_in_fifo_order() {
        let (pool, _counters) = counting_pool(1);
        let held = pool.acquire(&token()).await.unwrap();
        let held_value = *held.value();

        let wake_order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3u64 {
            let pool = pool.clone();
            let wake_order = Arc::clone(&wake_order);
            handles.push(tokio::spawn(async move {
                let res = pool.acquire(&token()).await.unwrap();
                wake_order.lock().push(i);
                let value = *res.value();
                res.release();
                value
            }));
            // Let each waiter park before the next arrives.
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        held.release();

        for handle in handles {
            let value = handle.await.unwrap();
            assert_eq!(value, held_value, "handoff should reuse the one resource");
        }
        assert_eq!(
            *wake_order.lock(),
            vec![0, 1, 2],
            "waiters wake in arrival order"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_waiter_does_not_leak() {
        let (pool, _counters) = counting_pool(1);
        let held = pool.acquire(&token()).await.unwrap();

        let cancel = token();
        let waiter = {
            let pool = pool.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { pool.acquire(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        cancel.cancel();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());

        let stat = pool.stat();
        assert_eq!(stat.acquired_resources, 1);
        assert_eq!(stat.idle_resources, 0);
        assert_eq!(stat.cancelled_acquire_count, 1);

        // The pool still works once the holder releases.
        held.release();
        let res = pool.acquire(&token()).await.unwrap();
        res.release();
    }

    #[tokio::test]
    async fn constructor_failure_frees_the_slot() {
        let (pool, counters) = counting_pool(1);
        counters.refuse.store(1, Ordering::SeqCst);

        let err = pool.acquire(&token()).await.unwrap_err();
        assert!(matches!(err, CoreError::Create(Refused)));
        assert_eq!(pool.stat().total_resources(), 0);

        // The failed attempt must not have consumed the capacity slot.
        let res = pool.acquire(&token()).await.unwrap();
        res.release();
    }

    #[tokio::test]
    async fn create_resource_grows_until_cap() {
        let (pool, _counters) = counting_pool(2);
        pool.create_resource(&token()).await.unwrap();
        pool.create_resource(&token()).await.unwrap();
        // At capacity: a no-op, not an error.
        pool.create_resource(&token()).await.unwrap();

        let stat = pool.stat();
        assert_eq!(stat.idle_resources, 2);
        assert_eq!(stat.total_resources(), 2);
    }

    #[tokio::test]
    async fn acquire_all_idle_takes_everything() {
        let (pool, _counters) = counting_pool(3);
        pool.create_resource(&token()).await.unwrap();
        pool.create_resource(&token()).await.unwrap();

        let resources = pool.acquire_all_idle();
        assert_eq!(resources.len(), 2);
        assert_eq!(pool.stat().idle_resources, 0);
        assert_eq!(pool.stat().acquired_resources, 2);

        for res in resources {
            res.release_unused();
        }
        assert_eq!(pool.stat().idle_resources, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn release_unused_preserves_idle_clock() {
        let (pool, _counters) = counting_pool(1);
        let res = pool.acquire(&token()).await.unwrap();
        res.release();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let resources = pool.acquire_all_idle();
        let res = resources.into_iter().next().unwrap();
        assert!(res.idle_duration() >= Duration::from_millis(100));
        res.release_unused();

        let res = pool.acquire_all_idle().into_iter().next().unwrap();
        assert!(
            res.idle_duration() >= Duration::from_millis(100),
            "release_unused must not reset the idle clock"
        );
        res.release();

        let res = pool.acquire_all_idle().into_iter().next().unwrap();
        assert!(
            res.idle_duration() < Duration::from_millis(100),
            "a normal release resets the idle clock"
        );
        res.release();
    }

    #[tokio::test(start_paused = true)]
    async fn close_rejects_and_drains() {
        let (pool, counters) = counting_pool(2);
        let held = pool.acquire(&token()).await.unwrap();
        let spare = pool.acquire(&token()).await.unwrap();
        spare.release();

        let closer = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.close().await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        let err = pool.acquire(&token()).await.unwrap_err();
        assert!(matches!(err, CoreError::Closed));
        assert!(!closer.is_finished(), "close must wait for the lease");

        held.release();
        closer.await.unwrap();

        assert_eq!(pool.stat().total_resources(), 0);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_runs_destructor_and_frees_capacity() {
        let (pool, counters) = counting_pool(1);
        let res = pool.acquire(&token()).await.unwrap();
        res.destroy();

        // Capacity freed immediately; a new resource can be built.
        let res = pool.acquire(&token()).await.unwrap();
        assert_eq!(*res.value(), 1);
        res.release();

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_acquire_future_releases_construction_slot() {
        let counters = Arc::new(Counters {
            constructed: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            refuse: AtomicU64::new(0),
        });
        let constructor: Constructor<u64, Refused> = Arc::new(move |_token| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(0)
            })
        });
        let destructor: Destructor<u64> = {
            let counters = Arc::clone(&counters);
            Arc::new(move |_value| {
                let counters = Arc::clone(&counters);
                Box::pin(async move {
                    counters.destroyed.fetch_add(1, Ordering::SeqCst);
                })
            })
        };
        let pool = PoolCore::new(constructor, destructor, 1);

        let cancel_token = token();
        let slow = tokio::time::timeout(Duration::from_millis(10), pool.acquire(&cancel_token));
        assert!(slow.await.is_err(), "construction should outlive the timeout");
        assert_eq!(
            pool.stat().constructing_resources,
            0,
            "abandoned construction must release its slot"
        );
    }
}
