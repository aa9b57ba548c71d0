//! Background health maintenance.
//!
//! One worker per pool. Every `health_check_period` it sweeps idle
//! connections that outlived their maximum lifetime or idle allowance,
//! then tops the pool back up to `min_conns`. The sweep always finishes
//! before replenishment starts, and ticks never overlap.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use mssql_pool_core::CoreError;
use tokio_util::sync::CancellationToken;

use crate::client::Connection;
use crate::pool::PoolShared;

/// Hard bound on a single background connection-establishment attempt.
const REPLENISH_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) fn spawn_maintainer<C: Connection>(shared: &Arc<PoolShared<C>>) {
    // Weak so an abandoned pool (dropped without close) can still die.
    let weak = Arc::downgrade(shared);
    let period = shared.config.health_check_period;
    let close_token = shared.close_token.clone();

    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut ticker = tokio::time::interval_at(start, period);
        loop {
            tokio::select! {
                () = close_token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(shared) = weak.upgrade() else { break };
            sweep_idle(&shared);
            replenish(&shared);
        }
        tracing::debug!("health maintainer stopped");
    });
}

/// Lease every idle connection and pass judgement on each: lifetime check
/// first, then idle time, otherwise back to the pool untouched.
fn sweep_idle<C: Connection>(shared: &Arc<PoolShared<C>>) {
    let config = &shared.config;
    for resource in shared.core.acquire_all_idle() {
        if resource.age() > config.max_conn_lifetime {
            tracing::debug!(age = ?resource.age(), "destroying connection past max lifetime");
            resource.destroy();
        } else if resource.idle_duration() > config.max_conn_idle_time {
            tracing::debug!(idle = ?resource.idle_duration(), "destroying idle connection");
            resource.destroy();
        } else {
            resource.release_unused();
        }
    }
}

/// Launch one background establishment task per missing connection.
/// Failures are counted but otherwise dropped; the next tick retries.
fn replenish<C: Connection>(shared: &Arc<PoolShared<C>>) {
    let total = shared.core.stat().total_resources() as u32;
    let deficit = shared.config.min_conns.saturating_sub(total);
    for _ in 0..deficit {
        let shared = Arc::clone(shared);
        tokio::spawn(async move {
            let token = CancellationToken::new();
            let created =
                tokio::time::timeout(REPLENISH_TIMEOUT, shared.core.create_resource(&token)).await;
            match created {
                Ok(Ok(())) => {}
                Ok(Err(CoreError::Closed)) => {}
                Ok(Err(err)) => {
                    shared.replenish_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(error = %err, "failed to replenish connection");
                }
                Err(_) => {
                    token.cancel();
                    shared.replenish_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("timed out replenishing connection");
                }
            }
        });
    }
}
