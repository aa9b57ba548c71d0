//! Connection pooling walkthrough.
//!
//! Drives the pool against the in-memory mock client so it runs without a
//! server, while showing the same API a real client implementation uses.
//!
//! # Running
//!
//! ```bash
//! cargo run --example connection_pool
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use mssql_driver_pool::{Pool, PoolError};
use mssql_pool_testing::MockClient;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let token = CancellationToken::new();

    println!("=== Connection Pool Example ===\n");

    // Pool settings ride along in the connection string.
    let pool: Arc<Pool<MockClient>> = Arc::new(
        Pool::connect(
            &token,
            "host=localhost user=sa pool_max_conns=5 pool_min_conns=2 \
             pool_health_check_period=1s",
        )
        .await?,
    );

    print_stat(&pool);

    // Example 1: one-shot statement; the connection comes back on return.
    println!("\n1. Basic exec:");
    let affected = pool.exec(&token, "UPDATE jobs SET done = 1", &[]).await?;
    println!("  {affected} row(s) affected");

    // Example 2: streaming query; the cursor keeps its connection until
    // the stream ends.
    println!("\n2. Streaming query:");
    let mut rows = pool.query(&token, "SELECT id FROM jobs", &[]).await;
    while let Some(row) = rows.next().await {
        println!("  row: {}", row?);
    }

    // Example 3: concurrent usage.
    println!("\n3. Concurrent pool usage (10 parallel execs):");
    let mut handles = vec![];
    for i in 0..10i64 {
        let pool = Arc::clone(&pool);
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            pool.exec(&token, "SELECT @p1", &[i]).await?;
            Ok::<_, PoolError<_>>(i)
        }));
    }
    let mut completed = 0;
    for handle in handles {
        if handle.await?.is_ok() {
            completed += 1;
        }
    }
    println!("  completed {completed} execs");
    print_stat(&pool);

    // Example 4: transactions release on commit or rollback.
    println!("\n4. Transaction:");
    let mut tx = pool.begin(&token).await?;
    tx.exec(&token, "INSERT INTO jobs DEFAULT VALUES", &[]).await?;
    tx.commit(&token).await?;
    println!("  committed");

    // Let the health maintainer top the pool up to pool_min_conns.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    println!("\n5. After one health tick:");
    print_stat(&pool);

    println!("\n6. Graceful shutdown:");
    pool.close().await;
    print_stat(&pool);
    println!("  pool closed");

    Ok(())
}

fn print_stat(pool: &Pool<MockClient>) {
    let stat = pool.stat();
    println!(
        "  stat: {}/{} in use, {} idle, {} total (acquires: {}, cancelled: {})",
        stat.acquired_conns,
        stat.max_conns,
        stat.idle_conns,
        stat.total_conns(),
        stat.acquire_count,
        stat.cancelled_acquire_count,
    );
}
