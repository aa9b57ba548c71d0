//! Convenience façade behavior: short-lived operations release on every
//! path; streaming cursors, batch results and transactions extend their
//! lease and resolve it exactly once.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use mssql_driver_pool::{Config, Connection, IsolationLevel, Pool, PoolError, TxOptions};
use mssql_pool_testing::{MockBatch, MockClient, MockConfig, MockControl, MockError};
use tokio_util::sync::CancellationToken;

fn token() -> CancellationToken {
    CancellationToken::new()
}

async fn lazy_pool(conn_string: &str) -> (Pool<MockClient>, MockControl) {
    let mut config: Config<MockClient> = Config::parse(conn_string).expect("config should parse");
    config.lazy_connect = true;
    let control = config.conn_config.control().clone();
    let pool = Pool::connect_config(&token(), config)
        .await
        .expect("pool should build");
    (pool, control)
}

#[tokio::test]
async fn test_exec_releases_connection() {
    let (pool, control) = lazy_pool("host=localhost pool_max_conns=2").await;
    control.script_exec(7);

    let affected = pool.exec(&token(), "UPDATE t SET x = 1", &[]).await.unwrap();
    assert_eq!(affected, 7);

    let stat = pool.stat();
    assert_eq!(stat.acquired_conns, 0);
    assert_eq!(stat.idle_conns, 1);
    assert_eq!(stat.acquire_count, 1);
    pool.close().await;
}

#[tokio::test]
async fn test_query_streams_then_releases() {
    let (pool, control) = lazy_pool("host=localhost pool_max_conns=2").await;
    control.script_rows(vec![Ok(10), Ok(20), Ok(30)]);

    let mut rows = pool.query(&token(), "SELECT x FROM t", &[]).await;
    assert_eq!(pool.stat().acquired_conns, 1, "cursor holds the lease");

    let mut values = Vec::new();
    while let Some(row) = rows.next().await {
        values.push(row.unwrap());
    }
    assert_eq!(values, vec![10, 20, 30]);
    assert!(rows.is_finished());

    let stat = pool.stat();
    assert_eq!(stat.acquired_conns, 0, "exhaustion releases the lease");
    assert_eq!(stat.idle_conns, 1);

    // Closing after exhaustion is a no-op.
    rows.close();
    pool.close().await;
}

#[tokio::test]
async fn test_query_explicit_close_releases() {
    let (pool, control) = lazy_pool("host=localhost pool_max_conns=2").await;
    control.script_rows(vec![Ok(1), Ok(2), Ok(3)]);

    let mut rows = pool.query(&token(), "SELECT x FROM t", &[]).await;
    let first = rows.next().await.unwrap().unwrap();
    assert_eq!(first, 1);

    rows.close();
    assert_eq!(pool.stat().acquired_conns, 0);
    assert!(rows.next().await.is_none(), "closed cursor just ends");
    rows.close();
    pool.close().await;
}

#[tokio::test]
async fn test_query_terminal_error_releases() {
    let (pool, control) = lazy_pool("host=localhost pool_max_conns=2").await;
    control.script_rows(vec![Ok(1), Err(MockError::Query("wire torn".into()))]);

    let mut rows = pool.query(&token(), "SELECT x FROM t", &[]).await;
    assert_eq!(rows.next().await.unwrap().unwrap(), 1);

    let err = rows.next().await.unwrap().unwrap_err();
    assert!(matches!(err, PoolError::Client(MockError::Query(_))));
    assert_eq!(pool.stat().acquired_conns, 0, "error releases the lease");
    assert!(rows.next().await.is_none());
    pool.close().await;
}

#[tokio::test]
async fn test_query_sentinel_when_initial_query_fails() {
    let (pool, control) = lazy_pool("host=localhost pool_max_conns=2").await;
    control.fail_next_queries(1);

    let mut rows = pool.query(&token(), "SELECT x FROM t", &[]).await;
    let stat = pool.stat();
    assert_eq!(stat.acquired_conns, 0, "lease released before returning");
    assert_eq!(stat.idle_conns, 1);

    let err = rows.next().await.unwrap().unwrap_err();
    assert!(matches!(err, PoolError::Client(MockError::Query(_))));
    assert!(rows.next().await.is_none(), "sentinel yields its error once");
    pool.close().await;
}

#[tokio::test]
async fn test_query_sentinel_when_pool_closed() {
    let (pool, _control) = lazy_pool("host=localhost pool_max_conns=1").await;
    pool.close().await;

    let mut rows = pool.query(&token(), "SELECT 1", &[]).await;
    let err = rows.next().await.unwrap().unwrap_err();
    assert!(err.is_closed());
    assert!(rows.next().await.is_none());
}

#[tokio::test]
async fn test_query_row_materializes_and_releases() {
    let (pool, control) = lazy_pool("host=localhost pool_max_conns=2").await;
    control.script_rows(vec![Ok(42)]);

    let row = pool.query_row(&token(), "SELECT 42", &[]).await.unwrap();
    assert_eq!(row, 42);
    assert_eq!(pool.stat().idle_conns, 1);

    control.script_rows(Vec::new());
    let err = pool.query_row(&token(), "SELECT 1 WHERE 1 = 0", &[]).await;
    assert!(matches!(err, Err(PoolError::Client(MockError::NoRows))));
    assert_eq!(pool.stat().acquired_conns, 0);
    pool.close().await;
}

#[tokio::test]
async fn test_query_func_visits_every_row() {
    let (pool, control) = lazy_pool("host=localhost pool_max_conns=2").await;
    control.script_rows(vec![Ok(1), Ok(2), Ok(3)]);

    let mut sum = 0i64;
    let processed = pool
        .query_func(&token(), "SELECT x FROM t", &[], |row| {
            sum += row;
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(processed, 3);
    assert_eq!(sum, 6);
    assert_eq!(pool.stat().idle_conns, 1);
    pool.close().await;
}

#[tokio::test]
async fn test_query_func_callback_error_aborts_and_releases() {
    let (pool, control) = lazy_pool("host=localhost pool_max_conns=2").await;
    control.script_rows(vec![Ok(1), Ok(2), Ok(3)]);

    let mut seen = 0u64;
    let err = pool
        .query_func(&token(), "SELECT x FROM t", &[], |_row| {
            seen += 1;
            if seen == 2 {
                Err(MockError::Query("enough".into()))
            } else {
                Ok(())
            }
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::Client(MockError::Query(_))));
    assert_eq!(seen, 2);
    assert_eq!(pool.stat().acquired_conns, 0);
    pool.close().await;
}

#[tokio::test]
async fn test_send_batch_reads_then_close_releases() {
    let (pool, control) = lazy_pool("host=localhost pool_max_conns=2").await;
    control.script_exec(3);
    control.script_rows(vec![Ok(5)]);

    let batch = MockBatch::new()
        .queue("UPDATE t SET x = 1")
        .queue("SELECT x FROM t");
    let mut results = pool.send_batch(&token(), batch).await;
    assert_eq!(pool.stat().acquired_conns, 1, "results hold the lease");

    assert_eq!(results.exec(&token()).await.unwrap(), 3);
    assert_eq!(results.query_row(&token()).await.unwrap(), 5);

    results.close(&token()).await.unwrap();
    assert_eq!(pool.stat().acquired_conns, 0);
    assert_eq!(pool.stat().idle_conns, 1);

    // Use after close is a caller bug; double close is a no-op.
    let err = results.exec(&token()).await.unwrap_err();
    assert!(matches!(err, PoolError::Misuse(_)));
    results.close(&token()).await.unwrap();
    pool.close().await;
}

#[tokio::test]
async fn test_send_batch_sentinel_replays_error() {
    let (pool, _control) = lazy_pool("host=localhost pool_max_conns=1").await;
    pool.close().await;

    let mut results = pool.send_batch(&token(), MockBatch::new().queue("SELECT 1")).await;
    assert!(results.exec(&token()).await.unwrap_err().is_closed());
    assert!(results.query_row(&token()).await.unwrap_err().is_closed());

    // First close reports the error, later closes are no-ops.
    assert!(results.close(&token()).await.unwrap_err().is_closed());
    results.close(&token()).await.unwrap();
}

#[tokio::test]
async fn test_send_batch_failure_releases_immediately() {
    let (pool, _control) = lazy_pool("host=localhost pool_max_conns=2").await;

    let batch = MockBatch::failing(MockError::Query("pipeline refused".into()));
    let mut results = pool.send_batch(&token(), batch).await;

    let stat = pool.stat();
    assert_eq!(stat.acquired_conns, 0, "failed send releases the lease");
    assert_eq!(stat.idle_conns, 1);

    let err = results.exec(&token()).await.unwrap_err();
    assert!(matches!(err, PoolError::Client(MockError::Query(_))));
    pool.close().await;
}

#[tokio::test]
async fn test_transaction_commit_releases() {
    let (pool, control) = lazy_pool("host=localhost pool_max_conns=2").await;

    let mut tx = pool
        .begin_tx(
            &token(),
            TxOptions::new().isolation_level(IsolationLevel::Serializable),
        )
        .await
        .unwrap();
    assert_eq!(pool.stat().acquired_conns, 1);

    tx.exec(&token(), "UPDATE t SET x = 1", &[]).await.unwrap();
    tx.commit(&token()).await.unwrap();

    assert_eq!(control.commits(), 1);
    assert_eq!(pool.stat().acquired_conns, 0);
    assert_eq!(pool.stat().idle_conns, 1);
    pool.close().await;
}

#[tokio::test]
async fn test_transaction_rollback_releases() {
    let (pool, control) = lazy_pool("host=localhost pool_max_conns=2").await;

    let tx = pool.begin(&token()).await.unwrap();
    tx.rollback(&token()).await.unwrap();

    assert_eq!(control.rollbacks(), 1);
    assert_eq!(pool.stat().idle_conns, 1);
    pool.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_transaction_dropped_unfinished_destroys_connection() {
    let (pool, control) = lazy_pool("host=localhost pool_max_conns=2").await;

    {
        let _tx = pool.begin(&token()).await.unwrap();
        // Neither commit nor rollback.
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(control.commits(), 0);
    assert_eq!(control.rollbacks(), 0);
    assert_eq!(
        pool.stat().total_conns(),
        0,
        "a session with unknown state must not rejoin the pool"
    );
    assert_eq!(control.closes(), 1);
    pool.close().await;
}

#[tokio::test]
async fn test_copy_from_reports_rows_and_releases() {
    let (pool, _control) = lazy_pool("host=localhost pool_max_conns=2").await;

    let copied = pool
        .copy_from(&token(), "t", &["x"], vec![1, 2, 3, 4])
        .await
        .unwrap();
    assert_eq!(copied, 4);
    assert_eq!(pool.stat().idle_conns, 1);
    pool.close().await;
}

#[tokio::test]
async fn test_before_connect_mutates_a_copy() {
    let mut config: Config<MockClient> =
        Config::parse("host=localhost pool_max_conns=2").expect("config should parse");
    config.lazy_connect = true;
    config.before_connect = Some(Arc::new(
        |_token: &CancellationToken, conn_config: &mut MockConfig| {
            conn_config.database = Some("hooked".into());
            Box::pin(async { Ok(()) })
        },
    ));

    let pool = Pool::connect_config(&token(), config).await.unwrap();
    let conn = pool.acquire(&token()).await.unwrap();
    assert_eq!(conn.client().database(), Some("hooked"));

    // The pool's own copy of the config is untouched.
    assert_eq!(pool.config().conn_config.database, None);
    drop(conn);
    pool.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_after_connect_failure_closes_new_connection() {
    let mut config: Config<MockClient> =
        Config::parse("host=localhost pool_max_conns=2").expect("config should parse");
    config.lazy_connect = true;
    let control = config.conn_config.control().clone();
    config.after_connect = Some(Arc::new(
        |_token: &CancellationToken, _client: &mut MockClient| {
            Box::pin(async { Err(MockError::Query("init failed".into())) })
        },
    ));

    let pool = Pool::connect_config(&token(), config).await.unwrap();
    let err = pool.acquire(&token()).await.unwrap_err();
    assert!(matches!(err, PoolError::Client(MockError::Query(_))));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(control.connects(), 1, "factory errors are not retried");
    assert_eq!(control.closes(), 1, "half-open connection must be closed");
    assert_eq!(pool.stat().total_conns(), 0);
    pool.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_after_release_rejection_destroys() {
    let mut config: Config<MockClient> =
        Config::parse("host=localhost pool_max_conns=2").expect("config should parse");
    config.lazy_connect = true;
    let control = config.conn_config.control().clone();
    config.after_release = Some(Arc::new(|_client: &mut MockClient| false));

    let pool = Pool::connect_config(&token(), config).await.unwrap();
    let conn = pool.acquire(&token()).await.unwrap();
    drop(conn);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.stat().total_conns(), 0);
    assert_eq!(control.closes(), 1);
    pool.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_wire_closed_connection_destroyed_on_release() {
    let (pool, control) = lazy_pool("host=localhost pool_max_conns=2").await;

    let mut conn = pool.acquire(&token()).await.unwrap();
    conn.client_mut().close().await;
    drop(conn);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.stat().total_conns(), 0);
    assert_eq!(control.closes(), 1, "close is counted once per client");
    pool.close().await;
}

#[tokio::test]
async fn test_transport_escape_hatch() {
    let (pool, _control) = lazy_pool("host=localhost pool_max_conns=1").await;

    let mut conn = pool.acquire(&token()).await.unwrap();
    let id = conn.client().id();
    assert_eq!(conn.client_mut().transport().backend_pid, id);
    drop(conn);
    pool.close().await;
}
