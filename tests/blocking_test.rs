//! Integration tests for the blocking adapter.

mod common;

use common::MockState;
use named_datasource::DbError;
use named_datasource::db::{BlockingDataSource, ConnectionHandle};

#[test]
fn test_blocking_calls_from_plain_thread() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let (ds, state) = common::data_source("orders", 4);
    let blocking = BlockingDataSource::new(ds, runtime.handle().clone());

    let affected = blocking
        .with_transaction(|conn| {
            Box::pin(async move {
                let result = conn.execute("UPDATE t SET a = 1").await?;
                Ok(result.affected_rows)
            })
        })
        .unwrap();
    assert_eq!(affected, 1);
    assert_eq!(MockState::count(&state.commits), 1);

    let err = blocking
        .with_connection(|conn| Box::pin(async move { conn.execute("FAIL SELECT 1").await }))
        .unwrap_err();
    assert!(matches!(err, DbError::Work { .. }));

    let status = blocking.status();
    assert_eq!(status.borrowed, 0);
    assert_eq!(status.initialized, 1);

    blocking.close();
    assert!(blocking.inner().is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_calls_from_spawn_blocking() {
    let (ds, _state) = common::data_source("orders", 4);
    let blocking = BlockingDataSource::new(ds, tokio::runtime::Handle::current());

    let worker = blocking.clone();
    let name = tokio::task::spawn_blocking(move || {
        worker.with_connection(|conn| {
            Box::pin(async move { Ok(conn.data_source_name().to_string()) })
        })
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(name, "orders");
    assert_eq!(blocking.inner().borrowed_count(), 0);
}
