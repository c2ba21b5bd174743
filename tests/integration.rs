//! End-to-end scenarios that need a live PostgreSQL instance. Run with:
//!
//! ```text
//! PGCORE_TEST_CONN_STR="host=localhost dbname=pgcore_test user=postgres" \
//!     cargo test --features postgres-integration-tests
//! ```
#![cfg(feature = "postgres-integration-tests")]

use pgcore::{Connection, TransactionLevel};

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_test_writer().try_init();
}

fn test_conn_str() -> String {
    std::env::var("PGCORE_TEST_CONN_STR")
        .unwrap_or_else(|_| "host=localhost dbname=pgcore_test".to_string())
}

async fn connected() -> Connection {
    init_tracing();
    let mut conn = Connection::new(test_conn_str());
    conn.connect().await.expect("test database must be reachable");
    conn
}

#[tokio::test]
async fn select_scalar() {
    let mut conn = connected().await;
    let mut results = conn.query_with("SELECT $1::int", (1i32,)).await.unwrap();
    assert_eq!(results.len(), 1);
    let result = &mut results[0];
    assert_eq!(result.row_count(), 1);
    assert_eq!(result.col_count(), 1);
    let value: i32 = result.row(0).get(0).unwrap();
    assert_eq!(value, 1);
}

#[tokio::test]
async fn parameterized_query_concatenates() {
    let mut conn = connected().await;
    let mut results = conn
        .query_with("SELECT $1::text || $2::text", ("foo".to_string(), "bar".to_string()))
        .await
        .unwrap();
    let value: String = results[0].row(0).get(0).unwrap();
    assert_eq!(value, "foobar");
}

#[tokio::test]
async fn failing_query_reports_error_and_disconnects() {
    let mut conn = connected().await;
    let err = conn
        .query_with("SELECT * FROM table_that_does_not_exist", ())
        .await
        .unwrap_err();
    assert!(matches!(err, pgcore::Error::QueryFailed { .. }));
    assert!(!conn.is_ready(), "failed query must disconnect the connection");
}

#[tokio::test]
async fn transaction_commit_persists_the_row() {
    let mut conn = connected().await;
    conn.query_with(
        "CREATE TEMP TABLE commit_scenario(id int)",
        (),
    )
    .await
    .unwrap();

    conn.transaction(TransactionLevel::Serializable, |conn| async move {
        conn.query_with("INSERT INTO commit_scenario(id) VALUES(1)", ())
            .await
    })
    .await
    .unwrap();

    let mut results = conn.query_with("SELECT count(*) FROM commit_scenario", ()).await.unwrap();
    let count: i64 = results[0].row(0).get(0).unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn transaction_rollback_discards_the_row_and_connection_stays_usable() {
    let mut conn = connected().await;
    conn.query_with("CREATE TEMP TABLE rollback_scenario(id int)", ())
        .await
        .unwrap();

    let outcome = conn
        .transaction(TransactionLevel::Serializable, |conn| async move {
            conn.query_with("INSERT INTO rollback_scenario(id) VALUES(1)", ())
                .await?;
            Err::<(), _>(pgcore::Error::query_failed("body-triggered failure"))
        })
        .await;
    assert!(outcome.is_err());

    let mut results = conn.query_with("SELECT count(*) FROM rollback_scenario", ()).await.unwrap();
    let count: i64 = results[0].row(0).get(0).unwrap();
    assert_eq!(count, 0, "rolled-back insert must not be visible");
    assert!(conn.is_ready(), "connection must remain usable after a rollback");
}

#[tokio::test]
async fn cancelled_transaction_body_leaves_connection_not_ready() {
    let mut conn = connected().await;

    let outcome = tokio::time::timeout(
        std::time::Duration::from_millis(50),
        conn.transaction(TransactionLevel::Serializable, |conn| async move {
            conn.query_with("SELECT pg_sleep(5)", ()).await
        }),
    )
    .await;

    assert!(
        outcome.is_err(),
        "the body must still be running when the timeout fires, or this test isn't exercising cancellation"
    );
    assert!(
        !conn.is_ready(),
        "a transaction left open by a cancelled body must not look ready to reuse"
    );
}

#[tokio::test]
async fn migrations_are_applied_once() {
    let dir = std::env::temp_dir().join(format!("pgcore-migrations-{}", std::process::id()));
    tokio::fs::create_dir_all(&dir).await.unwrap();
    tokio::fs::write(dir.join("001-init.sql"), "CREATE TABLE IF NOT EXISTS migration_demo(id int);")
        .await
        .unwrap();
    tokio::fs::write(
        dir.join("002-add.sql"),
        "ALTER TABLE migration_demo ADD COLUMN IF NOT EXISTS name text;",
    )
    .await
    .unwrap();

    let opts = pgcore::ConnectionOptions::new("localhost", "5432", "pgcore_test");
    let migrator = pgcore::Migrator::new(opts.clone(), &dir).await.unwrap();
    migrator.run().await.unwrap();
    migrator.run().await.unwrap(); // idempotent: no new rows, no error

    let mut conn = connected().await;
    let mut results = conn.query_with("SELECT count(*) FROM migrations", ()).await.unwrap();
    let count: i64 = results[0].row(0).get(0).unwrap();
    assert_eq!(count, 2);

    tokio::fs::remove_dir_all(&dir).await.unwrap();
}
