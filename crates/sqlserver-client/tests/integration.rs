//! End-to-end tests against the scripted mock server.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod support;

use std::time::Duration;

use sqlserver_client::{
    Client, Config, EncryptionMode, Error, IsolationLevel, Param, PoolConfig, Value,
};
use support::{MockServer, Script};

fn config_for(server: &MockServer) -> Config {
    Config::new("127.0.0.1")
        .port(server.addr().port())
        .sql_auth("sa", "Password1!")
        .encryption(EncryptionMode::Disabled)
        .pool(PoolConfig::new().max_connections(2))
}

#[tokio::test]
async fn connect_select_scalar_disconnect() {
    let server = MockServer::builder()
        .on("CAST(42 AS INT)", Script::Tokens(support::scalar_int("n", 42)))
        .database("app")
        .start()
        .await;

    let client = Client::connect(config_for(&server)).unwrap();
    let rows = client.query("SELECT CAST(42 AS INT) AS n").await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get::<i32>(0).unwrap(), 42);
    assert_eq!(rows[0].columns()[0].name, "n");

    client.shutdown().await;
}

#[tokio::test]
async fn null_bitmap_row() {
    let server = MockServer::builder()
        .on("four_ints", Script::Tokens(support::nbc_row_nulls()))
        .start()
        .await;

    let client = Client::connect(config_for(&server)).unwrap();
    let rows = client.query("SELECT * FROM four_ints").await.unwrap();

    assert_eq!(rows.len(), 1);
    let values: Vec<_> = rows[0].values().cloned().collect();
    assert_eq!(
        values,
        vec![Value::Null, Value::Int(1), Value::Null, Value::Int(2)]
    );
    assert!(rows[0].is_null(0));
    assert_eq!(rows[0].get::<Option<i32>>(3).unwrap(), Some(2));
}

#[tokio::test]
async fn execute_reports_rows_affected() {
    let server = MockServer::builder()
        .on("INSERT", Script::Tokens(support::rows_affected(3)))
        .start()
        .await;

    let client = Client::connect(config_for(&server)).unwrap();
    let result = client.execute("INSERT INTO t VALUES (1),(2),(3)").await.unwrap();
    assert_eq!(result.rows_affected, 3);
}

#[tokio::test]
async fn query_keeps_first_of_multiple_result_sets() {
    let server = MockServer::builder()
        .on("two_sets", Script::Tokens(support::two_result_sets()))
        .start()
        .await;

    let client = Client::connect(config_for(&server)).unwrap();

    let rows = client.query("EXEC two_sets").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get::<i32>(0).unwrap(), 1);

    let full = client.execute("EXEC two_sets").await.unwrap();
    assert_eq!(full.result_sets.len(), 2);
    assert_eq!(full.result_sets[1].columns.len(), 2);
    assert_eq!(full.rows_affected, 2);
}

#[tokio::test]
async fn server_error_surfaces_and_connection_survives() {
    let server = MockServer::builder()
        .on(
            "missing_table",
            Script::Tokens(support::server_error(208, 16, "Invalid object name")),
        )
        .on("CAST(7 AS INT)", Script::Tokens(support::scalar_int("n", 7)))
        .start()
        .await;

    let client = Client::connect(config_for(&server)).unwrap();

    let err = client.execute("SELECT * FROM missing_table").await.unwrap_err();
    let Error::Server(server_error) = err else {
        panic!("expected server error, got {err:?}");
    };
    assert_eq!(server_error.number, 208);
    assert_eq!(server_error.severity, 16);

    // Severity 16 leaves the connection usable.
    let rows = client.query("SELECT CAST(7 AS INT)").await.unwrap();
    assert_eq!(rows[0].get::<i32>(0).unwrap(), 7);
}

#[tokio::test]
async fn rpc_call_with_output_parameter() {
    let server = MockServer::builder()
        .on_rpc(support::rpc_with_output(12, "@y", 17))
        .start()
        .await;

    let client = Client::connect(config_for(&server)).unwrap();
    let result = client
        .call(
            "dbo.p",
            vec![Param::input("@x", 7i32), Param::output("@y", 0i32)],
        )
        .await
        .unwrap();

    assert_eq!(result.return_status, Some(12));
    let output = result.output("@y").unwrap();
    assert_eq!(output.value, Value::Int(17));
}

#[tokio::test]
async fn cancellation_of_stalled_request() {
    let server = MockServer::builder()
        .on("WAITFOR", Script::HangUntilAttention)
        .on("CAST(1 AS INT)", Script::Tokens(support::scalar_int("n", 1)))
        .start()
        .await;

    let client = Client::connect(config_for(&server)).unwrap();

    client
        .with_connection(async |conn| {
            let handle = conn.cancel_handle();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                handle.cancel();
            });

            let started = std::time::Instant::now();
            let err = conn
                .execute("WAITFOR DELAY '00:00:30'")
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Cancelled));
            assert!(started.elapsed() < Duration::from_secs(1));

            // The same connection keeps working afterwards.
            let rows = conn.query("SELECT CAST(1 AS INT)").await?;
            assert_eq!(rows[0].get::<i32>(0)?, 1);
            Ok(())
        })
        .await
        .unwrap();

    // The connection went back to the pool rather than being discarded.
    assert_eq!(client.status().live, 1);
}

#[tokio::test]
async fn script_runs_batches_in_order() {
    let server = MockServer::builder()
        .on("CREATE TABLE", Script::Tokens(support::done_only()))
        .on("INSERT INTO T", Script::Tokens(support::rows_affected(1)))
        .start()
        .await;

    let client = Client::connect(config_for(&server)).unwrap();
    let results = client
        .execute_script("CREATE TABLE T(id INT)\nGO\nINSERT INTO T VALUES(1)\nGO")
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[1].rows_affected, 1);

    let batches: Vec<_> = server
        .batches()
        .into_iter()
        .filter(|sql| !sql.starts_with("SELECT 1"))
        .collect();
    assert_eq!(batches.len(), 2);
    assert!(batches[0].starts_with("CREATE TABLE"));
    assert!(batches[1].starts_with("INSERT INTO T"));
}

#[tokio::test]
async fn change_database_waits_for_env_change() {
    let server = MockServer::builder().database("master").start().await;

    let client = Client::connect(config_for(&server)).unwrap();
    client
        .with_connection(async |conn| {
            assert_eq!(conn.database().as_deref(), Some("master"));
            conn.change_database("orders").await?;
            assert_eq!(conn.database().as_deref(), Some("orders"));
            Ok(())
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn transaction_descriptor_round_trip() {
    let server = MockServer::builder()
        .on("UPDATE", Script::Tokens(support::rows_affected(1)))
        .start()
        .await;

    let client = Client::connect(config_for(&server)).unwrap();
    client
        .with_connection(async |conn| {
            conn.begin_transaction(IsolationLevel::Serializable).await?;
            assert!(conn.in_transaction());
            conn.execute("UPDATE t SET x = 1").await?;
            conn.commit().await?;
            assert!(!conn.in_transaction());
            Ok(())
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn uncommitted_transaction_discards_connection() {
    let server = MockServer::builder().start().await;

    let client = Client::connect(config_for(&server)).unwrap();
    let result: Result<(), Error> = client
        .with_connection(async |conn| {
            conn.begin_transaction(IsolationLevel::default()).await?;
            Err(Error::Cancelled) // leave without commit or rollback
        })
        .await;
    assert!(result.is_err());

    // The connection with the open transaction was not parked.
    assert_eq!(client.status().idle, 0);
    assert_eq!(client.status().live, 0);
}

#[tokio::test]
async fn shutdown_refuses_further_work() {
    let server = MockServer::builder().start().await;

    let client = Client::connect(config_for(&server)).unwrap();
    client.query("SELECT 1").await.unwrap();
    client.shutdown().await;

    assert!(matches!(
        client.query("SELECT 1").await,
        Err(Error::ShutdownInProgress)
    ));
}

#[tokio::test]
async fn string_round_trip() {
    let server = MockServer::builder()
        .on(
            "greeting",
            Script::Tokens(support::scalar_string("greeting", "héllo wörld")),
        )
        .start()
        .await;

    let client = Client::connect(config_for(&server)).unwrap();
    let row = client
        .query_one("SELECT greeting FROM phrases")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get_by_name::<String>("greeting").unwrap(), "héllo wörld");
}
