// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[derive(Default)]
struct VecSink {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl RowSink for VecSink {
    fn columns(&mut self, cols: &[String]) -> Result<(), SqlError> {
        self.columns = cols.to_vec();
        Ok(())
    }

    fn row(&mut self, values: &[Value]) -> Result<(), SqlError> {
        self.rows.push(values.to_vec());
        Ok(())
    }
}

async fn memory_conn() -> Box<dyn SqlConnection> {
    let (conn, cleanup) = SqliteDriver
        .connect(&ConnectConfig { dsn: ":memory:".to_string(), ..Default::default() })
        .await
        .unwrap();
    assert!(cleanup.is_none());
    conn
}

#[tokio::test(flavor = "multi_thread")]
async fn execute_and_query_round_trip() {
    let mut conn = memory_conn().await;
    conn.ping().await.unwrap();
    conn.execute("CREATE TABLE t (id INTEGER, name TEXT)", &[]).await.unwrap();

    let affected = conn
        .execute(
            "INSERT INTO t VALUES (?, ?), (?, ?)",
            &[Value::Int(1), "a".into(), Value::Int(2), Value::Null],
        )
        .await
        .unwrap();
    assert_eq!(affected, 2);

    let mut sink = VecSink::default();
    let count = conn
        .query("SELECT id, name FROM t ORDER BY id", &[], None, &mut sink)
        .await
        .unwrap();
    assert_eq!(count, 2);
    assert_eq!(sink.columns, vec!["id", "name"]);
    assert_eq!(sink.rows[0], vec![Value::Int(1), Value::Text("a".into())]);
    assert_eq!(sink.rows[1], vec![Value::Int(2), Value::Null]);
}

#[tokio::test(flavor = "multi_thread")]
async fn max_rows_breaks_early() {
    let mut conn = memory_conn().await;
    conn.execute("CREATE TABLE t (id INTEGER)", &[]).await.unwrap();
    for i in 0..10 {
        conn.execute("INSERT INTO t VALUES (?)", &[Value::Int(i)]).await.unwrap();
    }
    let mut sink = VecSink::default();
    let count = conn.query("SELECT id FROM t", &[], Some(3), &mut sink).await.unwrap();
    assert_eq!(count, 3);
    assert_eq!(sink.rows.len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn pragma_returns_rows() {
    let mut conn = memory_conn().await;
    conn.execute("CREATE TABLE t (id INTEGER)", &[]).await.unwrap();
    let mut sink = VecSink::default();
    let count = conn.query("PRAGMA table_info(t)", &[], None, &mut sink).await.unwrap();
    assert_eq!(count, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn transaction_rollback_discards_writes() {
    let mut conn = memory_conn().await;
    conn.execute("CREATE TABLE t (id INTEGER)", &[]).await.unwrap();

    conn.begin(IsolationLevel::Default).await.unwrap();
    conn.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
    conn.rollback().await.unwrap();

    let mut sink = VecSink::default();
    conn.query("SELECT * FROM t", &[], None, &mut sink).await.unwrap();
    assert!(sink.rows.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn transaction_commit_persists() {
    let mut conn = memory_conn().await;
    conn.execute("CREATE TABLE t (id INTEGER)", &[]).await.unwrap();
    conn.begin(IsolationLevel::Serializable).await.unwrap();
    conn.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
    conn.commit().await.unwrap();

    let mut sink = VecSink::default();
    let n = conn.query("SELECT * FROM t", &[], None, &mut sink).await.unwrap();
    assert_eq!(n, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn file_lock_held_for_file_databases() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("data.db");
    let cfg = ConnectConfig {
        dsn: format!("sqlite://{}", db.display()),
        file_lock: true,
        ..Default::default()
    };

    let (mut conn, cleanup) = SqliteDriver.connect(&cfg).await.unwrap();
    let cleanup = cleanup.unwrap();

    // A concurrent second acquisition is refused outright.
    match crate::lock::FileLock::acquire(&db) {
        Err(SqlError::Locked(_)) => {}
        other => panic!("expected locked, got {other:?}"),
    }

    conn.close().await.unwrap();
    cleanup();
    // Released deterministically with the cleanup.
    drop(crate::lock::FileLock::acquire(&db).unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn timestamps_bind_as_rfc3339_text() {
    use chrono::TimeZone;
    let mut conn = memory_conn().await;
    conn.execute("CREATE TABLE t (at TEXT)", &[]).await.unwrap();
    let at = chrono::Utc.with_ymd_and_hms(2026, 2, 3, 4, 5, 6).unwrap();
    conn.execute("INSERT INTO t VALUES (?)", &[Value::Timestamp(at)]).await.unwrap();

    let mut sink = VecSink::default();
    conn.query("SELECT at FROM t", &[], None, &mut sink).await.unwrap();
    assert_eq!(sink.rows[0][0], Value::Text("2026-02-03T04:05:06Z".into()));
}

#[yare::parameterized(
    error = { OnConflict::Error, "INSERT INTO" },
    ignore = { OnConflict::Ignore, "INSERT OR IGNORE INTO" },
    replace = { OnConflict::Replace, "INSERT OR REPLACE INTO" },
)]
fn insert_dialect_prefixes(policy: OnConflict, prefix: &str) {
    let sql = SqliteDriver
        .build_insert_query(
            "users",
            &["name".to_string(), "age".to_string()],
            2,
            policy,
            &["name".to_string()],
            &[],
        )
        .unwrap();
    assert!(sql.starts_with(prefix), "got: {sql}");
    assert!(sql.contains("\"users\" (\"name\", \"age\")"));
    assert!(sql.ends_with("VALUES (?, ?), (?, ?)"));
}

#[test]
fn insert_rejects_bad_identifiers() {
    assert!(SqliteDriver
        .build_insert_query("users; DROP", &["a".to_string()], 1, OnConflict::Error, &[], &[])
        .is_err());
}
