// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::config::ImportOptions;
use crate::driver::{ConnectConfig, OnConflict, RowSink};
use crate::readers::CsvReader;
use crate::sqlite::SqliteDriver;

#[derive(Default)]
struct VecSink {
    rows: Vec<Vec<Value>>,
}

impl RowSink for VecSink {
    fn columns(&mut self, _cols: &[String]) -> Result<(), SqlError> {
        Ok(())
    }

    fn row(&mut self, values: &[Value]) -> Result<(), SqlError> {
        self.rows.push(values.to_vec());
        Ok(())
    }
}

async fn users_conn() -> Box<dyn SqlConnection> {
    let (mut conn, _) = SqliteDriver
        .connect(&ConnectConfig { dsn: ":memory:".to_string(), ..Default::default() })
        .await
        .unwrap();
    conn.execute("CREATE TABLE users (name TEXT, age INTEGER, city TEXT)", &[])
        .await
        .unwrap();
    conn
}

fn opts() -> ImportOptions {
    ImportOptions { table: "users".to_string(), ..Default::default() }
}

fn csv_reader(data: &str) -> CsvReader<&[u8]> {
    CsvReader::new(data.as_bytes(), b',', true, vec![], &[]).unwrap()
}

const THREE_USERS: &str = "name,age,city\nAlice,30,NYC\nBob,25,LA\nCharlie,35,Chicago\n";

#[tokio::test(flavor = "multi_thread")]
async fn csv_import_three_rows() {
    let mut conn = users_conn().await;
    let mut reader = csv_reader(THREE_USERS);
    let started = Utc::now();
    let (metrics, result) = run_import(
        conn.as_mut(),
        &SqliteDriver,
        &opts(),
        &mut reader,
        started,
        Utc::now,
    )
    .await;

    result.unwrap();
    assert_eq!(metrics.rows_read, 3);
    assert_eq!(metrics.rows_imported, 3);
    assert_eq!(metrics.rows_skipped, 0);
    assert_eq!(metrics.batch_count, 1);
    assert_eq!(metrics.status, "completed");

    let mut sink = VecSink::default();
    let n = conn
        .query("SELECT name, age, city FROM users ORDER BY name", &[], None, &mut sink)
        .await
        .unwrap();
    assert_eq!(n, 3);
    // SQLite's column affinity stores the numeric-looking text as an
    // integer.
    assert_eq!(
        sink.rows[0],
        vec![Value::Text("Alice".into()), Value::Int(30), Value::Text("NYC".into())]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn batches_split_at_batch_size() {
    let mut conn = users_conn().await;
    let mut data = String::from("name,age,city\n");
    for i in 0..5 {
        data.push_str(&format!("user{i},20,X\n"));
    }
    let mut reader = csv_reader(&data);
    let options = ImportOptions { batch_size: 2, ..opts() };
    let (metrics, result) =
        run_import(conn.as_mut(), &SqliteDriver, &options, &mut reader, Utc::now(), Utc::now)
            .await;

    result.unwrap();
    assert_eq!(metrics.rows_imported, 5);
    assert_eq!(metrics.batch_count, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn skip_rows_counts_into_skipped() {
    let mut conn = users_conn().await;
    let mut reader = csv_reader(THREE_USERS);
    let options = ImportOptions { skip_rows: 2, ..opts() };
    let (metrics, result) =
        run_import(conn.as_mut(), &SqliteDriver, &options, &mut reader, Utc::now(), Utc::now)
            .await;

    result.unwrap();
    assert_eq!(metrics.rows_read, 3);
    assert_eq!(metrics.rows_skipped, 2);
    assert_eq!(metrics.rows_imported, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn max_rows_stops_reading_early() {
    let mut conn = users_conn().await;
    let mut reader = csv_reader(THREE_USERS);
    let options = ImportOptions { max_rows: Some(2), ..opts() };
    let (metrics, result) =
        run_import(conn.as_mut(), &SqliteDriver, &options, &mut reader, Utc::now(), Utc::now)
            .await;

    result.unwrap();
    assert_eq!(metrics.rows_imported, 2);
    // The third row was never read.
    assert_eq!(metrics.rows_read, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn dry_run_touches_nothing() {
    let mut conn = users_conn().await;
    let mut reader = csv_reader(THREE_USERS);
    let options = ImportOptions { dry_run: true, ..opts() };
    let (metrics, result) =
        run_import(conn.as_mut(), &SqliteDriver, &options, &mut reader, Utc::now(), Utc::now)
            .await;

    result.unwrap();
    assert_eq!(metrics.rows_read, 3);
    assert_eq!(metrics.rows_imported, 3);
    assert_eq!(metrics.batch_count, 0);

    let mut sink = VecSink::default();
    let n = conn.query("SELECT * FROM users", &[], None, &mut sink).await.unwrap();
    assert_eq!(n, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn conflict_ignore_keeps_existing_rows() {
    let (mut conn, _) = SqliteDriver
        .connect(&ConnectConfig { dsn: ":memory:".to_string(), ..Default::default() })
        .await
        .unwrap();
    conn.execute("CREATE TABLE users (name TEXT PRIMARY KEY, age INTEGER, city TEXT)", &[])
        .await
        .unwrap();
    conn.execute("INSERT INTO users VALUES ('Alice', 99, 'Old')", &[]).await.unwrap();

    let mut reader = csv_reader(THREE_USERS);
    let options = ImportOptions { on_conflict: OnConflict::Ignore, ..opts() };
    let (_, result) =
        run_import(conn.as_mut(), &SqliteDriver, &options, &mut reader, Utc::now(), Utc::now)
            .await;
    result.unwrap();

    let mut sink = VecSink::default();
    conn.query("SELECT age FROM users WHERE name = 'Alice'", &[], None, &mut sink)
        .await
        .unwrap();
    assert_eq!(sink.rows[0][0], Value::Int(99));
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_batch_reports_failed_metrics() {
    let mut conn = users_conn().await;
    let mut reader = csv_reader(THREE_USERS);
    let options = ImportOptions { table: "missing_table".to_string(), ..opts() };
    let (metrics, result) =
        run_import(conn.as_mut(), &SqliteDriver, &options, &mut reader, Utc::now(), Utc::now)
            .await;

    assert!(result.is_err());
    assert_eq!(metrics.status, "failed");
    assert!(metrics.error.as_deref().unwrap().contains("batch 1"));
}
