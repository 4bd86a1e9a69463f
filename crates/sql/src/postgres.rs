// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PostgreSQL driver over tokio-postgres.

use crate::driver::{
    Cleanup, ConnectConfig, Driver, IsolationLevel, OnConflict, Placeholder, RowSink,
    SqlConnection,
};
use crate::error::SqlError;
use crate::metrics::fnv1a64;
use crate::params::sanitize_identifier;
use crate::value::Value;
use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::{pin_mut, TryStreamExt};
use tokio_postgres::types::{IsNull, ToSql, Type};
use tokio_postgres::NoTls;

pub struct PostgresDriver;

impl ToSql for Value {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => b.to_sql(ty, out),
            Value::Int(i) => {
                if *ty == Type::INT2 {
                    (*i as i16).to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    (*i as i32).to_sql(ty, out)
                } else if *ty == Type::FLOAT4 {
                    (*i as f32).to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*i as f64).to_sql(ty, out)
                } else if *ty == Type::TEXT || *ty == Type::VARCHAR {
                    i.to_string().to_sql(ty, out)
                } else {
                    i.to_sql(ty, out)
                }
            }
            Value::Float(f) => {
                if *ty == Type::FLOAT4 {
                    (*f as f32).to_sql(ty, out)
                } else {
                    f.to_sql(ty, out)
                }
            }
            Value::Text(s) => s.to_sql(ty, out),
            Value::Bytes(b) => b.as_slice().to_sql(ty, out),
            Value::Timestamp(t) => {
                if *ty == Type::TIMESTAMP {
                    t.naive_utc().to_sql(ty, out)
                } else {
                    t.to_sql(ty, out)
                }
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    tokio_postgres::types::to_sql_checked!();
}

fn scan_cell(row: &tokio_postgres::Row, i: usize, ty: &Type) -> Value {
    fn get<'a, T: tokio_postgres::types::FromSql<'a>>(
        row: &'a tokio_postgres::Row,
        i: usize,
    ) -> Option<T> {
        row.try_get::<_, Option<T>>(i).ok().flatten()
    }

    if *ty == Type::BOOL {
        get::<bool>(row, i).map(Value::Bool).unwrap_or(Value::Null)
    } else if *ty == Type::INT2 {
        get::<i16>(row, i).map(|v| Value::Int(v.into())).unwrap_or(Value::Null)
    } else if *ty == Type::INT4 {
        get::<i32>(row, i).map(|v| Value::Int(v.into())).unwrap_or(Value::Null)
    } else if *ty == Type::INT8 {
        get::<i64>(row, i).map(Value::Int).unwrap_or(Value::Null)
    } else if *ty == Type::FLOAT4 {
        get::<f32>(row, i).map(|v| Value::Float(v.into())).unwrap_or(Value::Null)
    } else if *ty == Type::FLOAT8 {
        get::<f64>(row, i).map(Value::Float).unwrap_or(Value::Null)
    } else if *ty == Type::BYTEA {
        get::<Vec<u8>>(row, i).map(Value::Bytes).unwrap_or(Value::Null)
    } else if *ty == Type::TIMESTAMPTZ {
        get::<DateTime<Utc>>(row, i).map(Value::Timestamp).unwrap_or(Value::Null)
    } else if *ty == Type::TIMESTAMP {
        get::<chrono::NaiveDateTime>(row, i)
            .map(|t| Value::Timestamp(Utc.from_utc_datetime(&t)))
            .unwrap_or(Value::Null)
    } else {
        // Text-ish and everything else falls back to a string scan.
        get::<String>(row, i).map(Value::Text).unwrap_or(Value::Null)
    }
}

struct PgConn {
    client: Option<tokio_postgres::Client>,
}

impl PgConn {
    fn client(&mut self) -> Result<&mut tokio_postgres::Client, SqlError> {
        self.client.as_mut().ok_or(SqlError::Closed)
    }
}

#[async_trait]
impl SqlConnection for PgConn {
    async fn ping(&mut self) -> Result<(), SqlError> {
        self.client()?.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn execute(&mut self, sql: &str, values: &[Value]) -> Result<u64, SqlError> {
        let params = values.iter().map(|v| v as &dyn ToSql);
        Ok(self.client()?.execute_raw(sql, params).await?)
    }

    async fn query(
        &mut self,
        sql: &str,
        values: &[Value],
        max_rows: Option<u64>,
        sink: &mut (dyn RowSink + '_),
    ) -> Result<u64, SqlError> {
        let params = values.iter().map(|v| v as &dyn ToSql);
        let stream = self.client()?.query_raw(sql, params).await?;
        pin_mut!(stream);

        let mut count = 0u64;
        let mut sent_columns = false;
        while let Some(row) = stream.try_next().await? {
            if !sent_columns {
                let columns: Vec<String> =
                    row.columns().iter().map(|c| c.name().to_string()).collect();
                sink.columns(&columns)?;
                sent_columns = true;
            }
            if let Some(max) = max_rows {
                if count >= max {
                    break;
                }
            }
            let values: Vec<Value> = row
                .columns()
                .iter()
                .enumerate()
                .map(|(i, col)| scan_cell(&row, i, col.type_()))
                .collect();
            sink.row(&values)?;
            count += 1;
        }
        if !sent_columns {
            sink.columns(&[])?;
        }
        Ok(count)
    }

    async fn begin(&mut self, isolation: IsolationLevel) -> Result<(), SqlError> {
        let sql = match isolation {
            IsolationLevel::Default => "BEGIN",
            IsolationLevel::ReadCommitted => "BEGIN ISOLATION LEVEL READ COMMITTED",
            IsolationLevel::RepeatableRead => "BEGIN ISOLATION LEVEL REPEATABLE READ",
            IsolationLevel::Serializable => "BEGIN ISOLATION LEVEL SERIALIZABLE",
        };
        self.client()?.batch_execute(sql).await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), SqlError> {
        self.client()?.batch_execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), SqlError> {
        self.client()?.batch_execute("ROLLBACK").await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SqlError> {
        drop(self.client.take());
        Ok(())
    }
}

/// 64-bit advisory lock key from the configured name.
pub fn advisory_key(name: &str) -> i64 {
    fnv1a64(name.as_bytes()) as i64
}

#[async_trait]
impl Driver for PostgresDriver {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn connect(
        &self,
        cfg: &ConnectConfig,
    ) -> Result<(Box<dyn SqlConnection>, Option<Cleanup>), SqlError> {
        let (client, connection) = tokio_postgres::connect(&cfg.dsn, NoTls).await?;
        // The connection task owns the socket; it ends when the client
        // drops.
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(error = %e, "postgres connection closed");
            }
        });
        Ok((Box::new(PgConn { client: Some(client) }), None))
    }

    fn supports_advisory_lock(&self) -> bool {
        true
    }

    async fn acquire_advisory_lock(
        &self,
        conn: &mut (dyn SqlConnection + '_),
        name: &str,
    ) -> Result<(), SqlError> {
        conn.execute("SELECT pg_advisory_lock($1)", &[Value::Int(advisory_key(name))])
            .await?;
        Ok(())
    }

    async fn release_advisory_lock(
        &self,
        conn: &mut (dyn SqlConnection + '_),
        name: &str,
    ) -> Result<(), SqlError> {
        conn.execute("SELECT pg_advisory_unlock($1)", &[Value::Int(advisory_key(name))])
            .await?;
        Ok(())
    }

    fn placeholder(&self) -> Placeholder {
        Placeholder::Dollar
    }

    /// Dialect: full UPSERT support.
    ///
    /// `replace` without a conflict target downgrades to `DO NOTHING`.
    fn build_insert_query(
        &self,
        table: &str,
        columns: &[String],
        row_count: usize,
        on_conflict: OnConflict,
        conflict_target: &[String],
        update_columns: &[String],
    ) -> Result<String, SqlError> {
        if columns.is_empty() || row_count == 0 {
            return Err(SqlError::Config("insert needs columns and rows".to_string()));
        }
        let table = self.quote_identifier(sanitize_identifier(table)?);
        let quoted: Vec<String> = columns
            .iter()
            .map(|c| Ok(self.quote_identifier(sanitize_identifier(c)?)))
            .collect::<Result<_, SqlError>>()?;

        let mut rows = Vec::with_capacity(row_count);
        for r in 0..row_count {
            let placeholders: Vec<String> =
                (0..columns.len()).map(|c| format!("${}", r * columns.len() + c + 1)).collect();
            rows.push(format!("({})", placeholders.join(", ")));
        }

        let mut sql = format!(
            "INSERT INTO {table} ({}) VALUES {}",
            quoted.join(", "),
            rows.join(", ")
        );
        match on_conflict {
            OnConflict::Error => {}
            OnConflict::Ignore => sql.push_str(" ON CONFLICT DO NOTHING"),
            OnConflict::Replace => {
                if conflict_target.is_empty() {
                    sql.push_str(" ON CONFLICT DO NOTHING");
                } else {
                    let target: Vec<String> = conflict_target
                        .iter()
                        .map(|c| Ok(self.quote_identifier(sanitize_identifier(c)?)))
                        .collect::<Result<_, SqlError>>()?;
                    let updates: Vec<&String> = if update_columns.is_empty() {
                        columns.iter().filter(|c| !conflict_target.contains(c)).collect()
                    } else {
                        update_columns.iter().collect()
                    };
                    let sets: Vec<String> = updates
                        .iter()
                        .map(|c| {
                            let quoted = self.quote_identifier(sanitize_identifier(c)?);
                            Ok(format!("{quoted} = EXCLUDED.{quoted}"))
                        })
                        .collect::<Result<_, SqlError>>()?;
                    sql.push_str(&format!(
                        " ON CONFLICT ({}) DO UPDATE SET {}",
                        target.join(", "),
                        sets.join(", ")
                    ));
                }
            }
        }
        Ok(sql)
    }
}

#[cfg(test)]
#[path = "postgres_tests.rs"]
mod postgres_tests;
