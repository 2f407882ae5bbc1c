// src/core/handlers/sql/remote.rs

//! PostgreSQL and MySQL over sqlx pools. Rows come back as JSON objects;
//! column types without a JSON mapping come back as `null`.

use super::{SqlDriver, column_json, returns_rows};
use crate::core::errors::UniconError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{Map, Value, json};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row, TypeInfo};
use std::time::Duration;
use tracing::debug;

const MAX_CONNECTIONS: u32 = 4;

const PG_TABLES: &str = "SELECT table_name::text FROM information_schema.tables \
     WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' ORDER BY 1";

const MYSQL_TABLES: &str = "SELECT CAST(table_name AS CHAR) FROM information_schema.tables \
     WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' ORDER BY 1";

const PG_COLUMNS: &str = "\
SELECT (c.ordinal_position - 1)::int8 AS cid,
       c.column_name::text AS name,
       c.data_type::text AS type,
       c.is_nullable::text = 'NO' AS not_null,
       c.column_default::text AS dflt,
       EXISTS (
           SELECT 1
           FROM information_schema.table_constraints tc
           JOIN information_schema.key_column_usage k
             ON k.constraint_name = tc.constraint_name
            AND k.table_schema = tc.table_schema
            AND k.table_name = tc.table_name
           WHERE tc.constraint_type = 'PRIMARY KEY'
             AND tc.table_schema = c.table_schema
             AND tc.table_name = c.table_name
             AND k.column_name = c.column_name
       ) AS pk
FROM information_schema.columns c
WHERE c.table_schema = current_schema() AND c.table_name::text = $1
ORDER BY c.ordinal_position";

const MYSQL_COLUMNS: &str = "\
SELECT CAST(ordinal_position - 1 AS SIGNED) AS cid,
       CAST(column_name AS CHAR) AS name,
       CAST(column_type AS CHAR) AS type,
       CAST(is_nullable = 'NO' AS SIGNED) AS not_null,
       CAST(column_default AS CHAR) AS dflt,
       CAST(column_key = 'PRI' AS SIGNED) AS pk
FROM information_schema.columns
WHERE table_schema = DATABASE() AND table_name = ?
ORDER BY ordinal_position";

/// Binds JSON parameters positionally. Works for any sqlx query builder.
macro_rules! bind_params {
    ($query:expr, $params:expr) => {{
        let mut query = $query;
        for value in $params {
            query = match value {
                Value::Null => query.bind(Option::<String>::None),
                Value::Bool(b) => query.bind(*b),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => query.bind(i),
                    None => query.bind(n.as_f64().unwrap_or(0.0)),
                },
                Value::String(s) => query.bind(s.clone()),
                other => query.bind(other.to_string()),
            };
        }
        query
    }};
}

fn opt<T: Into<Value>>(value: Option<T>) -> Value {
    value.map(Into::into).unwrap_or(Value::Null)
}

fn naive_stamp(t: NaiveDateTime) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

fn unmapped(column: &str, type_name: &str) -> Value {
    debug!("No JSON mapping for column {} of type {}", column, type_name);
    Value::Null
}

fn pg_value(row: &PgRow, i: usize) -> Result<Value, sqlx::Error> {
    let column = row.column(i);
    Ok(match column.type_info().name() {
        "BOOL" => opt(row.try_get::<Option<bool>, _>(i)?),
        "INT2" => opt(row.try_get::<Option<i16>, _>(i)?),
        "INT4" => opt(row.try_get::<Option<i32>, _>(i)?),
        "INT8" => opt(row.try_get::<Option<i64>, _>(i)?),
        "FLOAT4" => opt(row.try_get::<Option<f32>, _>(i)?),
        "FLOAT8" => opt(row.try_get::<Option<f64>, _>(i)?),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => opt(row.try_get::<Option<String>, _>(i)?),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(i)?.unwrap_or(Value::Null),
        "UUID" => opt(row.try_get::<Option<uuid::Uuid>, _>(i)?.map(|u| u.to_string())),
        "TIMESTAMPTZ" => opt(
            row.try_get::<Option<DateTime<Utc>>, _>(i)?
                .map(|t| t.to_rfc3339()),
        ),
        "TIMESTAMP" => opt(row.try_get::<Option<NaiveDateTime>, _>(i)?.map(naive_stamp)),
        "DATE" => opt(row.try_get::<Option<NaiveDate>, _>(i)?.map(|d| d.to_string())),
        "TIME" => opt(row.try_get::<Option<NaiveTime>, _>(i)?.map(|t| t.to_string())),
        "BYTEA" => opt(
            row.try_get::<Option<Vec<u8>>, _>(i)?
                .map(|b| STANDARD.encode(b)),
        ),
        other => unmapped(column.name(), other),
    })
}

fn mysql_value(row: &MySqlRow, i: usize) -> Result<Value, sqlx::Error> {
    let column = row.column(i);
    Ok(match column.type_info().name() {
        "NULL" => Value::Null,
        "BOOLEAN" => opt(row.try_get::<Option<bool>, _>(i)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            opt(row.try_get_unchecked::<Option<i64>, _>(i)?)
        }
        name if name.ends_with("UNSIGNED") => {
            opt(row.try_get_unchecked::<Option<u64>, _>(i)?)
        }
        "FLOAT" => opt(row.try_get::<Option<f32>, _>(i)?),
        "DOUBLE" => opt(row.try_get::<Option<f64>, _>(i)?),
        // DECIMAL travels as text in both protocols; keep its exact digits.
        "DECIMAL" | "VARCHAR" | "CHAR" | "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT"
        | "ENUM" | "SET" => opt(row.try_get_unchecked::<Option<String>, _>(i)?),
        "VARBINARY" | "BINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
        | "GEOMETRY" => opt(
            row.try_get_unchecked::<Option<Vec<u8>>, _>(i)?
                .map(|b| STANDARD.encode(b)),
        ),
        "JSON" => row.try_get::<Option<Value>, _>(i)?.unwrap_or(Value::Null),
        "TIMESTAMP" => opt(
            row.try_get::<Option<DateTime<Utc>>, _>(i)?
                .map(|t| t.to_rfc3339()),
        ),
        "DATETIME" => opt(row.try_get::<Option<NaiveDateTime>, _>(i)?.map(naive_stamp)),
        "DATE" => opt(row.try_get::<Option<NaiveDate>, _>(i)?.map(|d| d.to_string())),
        "TIME" => opt(row.try_get::<Option<NaiveTime>, _>(i)?.map(|t| t.to_string())),
        other => unmapped(column.name(), other),
    })
}

fn rows_json<R: Row>(
    rows: &[R],
    decode: fn(&R, usize) -> Result<Value, sqlx::Error>,
) -> Result<Value, UniconError> {
    let columns: Vec<String> = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut map = Map::new();
        for (i, column) in columns.iter().enumerate() {
            map.insert(column.clone(), decode(row, i)?);
        }
        out.push(Value::Object(map));
    }
    let row_count = out.len();
    Ok(json!({ "rows": out, "columns": columns, "rowCount": row_count }))
}

fn connect_error(e: sqlx::Error) -> UniconError {
    match e {
        sqlx::Error::Configuration(inner) => {
            UniconError::InvalidConfig(format!("invalid database url: {inner}"))
        }
        other => other.into(),
    }
}

/// A pooled connection to a database server.
pub(super) enum RemoteDb {
    Postgres(PgPool),
    MySql(MySqlPool),
}

impl RemoteDb {
    /// Opens the pool and runs `SELECT 1`. `acquire_timeout` bounds every
    /// wait for a pooled connection, including the first.
    pub(super) async fn connect(
        driver: SqlDriver,
        url: &str,
        acquire_timeout: Duration,
    ) -> Result<Self, UniconError> {
        let db = match driver {
            SqlDriver::Postgres => RemoteDb::Postgres(
                PgPoolOptions::new()
                    .max_connections(MAX_CONNECTIONS)
                    .acquire_timeout(acquire_timeout)
                    .connect(url)
                    .await
                    .map_err(connect_error)?,
            ),
            SqlDriver::MySql => RemoteDb::MySql(
                MySqlPoolOptions::new()
                    .max_connections(MAX_CONNECTIONS)
                    .acquire_timeout(acquire_timeout)
                    .connect(url)
                    .await
                    .map_err(connect_error)?,
            ),
            SqlDriver::Sqlite => {
                return Err(UniconError::Internal(
                    "sqlite has no server connection".into(),
                ));
            }
        };
        match &db {
            RemoteDb::Postgres(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
            RemoteDb::MySql(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
        }
        Ok(db)
    }

    pub(super) async fn close(&self) {
        match self {
            RemoteDb::Postgres(pool) => pool.close().await,
            RemoteDb::MySql(pool) => pool.close().await,
        }
    }

    pub(super) async fn query(&self, sql: &str, params: &[Value]) -> Result<Value, UniconError> {
        let rows_expected = returns_rows(sql);
        match self {
            RemoteDb::Postgres(pool) => {
                let query = bind_params!(sqlx::query(sql), params);
                if rows_expected {
                    return rows_json(&query.fetch_all(pool).await?, pg_value);
                }
                let done = query.execute(pool).await?;
                Ok(json!({ "changes": done.rows_affected(), "rowCount": done.rows_affected() }))
            }
            RemoteDb::MySql(pool) => {
                let query = bind_params!(sqlx::query(sql), params);
                if rows_expected {
                    return rows_json(&query.fetch_all(pool).await?, mysql_value);
                }
                let done = query.execute(pool).await?;
                Ok(json!({ "changes": done.rows_affected(), "lastId": done.last_insert_id() }))
            }
        }
    }

    pub(super) async fn tables(&self) -> Result<Vec<String>, UniconError> {
        let names = match self {
            RemoteDb::Postgres(pool) => {
                sqlx::query_scalar::<_, String>(PG_TABLES)
                    .fetch_all(pool)
                    .await?
            }
            RemoteDb::MySql(pool) => {
                sqlx::query_scalar::<_, String>(MYSQL_TABLES)
                    .fetch_all(pool)
                    .await?
            }
        };
        Ok(names)
    }

    pub(super) async fn schema(&self, table: &str) -> Result<Vec<Value>, UniconError> {
        let columns = match self {
            RemoteDb::Postgres(pool) => sqlx::query(PG_COLUMNS)
                .bind(table)
                .fetch_all(pool)
                .await?
                .iter()
                .map(|row| {
                    Ok(column_json(
                        row.try_get("cid")?,
                        row.try_get("name")?,
                        row.try_get("type")?,
                        row.try_get("not_null")?,
                        opt(row.try_get::<Option<String>, _>("dflt")?),
                        row.try_get("pk")?,
                    ))
                })
                .collect::<Result<Vec<_>, sqlx::Error>>()?,
            RemoteDb::MySql(pool) => sqlx::query(MYSQL_COLUMNS)
                .bind(table)
                .fetch_all(pool)
                .await?
                .iter()
                .map(|row| {
                    Ok(column_json(
                        row.try_get("cid")?,
                        row.try_get("name")?,
                        row.try_get("type")?,
                        row.try_get::<i64, _>("not_null")? != 0,
                        opt(row.try_get::<Option<String>, _>("dflt")?),
                        row.try_get::<i64, _>("pk")? != 0,
                    ))
                })
                .collect::<Result<Vec<_>, sqlx::Error>>()?,
        };
        Ok(columns)
    }
}
