// src/core/handlers/sql/sqlite.rs

use super::{column_json, returns_rows};
use crate::core::errors::UniconError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection as Db, params_from_iter};
use serde_json::{Map, Number, Value, json};
use std::sync::Arc;

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(STANDARD.encode(b)),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn query_rows(db: &Db, sql: &str, args: &[SqlValue]) -> Result<Value, UniconError> {
    let mut stmt = db.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows = stmt.query(params_from_iter(args.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut map = Map::new();
        for (i, column) in columns.iter().enumerate() {
            map.insert(column.clone(), to_json(row.get_ref(i)?));
        }
        out.push(Value::Object(map));
    }
    Ok(json!({ "rows": out, "columns": columns }))
}

fn execute(db: &Db, sql: &str, args: &[SqlValue]) -> Result<Value, UniconError> {
    let changes = db.execute(sql, params_from_iter(args.iter()))?;
    Ok(json!({ "changes": changes, "lastId": db.last_insert_rowid() }))
}

/// A SQLite connection; statements run on the blocking pool.
pub(super) struct SqliteDb {
    db: Arc<Mutex<Db>>,
}

impl SqliteDb {
    pub(super) async fn open(filename: String) -> Result<Self, UniconError> {
        let db = tokio::task::spawn_blocking(move || -> Result<Db, UniconError> {
            let db = Db::open(&filename)?;
            db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
            Ok(db)
        })
        .await
        .map_err(|e| UniconError::Internal(format!("SQL worker failed: {e}")))??;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, UniconError>
    where
        T: Send + 'static,
        F: FnOnce(&Db) -> Result<T, UniconError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock();
            f(&guard)
        })
        .await
        .map_err(|e| UniconError::Internal(format!("SQL worker failed: {e}")))?
    }

    pub(super) async fn query(&self, sql: String, params: Vec<Value>) -> Result<Value, UniconError> {
        let args: Vec<SqlValue> = params.iter().map(to_sql).collect();
        self.blocking(move |db| {
            if returns_rows(&sql) {
                query_rows(db, &sql, &args)
            } else {
                execute(db, &sql, &args)
            }
        })
        .await
    }

    pub(super) async fn tables(&self) -> Result<Vec<String>, UniconError> {
        self.blocking(|db| {
            let mut stmt = db.prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' \
                 AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(names)
        })
        .await
    }

    pub(super) async fn schema(&self, table: String) -> Result<Vec<Value>, UniconError> {
        self.blocking(move |db| {
            let sql = format!("PRAGMA table_info({})", quote_ident(&table));
            let mut stmt = db.prepare(&sql)?;
            let columns = stmt
                .query_map([], |row| {
                    Ok(column_json(
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)? != 0,
                        to_json(row.get_ref(4)?),
                        row.get::<_, i64>(5)? != 0,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(columns)
        })
        .await
    }
}
