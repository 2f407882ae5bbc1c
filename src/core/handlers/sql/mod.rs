// src/core/handlers/sql/mod.rs

//! Relational database handler. SQLite runs in-process on the blocking pool;
//! PostgreSQL and MySQL go through a small connection pool.

mod remote;
mod sqlite;

use super::{HandlerContext, ProtocolHandler, params};
use crate::core::errors::UniconError;
use async_trait::async_trait;
use remote::RemoteDb;
use serde::Deserialize;
use serde_json::{Value, json};
use sqlite::SqliteDb;
use std::fmt;
use tracing::info;

pub const OPERATIONS: &[&str] = &["query", "tables", "schema"];

/// A database engine, after alias resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDriver {
    Sqlite,
    Postgres,
    MySql,
}

impl SqlDriver {
    /// Resolves a driver name: `sqlite`/`sqlite3`, `pg` (`postgres`,
    /// `postgresql`, `timescaledb`, `tsdb`) and `mysql` (`mariadb`).
    pub fn parse(raw: &str) -> Result<Self, UniconError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "sqlite" | "sqlite3" => Ok(SqlDriver::Sqlite),
            "pg" | "postgres" | "postgresql" | "timescaledb" | "tsdb" => Ok(SqlDriver::Postgres),
            "mysql" | "mariadb" => Ok(SqlDriver::MySql),
            _ => Err(UniconError::Unsupported(format!(
                "Unsupported SQL driver: {}",
                raw.trim()
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SqlDriver::Sqlite => "sqlite",
            SqlDriver::Postgres => "pg",
            SqlDriver::MySql => "mysql",
        }
    }
}

impl fmt::Display for SqlDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SqlConfig {
    #[serde(default = "default_driver")]
    driver: String,
    #[serde(default = "default_filename")]
    filename: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    connection_string: Option<String>,
}

fn default_driver() -> String {
    "sqlite".to_string()
}

fn default_filename() -> String {
    ":memory:".to_string()
}

impl SqlConfig {
    /// `url` wins over `connectionString`; blank values count as missing.
    fn server_url(&self, driver: SqlDriver) -> Result<String, UniconError> {
        [&self.url, &self.connection_string]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                UniconError::InvalidConfig(format!(
                    "{driver} connections need a url or connectionString"
                ))
            })
    }
}

#[derive(Debug, Deserialize)]
struct QueryParams {
    sql: String,
    #[serde(default)]
    params: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct SchemaParams {
    table: String,
}

/// True for statements that produce a result set.
pub fn returns_rows(sql: &str) -> bool {
    let keyword: String = sql
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    matches!(
        keyword.to_ascii_lowercase().as_str(),
        "select" | "pragma" | "with" | "explain" | "values" | "show" | "describe" | "desc"
    ) || has_returning_clause(sql)
}

fn has_returning_clause(sql: &str) -> bool {
    sql.split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .any(|word| word.eq_ignore_ascii_case("returning"))
}

/// Column description shared by every backend's `schema` result.
fn column_json(
    cid: i64,
    name: String,
    data_type: String,
    not_null: bool,
    default: Value,
    primary_key: bool,
) -> Value {
    json!({
        "cid": cid,
        "name": name,
        "type": data_type,
        "notNull": not_null,
        "default": default,
        "primaryKey": primary_key,
    })
}

enum Backend {
    Sqlite(SqliteDb),
    Remote(RemoteDb),
}

pub struct SqlHandler {
    ctx: HandlerContext,
    db: Option<Backend>,
}

impl SqlHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx, db: None }
    }

    fn db(&self) -> Result<&Backend, UniconError> {
        self.db
            .as_ref()
            .ok_or_else(|| UniconError::NotConnected("SQL".into()))
    }
}

#[async_trait]
impl ProtocolHandler for SqlHandler {
    async fn connect(&mut self) -> Result<Value, UniconError> {
        let config: SqlConfig = self.ctx.parse_config()?;
        let driver = SqlDriver::parse(&config.driver)?;
        let (backend, detail) = match driver {
            SqlDriver::Sqlite => {
                let db = SqliteDb::open(config.filename.clone()).await?;
                info!("Opened SQLite database {}", config.filename);
                (
                    Backend::Sqlite(db),
                    json!({ "driver": driver.name(), "filename": config.filename }),
                )
            }
            SqlDriver::Postgres | SqlDriver::MySql => {
                let url = config.server_url(driver)?;
                let db = RemoteDb::connect(driver, &url, self.ctx.settings.connect_timeout).await?;
                info!("Connected to {} database for {}", driver, self.ctx.connection_id);
                (Backend::Remote(db), json!({ "driver": driver.name() }))
            }
        };
        self.db = Some(backend);
        Ok(detail)
    }

    async fn disconnect(&mut self) -> Result<(), UniconError> {
        match self.db.take() {
            Some(Backend::Remote(db)) => db.close().await,
            // Dropping the last reference closes the file.
            Some(Backend::Sqlite(_)) | None => {}
        }
        Ok(())
    }

    async fn invoke(&mut self, operation: &str, params: Value) -> Result<Value, UniconError> {
        match operation {
            "query" => {
                let p: QueryParams = params::parse(operation, params)?;
                if p.sql.trim().is_empty() {
                    return Err(UniconError::params("SQL statement required"));
                }
                match self.db()? {
                    Backend::Sqlite(db) => db.query(p.sql, p.params).await,
                    Backend::Remote(db) => db.query(&p.sql, &p.params).await,
                }
            }
            "tables" => {
                let tables = match self.db()? {
                    Backend::Sqlite(db) => db.tables().await?,
                    Backend::Remote(db) => db.tables().await?,
                };
                Ok(json!({ "tables": tables }))
            }
            "schema" => {
                let p: SchemaParams = params::parse(operation, params)?;
                let columns = match self.db()? {
                    Backend::Sqlite(db) => db.schema(p.table.clone()).await?,
                    Backend::Remote(db) => db.schema(&p.table).await?,
                };
                if columns.is_empty() {
                    return Err(UniconError::params(format!("no such table: {}", p.table)));
                }
                Ok(json!({ "table": p.table, "columns": columns }))
            }
            _ => Err(UniconError::UnknownOperation {
                protocol: "sql".into(),
                operation: operation.into(),
            }),
        }
    }
}
