//! SQLite connection with statement logging and nested transactions

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use serde::Serialize;

use crate::error::{HarnessError, Result};

use super::{LoggedQuery, QueryLog};

/// Engine identifier reported in connection parameters
pub const SQLITE_ENGINE: &str = "embedded-sqlite";

/// How to reach the embedded database
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionParams {
    pub engine: String,
    /// Database file; `None` or blank keeps the store in memory
    pub path: Option<PathBuf>,
    /// The store is a disposable test artifact
    pub ephemeral: bool,
}

impl ConnectionParams {
    pub fn sqlite(path: Option<PathBuf>) -> Self {
        Self {
            engine: SQLITE_ENGINE.to_string(),
            path,
            ephemeral: true,
        }
    }

    pub fn in_memory() -> Self {
        Self::sqlite(None)
    }

    /// The file path, when it names one
    pub fn file_path(&self) -> Option<&Path> {
        self.path
            .as_deref()
            .filter(|p| !p.to_string_lossy().trim().is_empty())
    }

    pub fn is_in_memory(&self) -> bool {
        self.file_path().is_none()
    }
}

/// One live engine connection. Every statement sent to the engine,
/// transaction control and failed statements included, is recorded in the
/// attached query log.
pub struct Connection {
    inner: Option<rusqlite::Connection>,
    params: ConnectionParams,
    logger: Option<QueryLog>,
    transaction_depth: u32,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("params", &self.params)
            .field("connected", &self.inner.is_some())
            .field("transaction_depth", &self.transaction_depth)
            .finish()
    }
}

impl Connection {
    pub fn open(params: ConnectionParams, logger: Option<QueryLog>) -> Result<Self> {
        let inner = match params.file_path() {
            Some(path) => rusqlite::Connection::open(path)?,
            None => rusqlite::Connection::open_in_memory()?,
        };
        tracing::debug!(
            engine = %params.engine,
            path = ?params.file_path(),
            "opened connection"
        );

        Ok(Self {
            inner: Some(inner),
            params,
            logger,
            transaction_depth: 0,
        })
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_some()
    }

    pub fn query_log(&self) -> Option<&QueryLog> {
        self.logger.as_ref()
    }

    pub fn transaction_depth(&self) -> u32 {
        self.transaction_depth
    }

    pub fn is_transaction_active(&self) -> bool {
        self.transaction_depth > 0
    }

    fn raw(&self) -> Result<&rusqlite::Connection> {
        self.inner.as_ref().ok_or(HarnessError::ConnectionClosed)
    }

    fn log(&self, sql: &str, params: &[Value], started: (DateTime<Utc>, Instant)) {
        let (started_at, started) = started;
        let elapsed = started.elapsed();
        tracing::trace!(sql, ?elapsed, "sent statement");
        if let Some(logger) = &self.logger {
            logger.record(LoggedQuery {
                sql: sql.to_string(),
                params: params.iter().map(render_value).collect(),
                started_at,
                elapsed,
            });
        }
    }

    /// Execute a statement, returning the number of affected rows
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        let conn = self.raw()?;
        let started = (Utc::now(), Instant::now());
        let changed = conn.execute(sql, params_from_iter(params.iter()));
        self.log(sql, params, started);
        Ok(changed?)
    }

    /// Run a query and map every row
    pub fn query<T, F>(&self, sql: &str, params: &[Value], mut f: F) -> Result<Vec<T>>
    where
        F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.raw()?;
        let started = (Utc::now(), Instant::now());
        let rows = conn.prepare(sql).and_then(|mut stmt| {
            stmt.query_map(params_from_iter(params.iter()), |row| f(row))?
                .collect::<Result<Vec<_>, _>>()
        });
        self.log(sql, params, started);
        Ok(rows?)
    }

    pub fn query_i64(&self, sql: &str, params: &[Value]) -> Result<i64> {
        let conn = self.raw()?;
        let started = (Utc::now(), Instant::now());
        let value = conn.query_row(sql, params_from_iter(params.iter()), |row| row.get(0));
        self.log(sql, params, started);
        Ok(value?)
    }

    pub fn last_insert_id(&self) -> Result<i64> {
        Ok(self.raw()?.last_insert_rowid())
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let count = self.query_i64(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            &[Value::Text(table.to_string())],
        )?;
        Ok(count > 0)
    }

    /// Names of every user table
    pub fn table_names(&self) -> Result<Vec<String>> {
        self.query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            &[],
            |row| row.get(0),
        )
    }

    /// Begin a transaction. Only the outermost level reaches the engine.
    pub fn begin_transaction(&mut self) -> Result<()> {
        if self.transaction_depth == 0 {
            self.execute("BEGIN", &[])?;
        }
        self.transaction_depth += 1;
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        match self.transaction_depth {
            0 => Err(HarnessError::NoActiveTransaction),
            1 => {
                self.execute("COMMIT", &[])?;
                self.transaction_depth = 0;
                Ok(())
            }
            _ => {
                self.transaction_depth -= 1;
                Ok(())
            }
        }
    }

    /// Roll back the whole transaction, whatever the nesting level
    pub fn roll_back(&mut self) -> Result<()> {
        if self.transaction_depth == 0 {
            return Err(HarnessError::NoActiveTransaction);
        }
        self.transaction_depth = 0;
        self.execute("ROLLBACK", &[])?;
        Ok(())
    }

    /// Close the engine connection. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        let Some(conn) = self.inner.take() else {
            return Ok(());
        };
        self.transaction_depth = 0;
        conn.close().map_err(|(_, e)| HarnessError::Sqlite(e))?;
        tracing::debug!(path = ?self.params.file_path(), "closed connection");
        Ok(())
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => r.to_string(),
        Value::Text(s) => format!("'{}'", s),
        Value::Blob(b) => format!("<{} bytes>", b.len()),
    }
}
