//! SQLite session over an sqlx pool.
//!
//! Statements run on the pool, or on the owned transaction once one has
//! been started. Cursors opened inside a transaction are buffered; cursors
//! on a multi-connection pool stream rows from a spawned task through a
//! bounded channel.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::TryStreamExt;
use oxide_reconcile::error::{Error, Result};
use oxide_reconcile::registry::Connector;
use oxide_reconcile::session::{Cursor, Session, Statement};
use oxide_reconcile::value::{format_timestamp, Value};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool, SqliteRow, SqliteStatement};
use sqlx::{Column as _, Executor, Row, Statement as _, Transaction, TypeInfo, ValueRef};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::SqliteConfig;

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// Binds values in placeholder order.
fn bind_values<'q>(mut query: SqliteQuery<'q>, params: &'q [Value]) -> SqliteQuery<'q> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::String(s) => query.bind(s.as_str()),
            Value::Int64(i) => query.bind(*i),
            Value::Float64(f) => query.bind(*f),
            Value::Bool(b) => query.bind(*b),
            Value::Timestamp(t) => query.bind(format_timestamp(t)),
            Value::Bytes(b) => query.bind(b.as_slice()),
        };
    }
    query
}

/// Decodes a row by the storage class of each value.
fn decode_row(row: &SqliteRow) -> std::result::Result<Vec<Value>, sqlx::Error> {
    (0..row.len()).map(|idx| decode_value(row, idx)).collect()
}

fn decode_value(row: &SqliteRow, idx: usize) -> std::result::Result<Value, sqlx::Error> {
    let storage = {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(Value::Null);
        }
        raw.type_info().name().to_string()
    };
    let value = match storage.as_str() {
        "INTEGER" | "BOOLEAN" => Value::Int64(row.try_get_unchecked(idx)?),
        "REAL" | "NUMERIC" => Value::Float64(row.try_get_unchecked(idx)?),
        "BLOB" => Value::Bytes(row.try_get_unchecked(idx)?),
        _ => Value::String(row.try_get_unchecked(idx)?),
    };
    Ok(value)
}

fn column_names(statement: &SqliteStatement<'_>) -> Vec<String> {
    statement
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect()
}

/// A session on a SQLite database.
pub struct SqliteSession {
    pool: SqlitePool,
    tx: Option<Transaction<'static, Sqlite>>,
    cursor_buffer: usize,
    streaming: bool,
}

impl SqliteSession {
    /// Connects with the given configuration.
    pub async fn connect(config: &SqliteConfig) -> Result<Self> {
        let pool = config.connect().await?;
        debug!(url = %config.url, pool_size = config.pool_size(), "Connected to SQLite");
        Ok(Self {
            pool,
            tx: None,
            cursor_buffer: config.cursor_buffer.max(1),
            streaming: config.pool_size() > 1,
        })
    }

    /// Wraps an existing pool. Cursors stream when the pool can hand out
    /// more than one connection.
    #[must_use]
    pub fn from_pool(pool: SqlitePool, cursor_buffer: usize) -> Self {
        let streaming = pool.options().get_max_connections() > 1;
        Self {
            pool,
            tx: None,
            cursor_buffer: cursor_buffer.max(1),
            streaming,
        }
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl std::fmt::Debug for SqliteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSession")
            .field("in_transaction", &self.tx.is_some())
            .field("streaming", &self.streaming)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Session for SqliteSession {
    fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    async fn begin(&mut self) -> Result<()> {
        if self.tx.is_some() {
            return Err(Error::TransactionActive);
        }
        self.tx = Some(self.pool.begin().await.map_err(Error::driver)?);
        debug!("Transaction started");
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let tx = self.tx.take().ok_or(Error::NoTransaction)?;
        tx.commit().await.map_err(Error::driver)?;
        debug!("Transaction committed");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        let tx = self.tx.take().ok_or(Error::NoTransaction)?;
        tx.rollback().await.map_err(Error::driver)?;
        debug!("Transaction rolled back");
        Ok(())
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        debug!(sql = %sql, params = params.len(), "Executing SQL");
        let query = bind_values(sqlx::query(sql), params);
        let result = match self.tx.as_mut() {
            Some(tx) => query.execute(&mut **tx).await,
            None => query.execute(&self.pool).await,
        };
        result
            .map(|r| r.rows_affected())
            .map_err(|e| Error::statement(sql, params, e))
    }

    async fn prepare(&mut self, sql: &str) -> Result<Statement> {
        let prepared = match self.tx.as_mut() {
            Some(tx) => (&mut **tx).prepare(sql).await,
            None => (&self.pool).prepare(sql).await,
        };
        prepared.map_err(|e| Error::statement(sql, &[], e))?;
        Ok(Statement::new(sql))
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Box<dyn Cursor>> {
        debug!(sql = %sql, params = params.len(), "Running query");
        let fail = |e: sqlx::Error| Error::statement(sql, params, e);

        let (columns, rows) = match self.tx.as_mut() {
            Some(tx) => {
                let columns = column_names(&(&mut **tx).prepare(sql).await.map_err(fail)?);
                let rows = bind_values(sqlx::query(sql), params)
                    .fetch_all(&mut **tx)
                    .await
                    .map_err(fail)?;
                (columns, rows)
            }
            None => {
                let columns = column_names(&(&self.pool).prepare(sql).await.map_err(fail)?);
                if self.streaming {
                    let cursor = SqliteCursor::streaming(
                        self.pool.clone(),
                        sql.to_string(),
                        params.to_vec(),
                        columns,
                        self.cursor_buffer,
                    );
                    return Ok(Box::new(cursor));
                }
                let rows = bind_values(sqlx::query(sql), params)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(fail)?;
                (columns, rows)
            }
        };

        let rows = rows
            .iter()
            .map(decode_row)
            .collect::<std::result::Result<VecDeque<_>, _>>()
            .map_err(fail)?;
        Ok(Box::new(SqliteCursor::buffered(columns, rows)))
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await.map_err(Error::driver)?;
        }
        self.pool.close().await;
        debug!("SQLite session closed");
        Ok(())
    }
}

enum CursorRows {
    Buffered(VecDeque<Vec<Value>>),
    Streaming {
        rx: mpsc::Receiver<Result<Vec<Value>>>,
        task: JoinHandle<()>,
    },
    Closed,
}

/// Cursor over a SQLite result.
pub struct SqliteCursor {
    columns: Vec<String>,
    rows: CursorRows,
}

impl SqliteCursor {
    fn buffered(columns: Vec<String>, rows: VecDeque<Vec<Value>>) -> Self {
        Self {
            columns,
            rows: CursorRows::Buffered(rows),
        }
    }

    fn streaming(
        pool: SqlitePool,
        sql: String,
        params: Vec<Value>,
        columns: Vec<String>,
        buffer: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(buffer);
        let task = tokio::spawn(async move {
            let mut rows = bind_values(sqlx::query(&sql), &params).fetch(&pool);
            loop {
                let next = match rows.try_next().await {
                    Ok(Some(row)) => decode_row(&row),
                    Ok(None) => break,
                    Err(e) => Err(e),
                };
                let failed = next.is_err();
                let item = next.map_err(|e| Error::statement(sql.as_str(), &params, e));
                // a send error means the reader went away
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
        });
        Self {
            columns,
            rows: CursorRows::Streaming { rx, task },
        }
    }
}

impl std::fmt::Debug for SqliteCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCursor")
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Cursor for SqliteCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next_row(&mut self) -> Result<Option<Vec<Value>>> {
        match &mut self.rows {
            CursorRows::Buffered(rows) => Ok(rows.pop_front()),
            CursorRows::Streaming { rx, .. } => rx.recv().await.transpose(),
            CursorRows::Closed => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<()> {
        let rows = std::mem::replace(&mut self.rows, CursorRows::Closed);
        if let CursorRows::Streaming { rx, task } = rows {
            drop(rx);
            task.await.map_err(Error::driver)?;
        }
        Ok(())
    }
}

/// Opens [`SqliteSession`]s.
///
/// The data source name given to `connect` replaces the configured URL
/// unless it is empty.
#[derive(Debug, Clone, Default)]
pub struct SqliteConnector {
    config: SqliteConfig,
}

impl SqliteConnector {
    /// Creates a connector with base settings.
    #[must_use]
    pub fn new(config: SqliteConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    async fn connect(&self, dsn: &str) -> Result<Box<dyn Session>> {
        let mut config = self.config.clone();
        if !dsn.is_empty() {
            config.url = dsn.to_string();
        }
        Ok(Box::new(SqliteSession::connect(&config).await?))
    }
}
