//! Database session contract.
//!
//! A [`Session`] is the blocking-in-spirit execution surface the engines
//! drive: statements run one after the other, each awaited to completion.
//! Driver crates implement it over their connection type.

use async_trait::async_trait;

use crate::error::Result;
use crate::value::Value;

/// A statement prepared on a session, reusable with different bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    sql: String,
}

impl Statement {
    /// Wraps prepared statement text.
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into() }
    }

    /// Returns the statement text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// Forward-only result cursor.
#[async_trait]
pub trait Cursor: Send {
    /// Column names reported by the result, in result order.
    fn columns(&self) -> &[String];

    /// Returns the next row, `None` once the result is exhausted.
    async fn next_row(&mut self) -> Result<Option<Vec<Value>>>;

    /// Releases the underlying result. Calling it again is a no-op.
    async fn close(&mut self) -> Result<()>;
}

/// An open connection to a database.
#[async_trait]
pub trait Session: Send {
    /// Returns whether a transaction is active.
    fn in_transaction(&self) -> bool;

    /// Starts a transaction; fails if one is already active.
    async fn begin(&mut self) -> Result<()>;

    /// Commits the active transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Rolls back the active transaction.
    async fn rollback(&mut self) -> Result<()>;

    /// Executes a statement, returning the number of affected rows.
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Prepares a statement for repeated execution.
    async fn prepare(&mut self, sql: &str) -> Result<Statement>;

    /// Executes a prepared statement with a fresh set of bindings.
    async fn execute_prepared(&mut self, statement: &Statement, params: &[Value]) -> Result<u64> {
        self.execute(statement.sql(), params).await
    }

    /// Runs a query and returns a cursor over its rows.
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Box<dyn Cursor>>;

    /// Closes the session; an active transaction is rolled back.
    async fn close(&mut self) -> Result<()>;

    /// Runs a query and collects every row.
    async fn fetch_all(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>> {
        let mut cursor = self.query(sql, params).await?;
        let mut rows = Vec::new();
        while let Some(row) = cursor.next_row().await? {
            rows.push(row);
        }
        cursor.close().await?;
        Ok(rows)
    }

    /// Returns the first column of the first row, `None` without rows.
    async fn query_one(&mut self, sql: &str, params: &[Value]) -> Result<Option<Value>> {
        let mut cursor = self.query(sql, params).await?;
        let first = cursor.next_row().await?;
        cursor.close().await?;
        Ok(first.and_then(|row| row.into_iter().next()))
    }
}
