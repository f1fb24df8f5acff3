//! Dialect driver contract.
//!
//! Each backend implements [`Dialect`] once. The engines only ever talk to a
//! database through this trait and a [`Session`]; they never branch on a
//! dialect's name.

use async_trait::async_trait;

use crate::desc::Desc;
use crate::error::Result;
use crate::schema::{Column, Index, Table};
use crate::session::Session;

/// An index as reported by introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableIndex {
    /// Index name.
    pub name: String,
    /// Index definition.
    pub index: Index,
}

/// Options for a merge (upsert) of one relation into a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merge {
    /// Destination table.
    pub dest: String,
    /// Source table name or parenthesized subquery.
    pub source: String,
    /// Columns copied from source to destination.
    pub columns: Vec<String>,
    /// Columns identifying a row.
    pub key_columns: Vec<String>,
    /// Whether existing destination rows are updated on key conflict.
    pub update_existing: bool,
    /// Whether destination rows without a source match are deleted.
    pub delete_missing: bool,
    /// Optional predicate over column names restricting the rows merged
    /// and the destination rows considered for deletion.
    pub filter: Option<String>,
}

impl Merge {
    /// Creates a merge that inserts missing rows and updates existing ones.
    #[must_use]
    pub fn new(dest: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            dest: dest.into(),
            source: source.into(),
            columns: Vec::new(),
            key_columns: Vec::new(),
            update_existing: true,
            delete_missing: false,
            filter: None,
        }
    }

    /// Sets the copied columns.
    #[must_use]
    pub fn columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the key columns.
    #[must_use]
    pub fn key_columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.key_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets whether existing rows are updated.
    #[must_use]
    pub fn update_existing(mut self, enabled: bool) -> Self {
        self.update_existing = enabled;
        self
    }

    /// Sets whether unmatched destination rows are deleted.
    #[must_use]
    pub fn delete_missing(mut self, enabled: bool) -> Self {
        self.delete_missing = enabled;
        self
    }

    /// Sets the row filter.
    #[must_use]
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

/// Backend-specific SQL generation, introspection and DDL.
#[async_trait]
pub trait Dialect: Send + Sync {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// Returns the parameter token for a 1-based ordinal.
    fn placeholder(&self, ordinal: usize) -> String;

    /// Quote an identifier (table name, column name, etc.).
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Returns a string literal expression.
    fn string_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Returns an expression testing `value` against a regular expression.
    fn regex_like(&self, value: &str, pattern: &str) -> String;

    /// Returns an expression concatenating the given expressions.
    fn concat(&self, values: &[&str]) -> String {
        values.join(" || ")
    }

    /// Returns the row-limit clause.
    fn limit_clause(&self, limit: u64) -> String {
        format!("LIMIT {limit}")
    }

    /// Returns whether a table exists.
    async fn table_exists(&self, session: &mut dyn Session, table: &str) -> Result<bool>;

    /// Reads the table-level metadata.
    async fn get_table_desc(&self, session: &mut dyn Session, table: &str) -> Result<Desc>;

    /// Reads the columns in declaration order.
    async fn get_columns(&self, session: &mut dyn Session, table: &str) -> Result<Vec<Column>>;

    /// Reads the primary key columns in key order.
    async fn get_primary_keys(
        &self,
        session: &mut dyn Session,
        table: &str,
    ) -> Result<Vec<String>>;

    /// Reads the secondary indexes.
    async fn get_indexes(
        &self,
        session: &mut dyn Session,
        table: &str,
    ) -> Result<Vec<TableIndex>>;

    /// Returns whether an existing table is temporary.
    async fn is_temporary(&self, _session: &mut dyn Session, _table: &str) -> Result<bool> {
        Ok(false)
    }

    /// Loads the live definition of a table, `None` if it does not exist.
    async fn load_table(&self, session: &mut dyn Session, table: &str) -> Result<Option<Table>> {
        if !self.table_exists(session, table).await? {
            return Ok(None);
        }
        let mut result = Table::new(table).with_desc(self.get_table_desc(session, table).await?);
        result.temporary = self.is_temporary(session, table).await?;
        for column in self.get_columns(session, table).await? {
            result.add_column(column)?;
        }
        result.set_primary_key(self.get_primary_keys(session, table).await?)?;
        for index in self.get_indexes(session, table).await? {
            result.add_index(index.name, index.index);
        }
        Ok(Some(result))
    }

    /// Creates a table with its columns, primary key, indexes and metadata.
    async fn create_table(&self, session: &mut dyn Session, table: &Table) -> Result<()>;

    /// Drops a table.
    async fn drop_table(&self, session: &mut dyn Session, table: &str) -> Result<()> {
        let sql = format!("DROP TABLE {}", self.quote_identifier(table));
        session.execute(&sql, &[]).await?;
        Ok(())
    }

    /// Adds a column.
    async fn add_column(
        &self,
        session: &mut dyn Session,
        table: &str,
        column: &Column,
    ) -> Result<()>;

    /// Drops a column.
    async fn drop_column(
        &self,
        session: &mut dyn Session,
        table: &str,
        column: &str,
    ) -> Result<()> {
        let sql = format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote_identifier(table),
            self.quote_identifier(column)
        );
        session.execute(&sql, &[]).await?;
        Ok(())
    }

    /// Changes a column's name, type, size, nullability or metadata.
    async fn alter_column(
        &self,
        session: &mut dyn Session,
        table: &str,
        old: &Column,
        new: &Column,
    ) -> Result<()>;

    /// Adds a primary key over existing columns.
    async fn add_primary_key(
        &self,
        session: &mut dyn Session,
        table: &str,
        columns: &[String],
    ) -> Result<()>;

    /// Drops the primary key.
    async fn drop_primary_key(&self, session: &mut dyn Session, table: &str) -> Result<()>;

    /// Creates an index.
    async fn create_index(
        &self,
        session: &mut dyn Session,
        table: &str,
        name: &str,
        index: &Index,
    ) -> Result<()>;

    /// Drops an index.
    async fn drop_index(&self, session: &mut dyn Session, table: &str, name: &str) -> Result<()>;

    /// Replaces an index definition.
    async fn alter_index(
        &self,
        session: &mut dyn Session,
        table: &str,
        name: &str,
        _old: &Index,
        new: &Index,
    ) -> Result<()> {
        self.drop_index(session, table, name).await?;
        self.create_index(session, table, name, new).await
    }

    /// Replaces the table-level metadata.
    async fn alter_table_desc(
        &self,
        session: &mut dyn Session,
        table: &str,
        desc: &Desc,
    ) -> Result<()>;

    /// Merges a source relation into a table, returning affected rows.
    async fn merge(&self, session: &mut dyn Session, merge: &Merge) -> Result<u64>;
}
