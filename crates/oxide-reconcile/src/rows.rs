//! Change-tracked, in-memory row store.
//!
//! A [`DataTable`] pairs a [`Table`] schema with rows whose lifecycle is
//! tracked so that the pending changes can be flushed as DML:
//!
//! - `add_values` creates an [`RowState::Inserted`] row
//! - the first mutation of an unchanged row makes it [`RowState::Updated`]
//!   and keeps a snapshot of the values it had before
//! - `delete_row` moves the row to the deleted set, keeping its original values
//!
//! `accept_change` makes the current state the new baseline.

use crate::error::{Error, Result};
use crate::schema::{Column, Table};
use crate::value::Value;

/// Lifecycle state of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowState {
    /// Matches the last accepted baseline.
    Unchanged,
    /// Added since the last baseline.
    Inserted,
    /// Modified since the last baseline.
    Updated,
    /// Removed since the last baseline.
    Deleted,
}

/// A row and its change-tracking state.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    state: RowState,
    values: Vec<Value>,
    original: Option<Vec<Value>>,
}

impl Row {
    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> RowState {
        self.state
    }

    /// Returns the current values, in column order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Returns the values as of the last baseline.
    ///
    /// For rows never modified this is the current data.
    #[must_use]
    pub fn original(&self) -> &[Value] {
        self.original.as_deref().unwrap_or(&self.values)
    }

    /// Gets a current value by position.
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }
}

/// Partition of a table's pending changes.
#[derive(Debug, Clone, Default)]
pub struct Changeset<'a> {
    /// Rows added since the last baseline.
    pub inserted: Vec<&'a Row>,
    /// Rows modified since the last baseline.
    pub updated: Vec<&'a Row>,
    /// Rows removed since the last baseline.
    pub deleted: Vec<&'a Row>,
}

impl Changeset<'_> {
    /// Returns the total number of changed rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }

    /// Returns whether there is nothing to flush.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }
}

/// A table schema together with its change-tracked rows.
#[derive(Debug, Clone, PartialEq)]
pub struct DataTable {
    schema: Table,
    rows: Vec<Row>,
    deleted: Vec<Row>,
}

impl DataTable {
    /// Creates an empty row store for a schema.
    #[must_use]
    pub fn new(schema: Table) -> Self {
        Self {
            schema,
            rows: Vec::new(),
            deleted: Vec::new(),
        }
    }

    /// Returns the schema.
    #[must_use]
    pub fn schema(&self) -> &Table {
        &self.schema
    }

    /// Returns the table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.schema.name
    }

    /// Consumes the store and returns its schema.
    #[must_use]
    pub fn into_schema(self) -> Table {
        self.schema
    }

    /// Appends a column; existing rows get NULL in it.
    pub fn add_column(&mut self, column: Column) -> Result<()> {
        self.schema.add_column(column)?;
        for row in self.rows.iter_mut().chain(self.deleted.iter_mut()) {
            row.values.push(Value::Null);
            if let Some(original) = row.original.as_mut() {
                original.push(Value::Null);
            }
        }
        Ok(())
    }

    /// Returns the live (non-deleted) rows.
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Returns a live row by position.
    #[must_use]
    pub fn row(&self, idx: usize) -> Option<&Row> {
        self.rows.get(idx)
    }

    /// Returns the number of live rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Returns whether there are no live rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Gets a value by row position and column name.
    pub fn value(&self, row: usize, column: &str) -> Result<&Value> {
        let col = self.column_position(column)?;
        let row = self.rows.get(row).ok_or(Error::RowOutOfRange(row))?;
        Ok(&row.values[col])
    }

    /// Appends a new row, tracked as inserted. Returns its position.
    pub fn add_values(&mut self, values: Vec<Value>) -> Result<usize> {
        if values.len() != self.schema.column_count() {
            return Err(Error::ColumnCountMismatch {
                expected: self.schema.column_count(),
                actual: values.len(),
            });
        }
        for (column, value) in self.schema.columns().zip(&values) {
            check_value(column, value)?;
        }
        self.rows.push(Row {
            state: RowState::Inserted,
            values,
            original: None,
        });
        Ok(self.rows.len() - 1)
    }

    /// Sets a value by column name.
    pub fn set_value(&mut self, row: usize, column: &str, value: Value) -> Result<()> {
        let col = self.column_position(column)?;
        self.set_value_at(row, col, value)
    }

    /// Sets a value by column position.
    ///
    /// The first mutation of an unchanged row snapshots its values; later
    /// mutations keep that snapshot.
    pub fn set_value_at(&mut self, row: usize, col: usize, value: Value) -> Result<()> {
        let column = self.schema.column_at(col).ok_or_else(|| {
            Error::ColumnNotFound(format!("#{col}"))
        })?;
        check_value(column, &value)?;
        let target = self.rows.get_mut(row).ok_or(Error::RowOutOfRange(row))?;
        if target.state == RowState::Unchanged {
            target.original = Some(target.values.clone());
            target.state = RowState::Updated;
        }
        target.values[col] = value;
        Ok(())
    }

    /// Deletes a live row.
    ///
    /// Inserted rows are discarded; others move to the deleted set with
    /// their original values retained for key binding.
    pub fn delete_row(&mut self, row: usize) -> Result<()> {
        if row >= self.rows.len() {
            return Err(Error::RowOutOfRange(row));
        }
        let mut removed = self.rows.remove(row);
        if removed.state == RowState::Inserted {
            return Ok(());
        }
        if removed.original.is_none() {
            removed.original = Some(removed.values.clone());
        }
        removed.state = RowState::Deleted;
        self.deleted.push(removed);
        Ok(())
    }

    /// Returns the pending changes.
    #[must_use]
    pub fn get_change(&self) -> Changeset<'_> {
        let mut change = Changeset {
            deleted: self.deleted.iter().collect(),
            ..Changeset::default()
        };
        for row in &self.rows {
            match row.state {
                RowState::Inserted => change.inserted.push(row),
                RowState::Updated => change.updated.push(row),
                RowState::Unchanged | RowState::Deleted => {}
            }
        }
        change
    }

    /// Makes the current rows the new baseline.
    pub fn accept_change(&mut self) {
        self.deleted.clear();
        for row in &mut self.rows {
            row.state = RowState::Unchanged;
            row.original = None;
        }
    }

    /// Reverts every pending change back to the last baseline.
    ///
    /// Inserted rows are removed, updated rows get their snapshot back and
    /// deleted rows are appended to the live rows again.
    pub fn reject_change(&mut self) {
        self.rows.retain(|row| row.state != RowState::Inserted);
        let restored = self.deleted.drain(..);
        self.rows.extend(restored);
        for row in &mut self.rows {
            if let Some(original) = row.original.take() {
                row.values = original;
            }
            row.state = RowState::Unchanged;
        }
    }

    /// Removes every row, live and deleted.
    pub fn clear(&mut self) {
        self.rows.clear();
        self.deleted.clear();
    }

    fn column_position(&self, column: &str) -> Result<usize> {
        self.schema
            .column_index(column)
            .ok_or_else(|| Error::ColumnNotFound(column.to_string()))
    }
}

fn check_value(column: &Column, value: &Value) -> Result<()> {
    match value.column_type() {
        None if column.not_null => Err(Error::NullValue(column.name.clone())),
        Some(found) if found != column.data_type => Err(Error::TypeMismatch {
            column: column.name.clone(),
            expected: column.data_type,
            found,
        }),
        _ => Ok(()),
    }
}
