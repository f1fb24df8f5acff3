//! Streaming reads into a row store.
//!
//! [`StepTable`] owns a cursor and refills the same [`DataTable`] with the
//! next batch of rows on every [`StepTable::step`]. One row is read ahead to
//! tell whether another batch exists; that row is kept for the next step.

use tracing::debug;

use crate::error::{Error, Result};
use crate::rows::DataTable;
use crate::schema::{Column, Table};
use crate::session::Cursor;
use crate::value::{ColumnType, Value};

/// Batched reader over a cursor.
///
/// Dropping a `StepTable` drops its cursor and with it the underlying
/// result; [`StepTable::close`] releases it explicitly.
pub struct StepTable {
    cursor: Box<dyn Cursor>,
    table: DataTable,
    step: usize,
    mapping: Vec<usize>,
    pending: Option<Vec<Value>>,
    exhausted: bool,
}

impl StepTable {
    /// Creates a reader filling a store for `schema`, `step` rows at a time
    /// (0 reads everything in one step).
    ///
    /// Every cursor column must match a declared column by name.
    pub fn new(cursor: Box<dyn Cursor>, schema: Table, step: usize) -> Result<Self> {
        let mapping = column_mapping(cursor.columns(), &schema)?;
        Ok(Self {
            cursor,
            table: DataTable::new(schema),
            step,
            mapping,
            pending: None,
            exhausted: false,
        })
    }

    /// Replaces the store contents with the next batch.
    ///
    /// Returns the store and whether the cursor has no further row. The
    /// returned rows are accepted, so they carry no pending changes.
    pub async fn step(&mut self) -> Result<(&DataTable, bool)> {
        self.table.clear();
        if self.exhausted {
            return Ok((&self.table, true));
        }

        let mut read = 0;
        while self.step == 0 || read < self.step {
            let raw = match self.pending.take() {
                Some(row) => row,
                None => match self.cursor.next_row().await? {
                    Some(row) => row,
                    None => {
                        self.exhausted = true;
                        break;
                    }
                },
            };
            let values = convert_row(self.table.schema(), &self.mapping, raw)?;
            self.table.add_values(values)?;
            read += 1;
        }

        if !self.exhausted {
            self.pending = self.cursor.next_row().await?;
            self.exhausted = self.pending.is_none();
        }
        self.table.accept_change();
        debug!(table = %self.table.name(), rows = read, exhausted = self.exhausted, "Read step");
        Ok((&self.table, self.exhausted))
    }

    /// Returns the current batch.
    #[must_use]
    pub fn table(&self) -> &DataTable {
        &self.table
    }

    /// Returns whether the cursor has been read to the end.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Releases the cursor.
    pub async fn close(mut self) -> Result<()> {
        self.cursor.close().await
    }
}

impl std::fmt::Debug for StepTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepTable")
            .field("table", &self.table.name())
            .field("step", &self.step)
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

/// Maps each cursor column to the position of the declared column with the
/// same name.
pub fn column_mapping(columns: &[String], schema: &Table) -> Result<Vec<usize>> {
    if columns.len() != schema.column_count() {
        return Err(Error::ColumnCountMismatch {
            expected: schema.column_count(),
            actual: columns.len(),
        });
    }
    columns
        .iter()
        .map(|name| {
            schema
                .column_index(name)
                .ok_or_else(|| Error::ColumnNotFound(name.clone()))
        })
        .collect()
}

fn convert_row(schema: &Table, mapping: &[usize], raw: Vec<Value>) -> Result<Vec<Value>> {
    if raw.len() != mapping.len() {
        return Err(Error::ColumnCountMismatch {
            expected: mapping.len(),
            actual: raw.len(),
        });
    }
    let mut values = vec![Value::Null; schema.column_count()];
    for (value, &target) in raw.into_iter().zip(mapping) {
        let column = schema
            .column_at(target)
            .ok_or_else(|| Error::ColumnNotFound(format!("#{target}")))?;
        values[target] = value.coerce(column.data_type).map_err(|message| Error::Conversion {
            column: column.name.clone(),
            message,
        })?;
    }
    Ok(values)
}

/// Reads every remaining row of `cursor` into `table`, returning the number
/// of rows read. The store's changeset is accepted afterwards.
pub async fn fill_table(cursor: &mut dyn Cursor, table: &mut DataTable) -> Result<usize> {
    let mapping = column_mapping(cursor.columns(), table.schema())?;
    let mut read = 0;
    while let Some(raw) = cursor.next_row().await? {
        let values = convert_row(table.schema(), &mapping, raw)?;
        table.add_values(values)?;
        read += 1;
    }
    table.accept_change();
    Ok(read)
}

/// Reads every row of `cursor` into a new store named `name` whose columns
/// are derived from the cursor's columns and the first row's values.
pub async fn read_all(cursor: &mut dyn Cursor, name: &str) -> Result<DataTable> {
    let first = cursor.next_row().await?;
    let mut schema = Table::new(name);
    for (idx, column) in cursor.columns().iter().enumerate() {
        let sample = first
            .as_ref()
            .and_then(|row| row.get(idx))
            .unwrap_or(&Value::Null);
        schema.add_column(auto_column(column, sample))?;
    }

    let mut table = DataTable::new(schema);
    let mapping: Vec<usize> = (0..table.schema().column_count()).collect();
    if let Some(raw) = first {
        let values = convert_row(table.schema(), &mapping, raw)?;
        table.add_values(values)?;
        while let Some(raw) = cursor.next_row().await? {
            let values = convert_row(table.schema(), &mapping, raw)?;
            table.add_values(values)?;
        }
    }
    table.accept_change();
    Ok(table)
}

/// Derives a nullable column from a sample value. NULL samples give text.
#[must_use]
pub fn auto_column(name: &str, sample: &Value) -> Column {
    let data_type = sample.column_type().unwrap_or(ColumnType::String);
    Column::new(name, data_type)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::testing::VecCursor;

    fn schema() -> Table {
        Table::new("people")
            .column(Column::new("id", ColumnType::Int64).not_null())
            .column(Column::new("name", ColumnType::String))
            .column(Column::new("active", ColumnType::Bool))
            .primary_key(["id"])
    }

    fn rows(n: i64) -> Vec<Vec<Value>> {
        (1..=n)
            .map(|i| vec![Value::Int64(i), format!("p{i}").into(), Value::Int64(i % 2)])
            .collect()
    }

    fn ids(table: &DataTable) -> Vec<Value> {
        table.rows().iter().map(|r| r.values()[0].clone()).collect()
    }

    #[tokio::test]
    async fn test_step_reads_batches_without_skipping() {
        let cursor = VecCursor::new(["id", "name", "active"], rows(5));
        let mut reader = StepTable::new(Box::new(cursor), schema(), 2).unwrap();

        let (table, done) = reader.step().await.unwrap();
        assert_eq!(ids(table), [Value::Int64(1), Value::Int64(2)]);
        assert!(!done);
        assert!(table.get_change().is_empty());

        let (table, done) = reader.step().await.unwrap();
        assert_eq!(ids(table), [Value::Int64(3), Value::Int64(4)]);
        assert!(!done);

        let (table, done) = reader.step().await.unwrap();
        assert_eq!(ids(table), [Value::Int64(5)]);
        assert!(done);

        let (table, done) = reader.step().await.unwrap();
        assert!(table.is_empty());
        assert!(done);
    }

    #[tokio::test]
    async fn test_step_exact_multiple_reports_exhaustion() {
        let cursor = VecCursor::new(["id", "name", "active"], rows(4));
        let mut reader = StepTable::new(Box::new(cursor), schema(), 2).unwrap();
        assert!(!reader.step().await.unwrap().1);
        let (table, done) = reader.step().await.unwrap();
        assert_eq!(table.row_count(), 2);
        assert!(done);
    }

    #[tokio::test]
    async fn test_unbounded_step_and_coercion() {
        let rows = vec![
            vec!["x".into(), Value::Int64(1), Value::Int64(9)],
            vec![Value::Null, Value::Int64(0), Value::Int64(10)],
        ];
        let cursor = VecCursor::new(["name", "active", "id"], rows);
        let mut reader = StepTable::new(Box::new(cursor), schema(), 0).unwrap();
        let (table, done) = reader.step().await.unwrap();
        assert!(done);
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.value(0, "active").unwrap(), &Value::Bool(true));
        assert_eq!(table.value(1, "id").unwrap(), &Value::Int64(10));
    }

    #[test]
    fn test_column_mapping_mismatch() {
        let cursor = VecCursor::new(["id", "name"], Vec::new());
        let result = StepTable::new(Box::new(cursor), schema(), 1);
        assert!(matches!(
            result,
            Err(Error::ColumnCountMismatch {
                expected: 3,
                actual: 2,
            })
        ));

        let cursor = VecCursor::new(["id", "name", "enabled"], Vec::new());
        let result = StepTable::new(Box::new(cursor), schema(), 1);
        assert!(matches!(result, Err(Error::ColumnNotFound(c)) if c == "enabled"));
    }

    #[tokio::test]
    async fn test_conversion_error_names_column() {
        let rows = vec![vec!["abc".into(), Value::Null, Value::Null]];
        let cursor = VecCursor::new(["id", "name", "active"], rows);
        let mut reader = StepTable::new(Box::new(cursor), schema(), 1).unwrap();
        let result = reader.step().await;
        assert!(matches!(result, Err(Error::Conversion { column, .. }) if column == "id"));
    }

    #[tokio::test]
    async fn test_close_releases_cursor_once() {
        let cursor = VecCursor::new(["id", "name", "active"], rows(3));
        let closes = cursor.close_counter();
        let mut reader = StepTable::new(Box::new(cursor), schema(), 1).unwrap();
        reader.step().await.unwrap();
        reader.close().await.unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fill_table_reads_everything() {
        let mut cursor = VecCursor::new(["id", "name", "active"], rows(3));
        let mut table = DataTable::new(schema());
        assert_eq!(fill_table(&mut cursor, &mut table).await.unwrap(), 3);
        assert_eq!(table.row_count(), 3);
        assert!(table.get_change().is_empty());
    }

    #[tokio::test]
    async fn test_read_all_derives_columns() {
        let rows = vec![
            vec![
                Value::Int64(1),
                Value::Null,
                Value::Float64(1.5),
                Value::Bytes(vec![1]),
            ],
            vec![Value::Int64(2), "two".into(), Value::Int64(3), Value::Null],
        ];
        let mut cursor = VecCursor::new(["id", "label", "score", "raw"], rows);
        let table = read_all(&mut cursor, "result").await.unwrap();
        let types: Vec<ColumnType> = table.schema().columns().map(|c| c.data_type).collect();
        assert_eq!(
            types,
            [
                ColumnType::Int64,
                ColumnType::String,
                ColumnType::Float64,
                ColumnType::Bytes,
            ]
        );
        assert_eq!(table.value(1, "score").unwrap(), &Value::Float64(3.0));
        assert_eq!(table.name(), "result");
    }
}
