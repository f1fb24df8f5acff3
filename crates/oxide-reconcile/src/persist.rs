//! Flushing a row store's pending changes as DML.
//!
//! Deletes run first, then updates, then inserts. Each class with at least
//! one row is prepared once and executed per row. Deletes and updates are
//! keyed by the primary key bound to the row's original values, so a row
//! whose key was edited still finds its stored counterpart.

use tracing::{debug, info, warn};

use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::rows::{Changeset, DataTable};
use crate::schema::Table;
use crate::session::Session;
use crate::value::Value;

/// Writes the pending changes of `table`, returning the affected row count.
///
/// A transaction is opened when the session has none and is committed on
/// success or rolled back on the first error. Inside a caller's transaction
/// nothing is committed or rolled back here. The changeset is left as is;
/// call [`DataTable::accept_change`] once the write is known to be durable.
pub async fn save_changes(
    dialect: &dyn Dialect,
    session: &mut dyn Session,
    table: &DataTable,
) -> Result<u64> {
    let change = table.get_change();
    if change.is_empty() {
        return Ok(0);
    }
    let schema = table.schema();
    if (!change.deleted.is_empty() || !change.updated.is_empty()) && !schema.has_primary_key() {
        return Err(Error::MissingPrimaryKey(schema.name.clone()));
    }

    let owns_transaction = !session.in_transaction();
    if owns_transaction {
        session.begin().await?;
    }

    let result = flush(dialect, session, schema, &change).await;
    if !owns_transaction {
        return result;
    }

    match result {
        Ok(affected) => {
            session.commit().await?;
            info!(
                table = %schema.name,
                inserted = change.inserted.len(),
                updated = change.updated.len(),
                deleted = change.deleted.len(),
                affected,
                "Saved changes"
            );
            Ok(affected)
        }
        Err(e) => {
            if let Err(rollback) = session.rollback().await {
                warn!(table = %schema.name, error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}

async fn flush(
    dialect: &dyn Dialect,
    session: &mut dyn Session,
    schema: &Table,
    change: &Changeset<'_>,
) -> Result<u64> {
    let keys = schema.primary_key_indexes()?;
    let mut affected = 0;

    if !change.deleted.is_empty() {
        let sql = delete_sql(dialect, schema);
        debug!(table = %schema.name, rows = change.deleted.len(), sql = %sql, "Deleting rows");
        let statement = session.prepare(&sql).await?;
        for row in &change.deleted {
            let params = key_values(row.original(), &keys);
            affected += session.execute_prepared(&statement, &params).await?;
        }
    }

    if !change.updated.is_empty() {
        let sql = update_sql(dialect, schema);
        debug!(table = %schema.name, rows = change.updated.len(), sql = %sql, "Updating rows");
        let statement = session.prepare(&sql).await?;
        for row in &change.updated {
            let mut params = row.values().to_vec();
            params.extend(key_values(row.original(), &keys));
            affected += session.execute_prepared(&statement, &params).await?;
        }
    }

    if !change.inserted.is_empty() {
        let sql = insert_sql(dialect, schema);
        debug!(table = %schema.name, rows = change.inserted.len(), sql = %sql, "Inserting rows");
        let statement = session.prepare(&sql).await?;
        for row in &change.inserted {
            session.execute_prepared(&statement, row.values()).await?;
            affected += 1;
        }
    }

    Ok(affected)
}

fn key_values(values: &[Value], keys: &[usize]) -> Vec<Value> {
    keys.iter().map(|&k| values[k].clone()).collect()
}

fn key_predicate(dialect: &dyn Dialect, schema: &Table, first: usize) -> String {
    schema
        .primary_keys()
        .iter()
        .enumerate()
        .map(|(i, key)| {
            format!(
                "{} = {}",
                dialect.quote_identifier(key),
                dialect.placeholder(first + i)
            )
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Generates the keyed DELETE statement for a table.
pub fn delete_sql(dialect: &dyn Dialect, schema: &Table) -> String {
    format!(
        "DELETE FROM {} WHERE {}",
        dialect.quote_identifier(&schema.name),
        key_predicate(dialect, schema, 1)
    )
}

/// Generates the keyed UPDATE statement setting every column.
pub fn update_sql(dialect: &dyn Dialect, schema: &Table) -> String {
    let assignments: Vec<String> = schema
        .column_names()
        .iter()
        .enumerate()
        .map(|(i, name)| {
            format!(
                "{} = {}",
                dialect.quote_identifier(name),
                dialect.placeholder(i + 1)
            )
        })
        .collect();
    format!(
        "UPDATE {} SET {} WHERE {}",
        dialect.quote_identifier(&schema.name),
        assignments.join(", "),
        key_predicate(dialect, schema, schema.column_count() + 1)
    )
}

/// Generates the INSERT statement listing every column.
pub fn insert_sql(dialect: &dyn Dialect, schema: &Table) -> String {
    let columns: Vec<String> = schema
        .column_names()
        .iter()
        .map(|name| dialect.quote_identifier(name))
        .collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| dialect.placeholder(i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        dialect.quote_identifier(&schema.name),
        columns.join(", "),
        placeholders.join(", ")
    )
}
