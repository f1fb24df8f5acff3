//! Schema reconciliation.
//!
//! [`plan`] compares a table's live definition with the desired one and
//! returns the ordered list of [`SchemaChange`]s that converges them;
//! [`apply`] issues those changes through a [`Dialect`]. [`reconcile`] does
//! both.
//!
//! Changes are always produced in the same order:
//!
//! 1. drop the primary key, when it changes and the old table has one
//! 2. drop removed columns
//! 3. alter paired columns whose definitions differ (renames included)
//! 4. add new columns, in declared order
//! 5. add the new primary key, when it changed
//! 6. drop, alter, then create indexes, each pass in index-name order
//! 7. replace the table metadata

use std::collections::HashSet;
use std::fmt;

use tracing::{debug, info};

use crate::desc::Desc;
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::schema::{Column, Index, Table};
use crate::session::Session;

/// One DDL step of a reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaChange {
    /// Create the whole table.
    CreateTable(Table),
    /// Drop the primary key.
    DropPrimaryKey,
    /// Drop a column.
    DropColumn(String),
    /// Change a column, possibly renaming it.
    AlterColumn {
        /// Definition in the live table.
        old: Column,
        /// Desired definition.
        new: Column,
    },
    /// Add a column.
    AddColumn(Column),
    /// Add a primary key over the listed columns.
    AddPrimaryKey(Vec<String>),
    /// Drop an index.
    DropIndex(String),
    /// Replace an index definition.
    AlterIndex {
        /// Index name.
        name: String,
        /// Definition in the live table.
        old: Index,
        /// Desired definition.
        new: Index,
    },
    /// Create an index.
    CreateIndex {
        /// Index name.
        name: String,
        /// Desired definition.
        index: Index,
    },
    /// Replace the table metadata.
    AlterTableDesc(Desc),
}

impl fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateTable(table) => write!(f, "create table {}", table.name),
            Self::DropPrimaryKey => write!(f, "drop primary key"),
            Self::DropColumn(name) => write!(f, "drop column {name}"),
            Self::AlterColumn { old, new } if old.name != new.name => {
                write!(f, "alter column {} -> {}", old.name, new.name)
            }
            Self::AlterColumn { new, .. } => write!(f, "alter column {}", new.name),
            Self::AddColumn(column) => write!(f, "add column {}", column.name),
            Self::AddPrimaryKey(columns) => write!(f, "add primary key ({})", columns.join(", ")),
            Self::DropIndex(name) => write!(f, "drop index {name}"),
            Self::AlterIndex { name, .. } => write!(f, "alter index {name}"),
            Self::CreateIndex { name, .. } => write!(f, "create index {name}"),
            Self::AlterTableDesc(_) => write!(f, "alter table desc"),
        }
    }
}

/// Computes the changes turning `old` into `new`.
///
/// `old` is `None` when the table does not exist yet. Two equal tables
/// produce an empty plan.
pub fn plan(old: Option<&Table>, new: &Table) -> Result<Vec<SchemaChange>> {
    if new.name.is_empty() {
        return Err(Error::EmptyTableName);
    }
    let Some(old) = old else {
        return Ok(vec![SchemaChange::CreateTable(new.clone())]);
    };

    let mut changes = Vec::new();

    let pk_changed = primary_key_changed(old, new);
    if pk_changed && old.has_primary_key() {
        changes.push(SchemaChange::DropPrimaryKey);
    }

    let pairs = pair_columns(old, new);
    let paired_old: HashSet<&str> = pairs
        .iter()
        .filter_map(|(o, _)| o.map(|c| c.name.as_str()))
        .collect();

    for column in old.columns() {
        if !paired_old.contains(column.name.as_str()) {
            changes.push(SchemaChange::DropColumn(column.name.clone()));
        }
    }

    for (old_column, new_column) in &pairs {
        if let Some(old_column) = old_column {
            if !old_column.same_definition(new_column) {
                changes.push(SchemaChange::AlterColumn {
                    old: (*old_column).clone(),
                    new: (*new_column).clone(),
                });
            }
        }
    }

    for (old_column, new_column) in &pairs {
        if old_column.is_none() {
            changes.push(SchemaChange::AddColumn((*new_column).clone()));
        }
    }

    if pk_changed && new.has_primary_key() {
        changes.push(SchemaChange::AddPrimaryKey(new.primary_keys().to_vec()));
    }

    for name in old.indexes.keys() {
        if !new.indexes.contains_key(name) {
            changes.push(SchemaChange::DropIndex(name.clone()));
        }
    }
    for (name, old_index) in &old.indexes {
        if let Some(new_index) = new.indexes.get(name) {
            if old_index != new_index {
                changes.push(SchemaChange::AlterIndex {
                    name: name.clone(),
                    old: old_index.clone(),
                    new: new_index.clone(),
                });
            }
        }
    }
    for (name, index) in &new.indexes {
        if !old.indexes.contains_key(name) {
            changes.push(SchemaChange::CreateIndex {
                name: name.clone(),
                index: index.clone(),
            });
        }
    }

    if old.desc != new.desc {
        changes.push(SchemaChange::AlterTableDesc(new.desc.clone()));
    }

    Ok(changes)
}

/// Issues planned changes against `table`, stopping at the first error.
pub async fn apply(
    dialect: &dyn Dialect,
    session: &mut dyn Session,
    table: &str,
    changes: &[SchemaChange],
) -> Result<()> {
    for change in changes {
        debug!(table = %table, change = %change, "Applying schema change");
        match change {
            SchemaChange::CreateTable(t) => dialect.create_table(session, t).await?,
            SchemaChange::DropPrimaryKey => dialect.drop_primary_key(session, table).await?,
            SchemaChange::DropColumn(name) => dialect.drop_column(session, table, name).await?,
            SchemaChange::AlterColumn { old, new } => {
                dialect.alter_column(session, table, old, new).await?;
            }
            SchemaChange::AddColumn(column) => dialect.add_column(session, table, column).await?,
            SchemaChange::AddPrimaryKey(columns) => {
                dialect.add_primary_key(session, table, columns).await?;
            }
            SchemaChange::DropIndex(name) => dialect.drop_index(session, table, name).await?,
            SchemaChange::AlterIndex { name, old, new } => {
                dialect.alter_index(session, table, name, old, new).await?;
            }
            SchemaChange::CreateIndex { name, index } => {
                dialect.create_index(session, table, name, index).await?;
            }
            SchemaChange::AlterTableDesc(desc) => {
                dialect.alter_table_desc(session, table, desc).await?;
            }
        }
    }
    Ok(())
}

/// Plans and applies the changes turning `old` into `new`.
///
/// Returns the applied changes. Nothing is compensated when a change fails;
/// the changes before it stay applied.
pub async fn reconcile(
    dialect: &dyn Dialect,
    session: &mut dyn Session,
    old: Option<&Table>,
    new: &Table,
) -> Result<Vec<SchemaChange>> {
    let changes = plan(old, new)?;
    if changes.is_empty() {
        debug!(table = %new.name, "Schema already up to date");
        return Ok(changes);
    }
    info!(table = %new.name, changes = changes.len(), "Reconciling table");
    apply(dialect, session, &new.name, &changes).await?;
    Ok(changes)
}

fn primary_key_changed(old: &Table, new: &Table) -> bool {
    if old.primary_keys() != new.primary_keys() {
        return true;
    }
    new.primary_keys()
        .iter()
        .any(|name| match (old.get_column(name), new.get_column(name)) {
            (Some(o), Some(n)) => !o.same_key_shape(n),
            _ => true,
        })
}

/// Pairs each new column with the old column it continues, in new declared
/// order. Explicit rename signals are matched before plain names and each
/// old column is used at most once.
fn pair_columns<'a>(old: &'a Table, new: &'a Table) -> Vec<(Option<&'a Column>, &'a Column)> {
    let mut used: HashSet<&str> = HashSet::new();
    let mut pairs: Vec<(Option<&Column>, &Column)> = new.columns().map(|c| (None, c)).collect();

    for (slot, column) in &mut pairs {
        let true_old = column.true_old_name();
        if true_old == column.name {
            continue;
        }
        if let Some(found) = old.get_column(true_old) {
            if used.insert(found.name.as_str()) {
                *slot = Some(found);
            }
        }
    }

    for (slot, column) in &mut pairs {
        if slot.is_some() {
            continue;
        }
        if let Some(found) = old.get_column(&column.name) {
            if used.insert(found.name.as_str()) {
                *slot = Some(found);
            }
        }
    }

    pairs
}
