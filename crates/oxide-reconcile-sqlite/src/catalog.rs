//! Description catalog.
//!
//! SQLite has no comment storage, so table, column and index descriptions
//! live in a side table keyed by table name, object kind and object name.
//! The catalog is created on the first non-empty write. Reads against a
//! database without one return empty descriptions.

use std::collections::HashMap;

use oxide_reconcile::desc::Desc;
use oxide_reconcile::error::Result;
use oxide_reconcile::session::Session;
use oxide_reconcile::value::Value;
use tracing::debug;

/// Name of the catalog table.
pub const CATALOG_TABLE: &str = "__table_desc";

const CREATE_CATALOG: &str = r#"CREATE TABLE IF NOT EXISTS "__table_desc" (
    table_name TEXT NOT NULL,
    object_kind TEXT NOT NULL,
    object_name TEXT NOT NULL,
    description TEXT NOT NULL,
    PRIMARY KEY (table_name, object_kind, object_name)
)"#;

/// Kind of object a description belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// The table itself; its object name is empty.
    Table,
    /// A column of the table.
    Column,
    /// A secondary index of the table.
    Index,
}

impl ObjectKind {
    /// Returns the stored kind name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Column => "column",
            Self::Index => "index",
        }
    }
}

fn text(value: &str) -> Value {
    Value::String(value.to_string())
}

/// Returns whether the catalog table exists.
pub async fn exists(session: &mut dyn Session) -> Result<bool> {
    let found = session
        .query_one(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            &[text(CATALOG_TABLE)],
        )
        .await?;
    Ok(matches!(found, Some(Value::Int64(n)) if n > 0))
}

/// Creates the catalog table if it is missing.
pub async fn ensure(session: &mut dyn Session) -> Result<()> {
    session.execute(CREATE_CATALOG, &[]).await?;
    Ok(())
}

/// Reads one description; missing entries are empty.
pub async fn read(
    session: &mut dyn Session,
    table: &str,
    kind: ObjectKind,
    object: &str,
) -> Result<Desc> {
    if !exists(session).await? {
        return Ok(Desc::new());
    }
    let stored = session
        .query_one(
            r#"SELECT description FROM "__table_desc"
               WHERE table_name = ?1 AND object_kind = ?2 AND object_name = ?3"#,
            &[text(table), text(kind.as_str()), text(object)],
        )
        .await?;
    match stored {
        Some(Value::String(json)) => Desc::parse(&json),
        _ => Ok(Desc::new()),
    }
}

/// Reads every description of one kind for a table, keyed by object name.
pub async fn read_all(
    session: &mut dyn Session,
    table: &str,
    kind: ObjectKind,
) -> Result<HashMap<String, Desc>> {
    let mut descs = HashMap::new();
    if !exists(session).await? {
        return Ok(descs);
    }
    let rows = session
        .fetch_all(
            r#"SELECT object_name, description FROM "__table_desc"
               WHERE table_name = ?1 AND object_kind = ?2"#,
            &[text(table), text(kind.as_str())],
        )
        .await?;
    for row in rows {
        if let (Some(Value::String(name)), Some(Value::String(json))) = (row.first(), row.get(1)) {
            descs.insert(name.clone(), Desc::parse(json)?);
        }
    }
    Ok(descs)
}

/// Stores a description. The rename signal is never stored, and an empty
/// description removes the entry.
pub async fn write(
    session: &mut dyn Session,
    table: &str,
    kind: ObjectKind,
    object: &str,
    desc: &Desc,
) -> Result<()> {
    let desc = desc.without_origin_name();
    if desc.is_empty() {
        return drop_object(session, table, kind, object).await;
    }
    ensure(session).await?;
    debug!(table = %table, kind = kind.as_str(), object = %object, "Writing description");
    session
        .execute(
            r#"INSERT INTO "__table_desc" (table_name, object_kind, object_name, description)
               VALUES (?1, ?2, ?3, ?4)
               ON CONFLICT (table_name, object_kind, object_name)
               DO UPDATE SET description = excluded.description"#,
            &[
                text(table),
                text(kind.as_str()),
                text(object),
                Value::String(desc.to_json_string()),
            ],
        )
        .await?;
    Ok(())
}

/// Moves a description to a new object name.
pub async fn rename_object(
    session: &mut dyn Session,
    table: &str,
    kind: ObjectKind,
    old: &str,
    new: &str,
) -> Result<()> {
    if !exists(session).await? {
        return Ok(());
    }
    drop_object(session, table, kind, new).await?;
    session
        .execute(
            r#"UPDATE "__table_desc" SET object_name = ?4
               WHERE table_name = ?1 AND object_kind = ?2 AND object_name = ?3"#,
            &[text(table), text(kind.as_str()), text(old), text(new)],
        )
        .await?;
    Ok(())
}

/// Removes one description.
pub async fn drop_object(
    session: &mut dyn Session,
    table: &str,
    kind: ObjectKind,
    object: &str,
) -> Result<()> {
    if !exists(session).await? {
        return Ok(());
    }
    session
        .execute(
            r#"DELETE FROM "__table_desc"
               WHERE table_name = ?1 AND object_kind = ?2 AND object_name = ?3"#,
            &[text(table), text(kind.as_str()), text(object)],
        )
        .await?;
    Ok(())
}

/// Removes every description of a table.
pub async fn drop_table(session: &mut dyn Session, table: &str) -> Result<()> {
    if !exists(session).await? {
        return Ok(());
    }
    session
        .execute(
            r#"DELETE FROM "__table_desc" WHERE table_name = ?1"#,
            &[text(table)],
        )
        .await?;
    Ok(())
}
