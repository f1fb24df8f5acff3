//! SQLite dialect.
//!
//! Introspection reads `pragma_table_info`, `pragma_index_list` and
//! `pragma_index_info`. Changes SQLite cannot make in place (column type or
//! nullability, primary key, dropping an indexed column) rebuild the table:
//! a shadow table is created with the target definition, rows are copied,
//! the original is dropped and the shadow renamed over it. Descriptions are
//! kept in the [catalog](crate::catalog).

use async_trait::async_trait;
use oxide_reconcile::desc::Desc;
use oxide_reconcile::dialect::{Dialect, Merge, TableIndex};
use oxide_reconcile::error::{Error, Result};
use oxide_reconcile::schema::{Column, Index, Table};
use oxide_reconcile::session::Session;
use oxide_reconcile::value::Value;
use tracing::{debug, info, warn};

use crate::catalog::{self, ObjectKind};
use crate::types::{cast_target, declared_type, parse_declared_type, zero_literal};

/// Prefix of the shadow table used while rebuilding.
const REBUILD_PREFIX: &str = "__rebuild_";

/// Alias given to the source relation of a merge.
const MERGE_SOURCE: &str = "merge_source";

fn text(value: &str) -> Value {
    Value::String(value.to_string())
}

fn text_at(row: &[Value], idx: usize) -> String {
    match row.get(idx) {
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    }
}

fn flag_at(row: &[Value], idx: usize) -> bool {
    matches!(row.get(idx), Some(Value::Int64(n)) if *n != 0)
}

/// Commits or rolls back a transaction opened by the caller of this helper.
async fn finish<T>(
    session: &mut dyn Session,
    owns_transaction: bool,
    table: &str,
    result: Result<T>,
) -> Result<T> {
    if !owns_transaction {
        return result;
    }
    match result {
        Ok(value) => {
            session.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = session.rollback().await {
                warn!(table = %table, error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}

/// SQLite implementation of [`Dialect`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates the dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn quote_list(&self, names: &[String]) -> String {
        names
            .iter()
            .map(|n| self.quote_identifier(n))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Returns the column definition used in `CREATE TABLE`.
    #[must_use]
    pub fn column_definition(&self, column: &Column) -> String {
        let mut definition = format!(
            "{} {}",
            self.quote_identifier(&column.name),
            declared_type(column)
        );
        if column.not_null {
            definition.push_str(" NOT NULL");
        }
        definition
    }

    /// Returns the `CREATE TABLE` statement for `table` under `name`.
    #[must_use]
    pub fn create_table_sql(&self, name: &str, table: &Table) -> String {
        let mut definitions: Vec<String> = table
            .columns()
            .map(|column| self.column_definition(column))
            .collect();
        if table.has_primary_key() {
            definitions.push(format!("PRIMARY KEY ({})", self.quote_list(table.primary_keys())));
        }
        format!(
            "CREATE {}TABLE {} ({})",
            if table.temporary { "TEMP " } else { "" },
            self.quote_identifier(name),
            definitions.join(", ")
        )
    }

    /// Returns the `CREATE INDEX` statement.
    #[must_use]
    pub fn create_index_sql(&self, table: &str, name: &str, index: &Index) -> String {
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.quote_identifier(name),
            self.quote_identifier(table),
            self.quote_list(&index.columns)
        )
    }

    /// Returns the expression copying `source` into `target` during a
    /// rebuild. Values are cast when the type changes, and NULLs become the
    /// type's zero value when the target rejects them.
    #[must_use]
    pub fn copy_expression(&self, source: &Column, target: &Column) -> String {
        let mut expr = self.quote_identifier(&source.name);
        if source.data_type != target.data_type {
            if let Some(cast) = cast_target(target.data_type) {
                expr = format!("CAST({expr} AS {cast})");
            }
        }
        if target.not_null && !source.not_null {
            expr = format!("COALESCE({expr}, {})", zero_literal(target.data_type));
        }
        expr
    }

    /// Returns the statements of a merge: the upsert, then the delete of
    /// unmatched rows when requested.
    #[must_use]
    pub fn merge_statements(
        &self,
        merge: &Merge,
        columns: &[String],
        keys: &[String],
    ) -> Vec<String> {
        let dest = self.quote_identifier(&merge.dest);
        let source = if merge.source.trim_start().starts_with('(') {
            merge.source.clone()
        } else {
            self.quote_identifier(&merge.source)
        };
        let column_list = self.quote_list(columns);
        let filter = merge.filter.as_deref().map(|f| format!("({f})"));

        let updates: Vec<String> = columns
            .iter()
            .filter(|c| !keys.contains(c))
            .map(|c| {
                let c = self.quote_identifier(c);
                format!("{c} = excluded.{c}")
            })
            .collect();
        let conflict = if merge.update_existing && !updates.is_empty() {
            format!("DO UPDATE SET {}", updates.join(", "))
        } else {
            "DO NOTHING".to_string()
        };

        let select = format!("SELECT {column_list} FROM {source} AS {MERGE_SOURCE}");
        // WHERE is required so SQLite does not read ON CONFLICT as a join
        let condition = filter.as_deref().unwrap_or("true");
        let insert = format!("INSERT INTO {dest} ({column_list}) {select} WHERE {condition}");
        let key_list = self.quote_list(keys);
        let mut statements = vec![format!("{insert} ON CONFLICT ({key_list}) {conflict}")];

        if merge.delete_missing {
            let mut matches: Vec<String> = keys
                .iter()
                .map(|k| {
                    let k = self.quote_identifier(k);
                    format!("{MERGE_SOURCE}.{k} = {dest}.{k}")
                })
                .collect();
            if let Some(filter) = &filter {
                matches.push(filter.clone());
            }
            let unmatched = format!(
                "NOT EXISTS (SELECT 1 FROM {source} AS {MERGE_SOURCE} WHERE {})",
                matches.join(" AND ")
            );
            statements.push(match &filter {
                Some(filter) => format!("DELETE FROM {dest} WHERE {filter} AND {unmatched}"),
                None => format!("DELETE FROM {dest} WHERE {unmatched}"),
            });
        }
        statements
    }

    async fn live_table(&self, session: &mut dyn Session, table: &str) -> Result<Table> {
        self.load_table(session, table)
            .await?
            .ok_or_else(|| Error::TableNotFound(table.to_string()))
    }

    fn identity_copy(&self, table: &Table) -> Vec<String> {
        table
            .column_names()
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect()
    }

    /// Recreates a table with the `target` definition, filling each target
    /// column from the matching expression in `copy`.
    async fn rebuild(
        &self,
        session: &mut dyn Session,
        target: &Table,
        copy: &[String],
    ) -> Result<()> {
        let owns_transaction = !session.in_transaction();
        if owns_transaction {
            session.begin().await?;
        }
        let result = self.rebuild_steps(session, target, copy).await;
        finish(session, owns_transaction, &target.name, result).await
    }

    async fn rebuild_steps(
        &self,
        session: &mut dyn Session,
        target: &Table,
        copy: &[String],
    ) -> Result<()> {
        let name = self.quote_identifier(&target.name);
        let shadow_name = format!("{REBUILD_PREFIX}{}", target.name);
        let shadow = self.quote_identifier(&shadow_name);
        info!(table = %target.name, "Rebuilding table");

        session
            .execute(&format!("DROP TABLE IF EXISTS {shadow}"), &[])
            .await?;
        session
            .execute(&self.create_table_sql(&shadow_name, target), &[])
            .await?;
        let insert = format!(
            "INSERT INTO {shadow} ({}) SELECT {} FROM {name}",
            self.quote_list(target.column_names()),
            copy.join(", ")
        );
        session.execute(&insert, &[]).await?;
        session.execute(&format!("DROP TABLE {name}"), &[]).await?;
        session
            .execute(&format!("ALTER TABLE {shadow} RENAME TO {name}"), &[])
            .await?;
        for (index_name, index) in &target.indexes {
            session
                .execute(&self.create_index_sql(&target.name, index_name, index), &[])
                .await?;
        }
        Ok(())
    }

    async fn write_descs(&self, session: &mut dyn Session, table: &Table) -> Result<()> {
        catalog::write(session, &table.name, ObjectKind::Table, "", &table.desc).await?;
        for column in table.columns() {
            if !column.desc.without_origin_name().is_empty() {
                let name = &column.name;
                catalog::write(session, &table.name, ObjectKind::Column, name, &column.desc).await?;
            }
        }
        for (name, index) in &table.indexes {
            if !index.desc.is_empty() {
                catalog::write(session, &table.name, ObjectKind::Index, name, &index.desc).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder(&self, ordinal: usize) -> String {
        format!("?{ordinal}")
    }

    fn regex_like(&self, value: &str, pattern: &str) -> String {
        format!("{value} REGEXP {pattern}")
    }

    async fn table_exists(&self, session: &mut dyn Session, table: &str) -> Result<bool> {
        let found = session
            .query_one(
                "SELECT COUNT(*) FROM (
                    SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1
                    UNION ALL
                    SELECT name FROM sqlite_temp_master WHERE type = 'table' AND name = ?1
                )",
                &[text(table)],
            )
            .await?;
        Ok(matches!(found, Some(Value::Int64(n)) if n > 0))
    }

    async fn get_table_desc(&self, session: &mut dyn Session, table: &str) -> Result<Desc> {
        catalog::read(session, table, ObjectKind::Table, "").await
    }

    async fn get_columns(&self, session: &mut dyn Session, table: &str) -> Result<Vec<Column>> {
        let rows = session
            .fetch_all(
                r#"SELECT name, type, "notnull" FROM pragma_table_info(?1) ORDER BY cid"#,
                &[text(table)],
            )
            .await?;
        if rows.is_empty() {
            return Err(Error::TableNotFound(table.to_string()));
        }
        let mut descs = catalog::read_all(session, table, ObjectKind::Column).await?;
        rows.iter()
            .map(|row| {
                let (data_type, max_size) = parse_declared_type(&text_at(row, 1))?;
                let mut column = Column::new(text_at(row, 0), data_type).max_size(max_size);
                if flag_at(row, 2) {
                    column = column.not_null();
                }
                if let Some(desc) = descs.remove(&column.name) {
                    column = column.desc(desc);
                }
                Ok(column)
            })
            .collect()
    }

    async fn get_primary_keys(
        &self,
        session: &mut dyn Session,
        table: &str,
    ) -> Result<Vec<String>> {
        let rows = session
            .fetch_all(
                "SELECT name FROM pragma_table_info(?1) WHERE pk > 0 ORDER BY pk",
                &[text(table)],
            )
            .await?;
        Ok(rows.iter().map(|row| text_at(row, 0)).collect())
    }

    async fn get_indexes(
        &self,
        session: &mut dyn Session,
        table: &str,
    ) -> Result<Vec<TableIndex>> {
        // origin 'c' excludes the automatic indexes behind PRIMARY KEY and UNIQUE
        let rows = session
            .fetch_all(
                r#"SELECT name, "unique" FROM pragma_index_list(?1)
                WHERE origin = 'c' ORDER BY name"#,
                &[text(table)],
            )
            .await?;
        let mut descs = catalog::read_all(session, table, ObjectKind::Index).await?;
        let mut indexes = Vec::with_capacity(rows.len());
        for row in &rows {
            let name = text_at(row, 0);
            let members = session
                .fetch_all(
                    "SELECT name FROM pragma_index_info(?1) ORDER BY seqno",
                    &[text(&name)],
                )
                .await?;
            let mut index = Index::new(members.iter().map(|m| text_at(m, 0)));
            if flag_at(row, 1) {
                index = index.unique();
            }
            if let Some(desc) = descs.remove(&name) {
                index = index.desc(desc);
            }
            indexes.push(TableIndex { name, index });
        }
        Ok(indexes)
    }

    async fn is_temporary(&self, session: &mut dyn Session, table: &str) -> Result<bool> {
        let found = session
            .query_one(
                "SELECT COUNT(*) FROM sqlite_temp_master WHERE type = 'table' AND name = ?1",
                &[text(table)],
            )
            .await?;
        Ok(matches!(found, Some(Value::Int64(n)) if n > 0))
    }

    async fn create_table(&self, session: &mut dyn Session, table: &Table) -> Result<()> {
        if table.name.is_empty() {
            return Err(Error::EmptyTableName);
        }
        debug!(table = %table.name, temporary = table.temporary, "Creating table");
        session
            .execute(&self.create_table_sql(&table.name, table), &[])
            .await?;
        for (name, index) in &table.indexes {
            session
                .execute(&self.create_index_sql(&table.name, name, index), &[])
                .await?;
        }
        catalog::drop_table(session, &table.name).await?;
        self.write_descs(session, table).await
    }

    async fn drop_table(&self, session: &mut dyn Session, table: &str) -> Result<()> {
        session
            .execute(&format!("DROP TABLE {}", self.quote_identifier(table)), &[])
            .await?;
        catalog::drop_table(session, table).await
    }

    async fn add_column(
        &self,
        session: &mut dyn Session,
        table: &str,
        column: &Column,
    ) -> Result<()> {
        let mut definition = self.column_definition(column);
        if column.not_null {
            // existing rows need a value
            definition.push_str(" DEFAULT ");
            definition.push_str(zero_literal(column.data_type));
        }
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {definition}",
            self.quote_identifier(table)
        );
        session.execute(&sql, &[]).await?;
        let name = &column.name;
        catalog::write(session, table, ObjectKind::Column, name, &column.desc).await
    }

    async fn drop_column(
        &self,
        session: &mut dyn Session,
        table: &str,
        column: &str,
    ) -> Result<()> {
        let live = self.live_table(session, table).await?;
        let keyed = live.primary_keys().iter().any(|c| c == column)
            || live
                .indexes
                .values()
                .any(|index| index.columns.iter().any(|c| c == column));

        if keyed {
            let mut target = live;
            target.drop_column(column)?;
            let copy = self.identity_copy(&target);
            self.rebuild(session, &target, &copy).await?;
        } else {
            let sql = format!(
                "ALTER TABLE {} DROP COLUMN {}",
                self.quote_identifier(table),
                self.quote_identifier(column)
            );
            session.execute(&sql, &[]).await?;
        }
        catalog::drop_object(session, table, ObjectKind::Column, column).await
    }

    async fn alter_column(
        &self,
        session: &mut dyn Session,
        table: &str,
        old: &Column,
        new: &Column,
    ) -> Result<()> {
        if old.name != new.name {
            let sql = format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                self.quote_identifier(table),
                self.quote_identifier(&old.name),
                self.quote_identifier(&new.name)
            );
            session.execute(&sql, &[]).await?;
            catalog::rename_object(session, table, ObjectKind::Column, &old.name, &new.name).await?;
        }

        if !old.same_key_shape(new) {
            let mut target = self.live_table(session, table).await?;
            let source = target
                .get_column(&new.name)
                .cloned()
                .ok_or_else(|| Error::ColumnNotFound(new.name.clone()))?;
            if let Some(slot) = target.get_column_mut(&new.name) {
                *slot = new.clone();
            }
            let copy: Vec<String> = target
                .columns()
                .map(|c| {
                    if c.name == new.name {
                        self.copy_expression(&source, new)
                    } else {
                        self.quote_identifier(&c.name)
                    }
                })
                .collect();
            self.rebuild(session, &target, &copy).await?;
        }

        if old.desc.without_origin_name() != new.desc.without_origin_name() {
            catalog::write(session, table, ObjectKind::Column, &new.name, &new.desc).await?;
        }
        Ok(())
    }

    async fn add_primary_key(
        &self,
        session: &mut dyn Session,
        table: &str,
        columns: &[String],
    ) -> Result<()> {
        let mut target = self.live_table(session, table).await?;
        target.set_primary_key(columns.iter().cloned())?;
        let copy = self.identity_copy(&target);
        self.rebuild(session, &target, &copy).await
    }

    async fn drop_primary_key(&self, session: &mut dyn Session, table: &str) -> Result<()> {
        let mut target = self.live_table(session, table).await?;
        target.set_primary_key(Vec::<String>::new())?;
        let copy = self.identity_copy(&target);
        self.rebuild(session, &target, &copy).await
    }

    async fn create_index(
        &self,
        session: &mut dyn Session,
        table: &str,
        name: &str,
        index: &Index,
    ) -> Result<()> {
        session
            .execute(&self.create_index_sql(table, name, index), &[])
            .await?;
        catalog::write(session, table, ObjectKind::Index, name, &index.desc).await
    }

    async fn drop_index(&self, session: &mut dyn Session, table: &str, name: &str) -> Result<()> {
        session
            .execute(
                &format!("DROP INDEX IF EXISTS {}", self.quote_identifier(name)),
                &[],
            )
            .await?;
        catalog::drop_object(session, table, ObjectKind::Index, name).await
    }

    async fn alter_index(
        &self,
        session: &mut dyn Session,
        table: &str,
        name: &str,
        old: &Index,
        new: &Index,
    ) -> Result<()> {
        if old.columns == new.columns && old.unique == new.unique {
            return catalog::write(session, table, ObjectKind::Index, name, &new.desc).await;
        }
        self.drop_index(session, table, name).await?;
        self.create_index(session, table, name, new).await
    }

    async fn alter_table_desc(
        &self,
        session: &mut dyn Session,
        table: &str,
        desc: &Desc,
    ) -> Result<()> {
        catalog::write(session, table, ObjectKind::Table, "", desc).await
    }

    async fn merge(&self, session: &mut dyn Session, merge: &Merge) -> Result<u64> {
        let columns = if merge.columns.is_empty() {
            self.get_columns(session, &merge.dest)
                .await?
                .into_iter()
                .map(|c| c.name)
                .collect()
        } else {
            merge.columns.clone()
        };
        let keys = if merge.key_columns.is_empty() {
            self.get_primary_keys(session, &merge.dest).await?
        } else {
            merge.key_columns.clone()
        };
        if keys.is_empty() {
            return Err(Error::MissingPrimaryKey(merge.dest.clone()));
        }

        let statements = self.merge_statements(merge, &columns, &keys);
        let owns_transaction = !session.in_transaction();
        if owns_transaction {
            session.begin().await?;
        }
        let mut result = Ok(0);
        for sql in &statements {
            match session.execute(sql, &[]).await {
                Ok(affected) => result = result.map(|total| total + affected),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        let affected = finish(session, owns_transaction, &merge.dest, result).await?;
        debug!(
            dest = %merge.dest,
            statements = statements.len(),
            affected,
            "Merge statements done"
        );
        Ok(affected)
    }
}
