//! Schema representation types.
//!
//! A [`Table`] describes what a table looks like, either as observed in a
//! live database or as desired by the caller. Reconciliation diffs two of
//! them; the row store uses one to validate and bind values.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::desc::Desc;
use crate::error::{Error, Result};
use crate::order::ColumnOrder;
use crate::value::ColumnType;

/// Schema definition for a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Logical data type.
    pub data_type: ColumnType,
    /// Maximum size, 0 for unbounded.
    pub max_size: usize,
    /// Whether NULL is rejected.
    pub not_null: bool,
    /// Descriptive metadata.
    pub desc: Desc,
}

impl Column {
    /// Creates a nullable, unbounded column.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            data_type,
            max_size: 0,
            not_null: false,
            desc: Desc::new(),
        }
    }

    /// Sets the maximum size.
    #[must_use]
    pub fn max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Sets the column as NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Sets the descriptive metadata.
    #[must_use]
    pub fn desc(mut self, desc: Desc) -> Self {
        self.desc = desc;
        self
    }

    /// Marks this column as the renamed successor of `old_name`.
    #[must_use]
    pub fn renamed_from(mut self, old_name: impl Into<String>) -> Self {
        self.desc = self.desc.with_origin_name(old_name);
        self
    }

    /// Returns the previous name carried in the metadata, if any.
    #[must_use]
    pub fn origin_name(&self) -> Option<&str> {
        self.desc.origin_name()
    }

    /// Returns the name this column had in the old schema.
    #[must_use]
    pub fn true_old_name(&self) -> &str {
        match self.origin_name() {
            Some(origin) if origin != self.name => origin,
            _ => &self.name,
        }
    }

    /// Returns whether the column has the same definition, ignoring the
    /// rename signal.
    #[must_use]
    pub fn same_definition(&self, other: &Self) -> bool {
        self.name == other.name
            && self.same_key_shape(other)
            && self.desc.without_origin_name() == other.desc.without_origin_name()
    }

    /// Returns whether type, size and nullability match.
    #[must_use]
    pub fn same_key_shape(&self, other: &Self) -> bool {
        self.data_type == other.data_type
            && self.max_size == other.max_size
            && self.not_null == other.not_null
    }
}

/// Schema definition for an index.
///
/// Equality is structural: member columns (in order), uniqueness and
/// metadata must all match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Member columns, in order.
    pub columns: Vec<String>,
    /// Whether this is a unique index.
    pub unique: bool,
    /// Descriptive metadata.
    pub desc: Desc,
}

impl Index {
    /// Creates a non-unique index over the given columns.
    #[must_use]
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
            desc: Desc::new(),
        }
    }

    /// Sets the index as unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets the descriptive metadata.
    #[must_use]
    pub fn desc(mut self, desc: Desc) -> Self {
        self.desc = desc;
        self
    }
}

/// Complete schema definition for a table.
///
/// Columns live in a name-keyed set kept in sync with a [`ColumnOrder`].
/// Cloning deep-copies columns, indexes and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Table name.
    pub name: String,
    columns: HashMap<String, Column>,
    order: ColumnOrder,
    primary_key: Vec<String>,
    /// Index definitions keyed by index name.
    pub indexes: BTreeMap<String, Index>,
    /// Table-level metadata.
    pub desc: Desc,
    /// Whether the table is temporary.
    #[serde(skip)]
    pub temporary: bool,
}

impl Table {
    /// Creates an empty table schema.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: HashMap::new(),
            order: ColumnOrder::new(),
            primary_key: Vec::new(),
            indexes: BTreeMap::new(),
            desc: Desc::new(),
            temporary: false,
        }
    }

    /// Adds a column, builder style. A duplicate name replaces the earlier
    /// definition in place.
    #[must_use]
    pub fn column(mut self, column: Column) -> Self {
        if self.columns.contains_key(&column.name) {
            self.columns.insert(column.name.clone(), column);
        } else {
            self.order.push(column.name.clone());
            self.columns.insert(column.name.clone(), column);
        }
        self
    }

    /// Sets the primary key columns, builder style.
    #[must_use]
    pub fn primary_key<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Adds an index, builder style.
    #[must_use]
    pub fn index(mut self, name: impl Into<String>, index: Index) -> Self {
        self.indexes.insert(name.into(), index);
        self
    }

    /// Sets the table metadata, builder style.
    #[must_use]
    pub fn with_desc(mut self, desc: Desc) -> Self {
        self.desc = desc;
        self
    }

    /// Marks the table as temporary, builder style.
    #[must_use]
    pub fn temporary(mut self) -> Self {
        self.temporary = true;
        self
    }

    /// Appends a column.
    pub fn add_column(&mut self, column: Column) -> Result<()> {
        self.insert_column(None, column)
    }

    /// Inserts a column before `before`, or appends when `before` is `None`.
    pub fn insert_column(&mut self, before: Option<&str>, column: Column) -> Result<()> {
        if self.columns.contains_key(&column.name) {
            return Err(Error::DuplicateColumn(column.name));
        }
        match before {
            Some(before) => {
                if !self.columns.contains_key(before) {
                    return Err(Error::ColumnNotFound(before.to_string()));
                }
                self.order.insert(Some(before), column.name.clone());
            }
            None => self.order.push(column.name.clone()),
        }
        self.columns.insert(column.name.clone(), column);
        Ok(())
    }

    /// Removes a column, returning it.
    ///
    /// The column is also removed from the primary key and from every index
    /// that lists it; indexes left without members are dropped.
    pub fn drop_column(&mut self, name: &str) -> Result<Column> {
        let column = self
            .columns
            .remove(name)
            .ok_or_else(|| Error::ColumnNotFound(name.to_string()))?;
        self.order.delete(name);
        self.primary_key.retain(|c| c != name);
        for index in self.indexes.values_mut() {
            index.columns.retain(|c| c != name);
        }
        self.indexes.retain(|_, index| !index.columns.is_empty());
        Ok(column)
    }

    /// Renames a column in place.
    ///
    /// The rename signal is recorded on the column unless one is already
    /// present, so reconciling the result renames instead of drop + add.
    /// Primary key and index member names follow the rename.
    pub fn rename_column(&mut self, old: &str, new: &str) -> Result<()> {
        if old == new {
            return Ok(());
        }
        if self.columns.contains_key(new) {
            return Err(Error::DuplicateColumn(new.to_string()));
        }
        let mut column = self
            .columns
            .remove(old)
            .ok_or_else(|| Error::ColumnNotFound(old.to_string()))?;
        if column.origin_name().is_none() {
            column.desc = column.desc.with_origin_name(old);
        }
        column.name = new.to_string();
        self.columns.insert(new.to_string(), column);
        self.order.rename(old, new);
        for pk in &mut self.primary_key {
            if pk == old {
                *pk = new.to_string();
            }
        }
        for index in self.indexes.values_mut() {
            for member in &mut index.columns {
                if member == old {
                    *member = new.to_string();
                }
            }
        }
        Ok(())
    }

    /// Reorders columns; unlisted columns stay next to their predecessor.
    pub fn reorder_columns<S: AsRef<str>>(&mut self, new_order: &[S]) -> Result<()> {
        for name in new_order {
            if !self.columns.contains_key(name.as_ref()) {
                return Err(Error::ColumnNotFound(name.as_ref().to_string()));
            }
        }
        self.order.reorder(new_order);
        Ok(())
    }

    /// Replaces the primary key; every member must be an existing column.
    pub fn set_primary_key<S: Into<String>>(
        &mut self,
        columns: impl IntoIterator<Item = S>,
    ) -> Result<()> {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if let Some(missing) = columns.iter().find(|c| !self.columns.contains_key(*c)) {
            return Err(Error::ColumnNotFound(missing.clone()));
        }
        self.primary_key = columns;
        Ok(())
    }

    /// Returns the primary key columns, in key order.
    #[must_use]
    pub fn primary_keys(&self) -> &[String] {
        &self.primary_key
    }

    /// Returns whether the table has a primary key.
    #[must_use]
    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Adds or replaces an index.
    pub fn add_index(&mut self, name: impl Into<String>, index: Index) {
        self.indexes.insert(name.into(), index);
    }

    /// Removes an index.
    pub fn remove_index(&mut self, name: &str) -> Option<Index> {
        self.indexes.remove(name)
    }

    /// Gets a column by name.
    #[must_use]
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Gets a mutable column by name. The name itself must be changed
    /// through [`Table::rename_column`].
    #[must_use]
    pub fn get_column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.get_mut(name)
    }

    /// Returns the column at a position.
    #[must_use]
    pub fn column_at(&self, idx: usize) -> Option<&Column> {
        self.order
            .names()
            .get(idx)
            .and_then(|n| self.columns.get(n))
    }

    /// Returns the position of a column.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.order.position(name)
    }

    /// Returns column names in declaration order.
    #[must_use]
    pub fn column_names(&self) -> &[String] {
        self.order.names()
    }

    /// Iterates over columns in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.order
            .names()
            .iter()
            .filter_map(|n| self.columns.get(n))
    }

    /// Returns the number of columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Returns the positions of the primary key columns, in key order.
    pub fn primary_key_indexes(&self) -> Result<Vec<usize>> {
        self.primary_key
            .iter()
            .map(|pk| {
                self.column_index(pk)
                    .ok_or_else(|| Error::ColumnNotFound(pk.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Table {
        Table::new("users")
            .column(Column::new("id", ColumnType::Int64).not_null())
            .column(Column::new("name", ColumnType::String).max_size(10))
            .column(Column::new("email", ColumnType::String))
            .primary_key(["id"])
            .index("idx_users_name", Index::new(["name", "email"]))
    }

    #[test]
    fn test_table_builder() {
        let table = users();
        assert_eq!(table.name, "users");
        assert_eq!(table.column_names(), ["id", "name", "email"]);
        assert_eq!(table.primary_keys(), ["id"]);
        assert_eq!(table.column_at(1).unwrap().max_size, 10);
        assert_eq!(table.column_index("email"), Some(2));
    }

    #[test]
    fn test_insert_and_drop_column() {
        let mut table = users();
        table
            .insert_column(Some("email"), Column::new("age", ColumnType::Int64))
            .unwrap();
        assert_eq!(table.column_names(), ["id", "name", "age", "email"]);
        assert!(matches!(
            table.add_column(Column::new("age", ColumnType::Int64)),
            Err(Error::DuplicateColumn(_))
        ));

        table.drop_column("email").unwrap();
        assert_eq!(table.column_names(), ["id", "name", "age"]);
        assert_eq!(table.indexes["idx_users_name"].columns, ["name"]);
        assert!(matches!(table.drop_column("email"), Err(Error::ColumnNotFound(_))));
    }

    #[test]
    fn test_rename_column_records_origin() {
        let mut table = users();
        table.rename_column("name", "full_name").unwrap();
        let column = table.get_column("full_name").unwrap();
        assert_eq!(column.origin_name(), Some("name"));
        assert_eq!(column.true_old_name(), "name");
        assert_eq!(table.column_names(), ["id", "full_name", "email"]);
        assert_eq!(
            table.indexes["idx_users_name"].columns,
            ["full_name", "email"]
        );

        table.rename_column("full_name", "display_name").unwrap();
        assert_eq!(
            table.get_column("display_name").unwrap().origin_name(),
            Some("name")
        );
    }

    #[test]
    fn test_clone_is_independent() {
        let original = users();
        let mut copy = original.clone();
        copy.get_column_mut("name").unwrap().max_size = 99;
        copy.indexes.get_mut("idx_users_name").unwrap().unique = true;
        copy.desc.insert("label", "Users");
        assert_eq!(original.get_column("name").unwrap().max_size, 10);
        assert!(!original.indexes["idx_users_name"].unique);
        assert!(original.desc.is_empty());
    }

    #[test]
    fn test_index_equality_is_structural() {
        let a = Index::new(["a", "b"]).unique();
        assert_eq!(a, Index::new(["a", "b"]).unique());
        assert_ne!(a, Index::new(["b", "a"]).unique());
        assert_ne!(a, Index::new(["a", "b"]));
        let desc = Desc::new().with("k", 1);
        assert_ne!(a, Index::new(["a", "b"]).unique().desc(desc));
    }

    #[test]
    fn test_set_primary_key_validates_columns() {
        let mut table = users();
        assert!(table.set_primary_key(["id", "missing"]).is_err());
        table.set_primary_key(["email", "id"]).unwrap();
        assert_eq!(table.primary_key_indexes().unwrap(), vec![2, 0]);
    }

    #[test]
    fn test_same_definition_ignores_origin_name() {
        let a = Column::new("full_name", ColumnType::String).max_size(20);
        let b = a.clone().renamed_from("name");
        assert!(a.same_definition(&b));
        assert!(!a.same_definition(&b.clone().max_size(30)));
    }
}
