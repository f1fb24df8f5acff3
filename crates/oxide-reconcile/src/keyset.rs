//! Keyset (seek) pagination.
//!
//! A page is selected by comparing the sort keys against the last row seen
//! on the previous page instead of skipping rows with an offset:
//!
//! ```text
//! k1 > v1 OR (k1 = v1 AND (k2 > v2 OR (k2 = v2 AND k3 > v3)))
//! ```
//!
//! `>` becomes `<` for descending keys. Primary key columns missing from
//! the sort list are appended ascending so the ordering is total.

use std::collections::HashMap;
use std::fmt;

use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::rows::DataTable;
use crate::value::Value;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

impl SortOrder {
    fn comparison(self) -> &'static str {
        match self {
            Self::Asc => ">",
            Self::Desc => "<",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asc => write!(f, "ASC"),
            Self::Desc => write!(f, "DESC"),
        }
    }
}

/// A column and its sort direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    /// Column name.
    pub column: String,
    /// Direction.
    pub order: SortOrder,
}

impl SortKey {
    /// Creates an ascending key.
    #[must_use]
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            order: SortOrder::Asc,
        }
    }

    /// Creates a descending key.
    #[must_use]
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            order: SortOrder::Desc,
        }
    }

    /// Parses `"column"`, `"column ASC"` or `"column DESC"`.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        match text.rsplit_once(char::is_whitespace) {
            Some((column, dir)) if dir.eq_ignore_ascii_case("desc") => {
                Self::desc(column.trim_end())
            }
            Some((column, dir)) if dir.eq_ignore_ascii_case("asc") => {
                Self::asc(column.trim_end())
            }
            _ => Self::asc(text),
        }
    }
}

/// Relation a page is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A table, quoted with the dialect's identifier rules.
    Table(String),
    /// An arbitrary query.
    Query(String),
}

/// A statement and its parameters in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    /// Statement text.
    pub sql: String,
    /// Bound parameters.
    pub params: Vec<Value>,
}

/// Builder for one keyset page.
#[derive(Debug, Clone, PartialEq)]
pub struct KeysetQuery {
    source: Source,
    columns: Vec<String>,
    order_by: Vec<SortKey>,
    primary_key: Vec<String>,
    after: Option<HashMap<String, Value>>,
    filter: Option<String>,
    limit: u64,
    first_placeholder: usize,
}

impl KeysetQuery {
    /// Pages over a table.
    #[must_use]
    pub fn table(name: impl Into<String>) -> Self {
        Self::new(Source::Table(name.into()))
    }

    /// Pages over the rows of a query.
    #[must_use]
    pub fn subquery(sql: impl Into<String>) -> Self {
        Self::new(Source::Query(sql.into()))
    }

    fn new(source: Source) -> Self {
        Self {
            source,
            columns: Vec::new(),
            order_by: Vec::new(),
            primary_key: Vec::new(),
            after: None,
            filter: None,
            limit: 0,
            first_placeholder: 1,
        }
    }

    /// Selects the listed columns instead of `*`.
    #[must_use]
    pub fn select<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Appends a sort key.
    #[must_use]
    pub fn order_by(mut self, key: SortKey) -> Self {
        self.order_by.push(key);
        self
    }

    /// Sets the primary key used to make the ordering total.
    #[must_use]
    pub fn primary_key<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Starts the page after the row holding these values. An empty map
    /// reads the first page.
    #[must_use]
    pub fn after(mut self, last_seen: HashMap<String, Value>) -> Self {
        self.after = Some(last_seen);
        self
    }

    /// Adds a predicate over column names.
    #[must_use]
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Sets the page size, 0 for unbounded.
    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the ordinal of the first placeholder.
    #[must_use]
    pub fn first_placeholder(mut self, ordinal: usize) -> Self {
        self.first_placeholder = ordinal;
        self
    }

    /// Returns the effective sort keys, primary key completion included.
    #[must_use]
    pub fn sort_keys(&self) -> Vec<SortKey> {
        let mut keys = self.order_by.clone();
        for pk in &self.primary_key {
            if !keys.iter().any(|k| &k.column == pk) {
                keys.push(SortKey::asc(pk.clone()));
            }
        }
        keys
    }

    /// Returns the sort key values of the last row of `page`, to continue
    /// with [`KeysetQuery::after`]. `None` for an empty page or when a sort
    /// key is not one of the page's columns.
    #[must_use]
    pub fn last_seen(&self, page: &DataTable) -> Option<HashMap<String, Value>> {
        let row = page.rows().last()?;
        self.sort_keys()
            .into_iter()
            .map(|key| {
                let value = row.get(page.schema().column_index(&key.column)?)?.clone();
                Some((key.column, value))
            })
            .collect()
    }

    /// Renders the statement for a dialect.
    pub fn build(&self, dialect: &dyn Dialect) -> Result<BuiltQuery> {
        let keys = self.sort_keys();
        let mut params = Vec::new();

        let select = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns
                .iter()
                .map(|c| dialect.quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", ")
        };
        // both sources are read as a derived table so filters see one shape
        let source = match &self.source {
            Source::Table(name) => format!("SELECT * FROM {}", dialect.quote_identifier(name)),
            Source::Query(sql) => sql.clone(),
        };
        let mut sql = format!("SELECT {select} FROM ({source}) AS page");

        let mut conditions = Vec::new();
        if let Some(after) = self.after.as_ref().filter(|after| !after.is_empty()) {
            if keys.is_empty() {
                return Err(Error::EmptyOrderBy);
            }
            let mut ordinal = self.first_placeholder;
            let predicate = seek_predicate(dialect, &keys, after, &mut ordinal, &mut params)?;
            conditions.push(format!("({predicate})"));
        }
        if let Some(filter) = &self.filter {
            conditions.push(format!("({filter})"));
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        if !keys.is_empty() {
            let order: Vec<String> = keys
                .iter()
                .map(|k| format!("{} {}", dialect.quote_identifier(&k.column), k.order))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&order.join(", "));
        }
        if self.limit > 0 {
            sql.push(' ');
            sql.push_str(&dialect.limit_clause(self.limit));
        }

        Ok(BuiltQuery { sql, params })
    }
}

fn seek_predicate(
    dialect: &dyn Dialect,
    keys: &[SortKey],
    after: &HashMap<String, Value>,
    ordinal: &mut usize,
    params: &mut Vec<Value>,
) -> Result<String> {
    let Some((key, rest)) = keys.split_first() else {
        return Err(Error::EmptyOrderBy);
    };
    let value = after
        .get(&key.column)
        .ok_or_else(|| Error::MissingKeyValue(key.column.clone()))?;
    let column = dialect.quote_identifier(&key.column);

    let mut bind = |params: &mut Vec<Value>| {
        params.push(value.clone());
        let token = dialect.placeholder(*ordinal);
        *ordinal += 1;
        token
    };

    let head = format!("{column} {} {}", key.order.comparison(), bind(params));
    if rest.is_empty() {
        return Ok(head);
    }
    let equal = format!("{column} = {}", bind(params));
    let tail = seek_predicate(dialect, rest, after, ordinal, params)?;
    let tail = if rest.len() > 1 {
        format!("({tail})")
    } else {
        tail
    };
    Ok(format!("{head} OR ({equal} AND {tail})"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingDialect;

    fn last_seen(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_parse_sort_key() {
        assert_eq!(SortKey::parse("name DESC"), SortKey::desc("name"));
        assert_eq!(SortKey::parse("  name  asc "), SortKey::asc("name"));
        assert_eq!(SortKey::parse("id"), SortKey::asc("id"));
    }

    #[test]
    fn test_single_key_seek() {
        let query = KeysetQuery::table("people")
            .order_by(SortKey::asc("id"))
            .after(last_seen(&[("id", Value::Int64(5))]))
            .limit(10)
            .build(&RecordingDialect::new())
            .unwrap();
        assert_eq!(
            query.sql,
            concat!(
                r#"SELECT * FROM (SELECT * FROM "people") AS page "#,
                r#"WHERE ("id" > ?1) ORDER BY "id" ASC LIMIT 10"#
            )
        );
        assert_eq!(query.params, vec![Value::Int64(5)]);
    }

    #[test]
    fn test_two_key_seek() {
        let query = KeysetQuery::table("people")
            .order_by(SortKey::asc("id"))
            .order_by(SortKey::desc("name"))
            .after(last_seen(&[("id", Value::Int64(5)), ("name", "b".into())]))
            .build(&RecordingDialect::new())
            .unwrap();
        assert_eq!(
            query.sql,
            concat!(
                r#"SELECT * FROM (SELECT * FROM "people") AS page "#,
                r#"WHERE ("id" > ?1 OR ("id" = ?2 AND "name" < ?3)) "#,
                r#"ORDER BY "id" ASC, "name" DESC"#
            )
        );
        assert_eq!(
            query.params,
            vec![Value::Int64(5), Value::Int64(5), Value::from("b")]
        );
    }

    #[test]
    fn test_primary_key_completes_ordering() {
        let query = KeysetQuery::subquery("SELECT * FROM people WHERE age > 20")
            .select(["id", "name"])
            .order_by(SortKey::desc("name"))
            .primary_key(["id"])
            .after(last_seen(&[("id", Value::Int64(7)), ("name", "m".into())]))
            .filter("name <> ''")
            .first_placeholder(3)
            .limit(50)
            .build(&RecordingDialect::new())
            .unwrap();
        assert_eq!(
            query.sql,
            concat!(
                r#"SELECT "id", "name" FROM (SELECT * FROM people WHERE age > 20) AS page "#,
                r#"WHERE ("name" < ?3 OR ("name" = ?4 AND "id" > ?5)) AND (name <> '') "#,
                r#"ORDER BY "name" DESC, "id" ASC LIMIT 50"#
            )
        );
        assert_eq!(query.params.len(), 3);
    }

    #[test]
    fn test_three_keys_nest() {
        let query = KeysetQuery::table("t")
            .order_by(SortKey::asc("a"))
            .order_by(SortKey::asc("b"))
            .order_by(SortKey::desc("c"))
            .after(last_seen(&[
                ("a", Value::Int64(1)),
                ("b", Value::Int64(2)),
                ("c", Value::Int64(3)),
            ]))
            .build(&RecordingDialect::new())
            .unwrap();
        assert!(query.sql.contains(
            r#"("a" > ?1 OR ("a" = ?2 AND ("b" > ?3 OR ("b" = ?4 AND "c" < ?5))))"#
        ));
        assert_eq!(query.params.len(), 5);
    }

    #[test]
    fn test_first_page_has_no_seek() {
        let query = KeysetQuery::table("people")
            .primary_key(["id"])
            .limit(2)
            .build(&RecordingDialect::new())
            .unwrap();
        assert_eq!(
            query.sql,
            r#"SELECT * FROM (SELECT * FROM "people") AS page ORDER BY "id" ASC LIMIT 2"#
        );
        assert!(query.params.is_empty());
    }

    #[test]
    fn test_empty_last_seen_reads_first_page() {
        let query = KeysetQuery::table("p")
            .order_by(SortKey::asc("id"))
            .after(HashMap::new())
            .build(&RecordingDialect::new())
            .unwrap();
        assert_eq!(
            query.sql,
            r#"SELECT * FROM (SELECT * FROM "p") AS page ORDER BY "id" ASC"#
        );
        assert!(query.params.is_empty());

        let unordered = KeysetQuery::table("p")
            .after(HashMap::new())
            .build(&RecordingDialect::new())
            .unwrap();
        assert_eq!(
            unordered.sql,
            r#"SELECT * FROM (SELECT * FROM "p") AS page"#
        );
    }

    #[test]
    fn test_seek_errors() {
        let dialect = RecordingDialect::new();
        let missing = KeysetQuery::table("people")
            .order_by(SortKey::asc("id"))
            .order_by(SortKey::asc("name"))
            .after(last_seen(&[("id", Value::Int64(1))]))
            .build(&dialect);
        assert!(matches!(missing, Err(Error::MissingKeyValue(c)) if c == "name"));

        let unordered = KeysetQuery::table("people")
            .after(last_seen(&[("id", Value::Int64(1))]))
            .build(&dialect);
        assert!(matches!(unordered, Err(Error::EmptyOrderBy)));
    }
}
