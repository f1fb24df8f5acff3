//! Ordered list of column names.

use serde::{Deserialize, Serialize};

/// Declaration order of a table's columns.
///
/// Kept separately from the column set so that insertions, removals,
/// renames and bulk reorders touch only the names they concern.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnOrder {
    names: Vec<String>,
}

impl ColumnOrder {
    /// Creates an empty order.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the names in order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Returns the position of a name.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Appends a name at the end.
    pub fn push(&mut self, name: impl Into<String>) {
        self.names.push(name.into());
    }

    /// Inserts `name` before `before`.
    ///
    /// `None` inserts at the front; an unknown `before` appends.
    pub fn insert(&mut self, before: Option<&str>, name: impl Into<String>) {
        let name = name.into();
        match before {
            None => self.names.insert(0, name),
            Some(before) => match self.position(before) {
                Some(idx) => self.names.insert(idx, name),
                None => self.names.push(name),
            },
        }
    }

    /// Removes a name; unknown names are ignored.
    pub fn delete(&mut self, name: &str) {
        if let Some(idx) = self.position(name) {
            self.names.remove(idx);
        }
    }

    /// Renames an entry in place.
    pub fn rename(&mut self, old: &str, new: impl Into<String>) {
        if let Some(idx) = self.position(old) {
            self.names[idx] = new.into();
        }
    }

    /// Applies a new order.
    ///
    /// Names missing from `new_order` are kept, re-inserted right after the
    /// name that preceded them before (or at the front if they were first).
    pub fn reorder<S: AsRef<str>>(&mut self, new_order: &[S]) {
        let mut result = Self {
            names: new_order.iter().map(|s| s.as_ref().to_string()).collect(),
        };
        for (i, name) in self.names.iter().enumerate() {
            if result.position(name).is_some() {
                continue;
            }
            if i == 0 {
                result.insert(None, name.clone());
            } else {
                let prev = &self.names[i - 1];
                match result.position(prev) {
                    Some(idx) => result.names.insert(idx + 1, name.clone()),
                    None => result.names.push(name.clone()),
                }
            }
        }
        *self = result;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(names: &[&str]) -> ColumnOrder {
        let mut order = ColumnOrder::new();
        for n in names {
            order.push(*n);
        }
        order
    }

    #[test]
    fn test_insert_before() {
        let mut o = order(&["a", "c"]);
        o.insert(Some("c"), "b");
        o.insert(None, "first");
        o.insert(Some("missing"), "last");
        assert_eq!(o.names(), ["first", "a", "b", "c", "last"]);
    }

    #[test]
    fn test_delete_and_rename() {
        let mut o = order(&["a", "b", "c"]);
        o.delete("b");
        o.delete("zzz");
        o.rename("c", "d");
        assert_eq!(o.names(), ["a", "d"]);
    }

    #[test]
    fn test_reorder_keeps_unlisted_names_next_to_predecessor() {
        let mut o = order(&["id", "name", "email", "age"]);
        o.reorder(&["age", "id"]);
        assert_eq!(o.names(), ["age", "id", "name", "email"]);

        let mut o = order(&["id", "name"]);
        o.reorder(&["name"]);
        assert_eq!(o.names(), ["id", "name"]);
    }
}
