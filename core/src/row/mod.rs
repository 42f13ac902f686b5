//! Result rows: an ordered mapping from column name to [`Value`].

#[cfg(feature = "postgres-sync")]
mod postgres;
#[cfg(feature = "rusqlite")]
mod rusqlite;

use crate::value::Value;

/// One result row, columns kept in the order the driver produced them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    entries: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Sets a column, replacing the value in place if the column exists.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(name, _)| *name == column) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        let index = self.entries.iter().position(|(name, _)| name == column)?;
        Some(self.entries.remove(index).1)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Moves every column starting with `prefix` into a new row, stripping the prefix.
    pub fn split_prefixed(&mut self, prefix: &str) -> Row {
        let mut taken = Row::new();
        self.entries.retain(|(name, value)| match name.strip_prefix(prefix) {
            Some(rest) => {
                taken.entries.push((rest.to_string(), value.clone()));
                false
            }
            None => true,
        });
        taken
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (column, value) in iter {
            row.insert(column, value);
        }
        row
    }
}

impl IntoIterator for Row {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_in_place() {
        let mut row: Row = [("id", Value::from(1)), ("name", Value::from("a"))]
            .into_iter()
            .collect();
        row.insert("id", 2);
        assert_eq!(row.columns().collect::<Vec<_>>(), ["id", "name"]);
        assert_eq!(row.get("id"), Some(&Value::Integer(2)));
    }

    #[test]
    fn split_prefixed_moves_columns() {
        let mut row: Row = [
            ("id", Value::from(1)),
            ("pivot_user_id", Value::from(3)),
            ("pivot_role_id", Value::from(1)),
        ]
        .into_iter()
        .collect();
        let pivot = row.split_prefixed("pivot_");
        assert_eq!(row.len(), 1);
        assert_eq!(pivot.get("user_id"), Some(&Value::Integer(3)));
    }
}
