//! Value and row conversions for [`rusqlite`].

use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};

use crate::row::Row;
use crate::value::Value;

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Bool(b) => ToSqlOutput::from(*b),
            Value::Integer(i) => ToSqlOutput::from(*i),
            Value::Real(f) => ToSqlOutput::from(*f),
            Value::Text(s) => ToSqlOutput::from(s.as_str()),
            Value::Blob(b) => ToSqlOutput::from(b.as_slice()),
            // SQLite has no JSON storage class; documents are stored as text.
            Value::Json(json) => ToSqlOutput::from(json.to_string()),
        })
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
        }
    }
}

impl Row {
    /// Reads every column of a rusqlite row. `columns` are the statement's
    /// column names, in order.
    pub fn from_rusqlite(columns: &[String], row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
        let mut out = Row::with_capacity(columns.len());
        for (index, name) in columns.iter().enumerate() {
            out.insert(name.clone(), Value::from(row.get_ref(index)?));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_rows_in_column_order() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let mut stmt = conn
            .prepare("select ?1 as b, ?2 as a, ?3 as n")
            .unwrap();
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let params: [&dyn ToSql; 3] = [&Value::from("x"), &Value::from(2), &Value::Null];
        let row = stmt
            .query_row(&params[..], |row| Row::from_rusqlite(&columns, row))
            .unwrap();
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["b", "a", "n"]);
        assert_eq!(row.get("a"), Some(&Value::Integer(2)));
        assert_eq!(row.get("n"), Some(&Value::Null));
    }
}
