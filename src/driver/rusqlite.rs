//! Synchronous SQLite driver using [`rusqlite`].

use relq_core::{Dialect, DriverError, Row, Value};
use rusqlite::{Connection, params_from_iter};

use super::Driver;

pub struct RusqliteDriver {
    conn: Connection,
}

impl RusqliteDriver {
    /// Opens a database file, or an in-memory database for `:memory:`.
    pub fn open(path: &str) -> Result<Self, DriverError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        Ok(Self { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    #[inline]
    pub fn inner(&self) -> &Connection {
        &self.conn
    }
}

impl Driver for RusqliteDriver {
    fn dialect(&self) -> Dialect {
        Dialect::SQLite
    }

    fn execute(&mut self, sql: &str, bindings: &[Value]) -> Result<u64, DriverError> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let affected = stmt.execute(params_from_iter(bindings.iter()))?;
        Ok(affected as u64)
    }

    fn query(&mut self, sql: &str, bindings: &[Value]) -> Result<Vec<Row>, DriverError> {
        let mut out = Vec::new();
        self.query_each(sql, bindings, &mut |row| {
            out.push(row);
            true
        })?;
        Ok(out)
    }

    fn query_each(
        &mut self,
        sql: &str,
        bindings: &[Value],
        each: &mut dyn FnMut(Row) -> bool,
    ) -> Result<(), DriverError> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query(params_from_iter(bindings.iter()))?;
        while let Some(row) = rows.next()? {
            if !each(Row::from_rusqlite(&columns, row)?) {
                break;
            }
        }
        Ok(())
    }

    fn batch(&mut self, sql: &str) -> Result<(), DriverError> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn last_insert_id(&mut self) -> Option<i64> {
        Some(self.conn.last_insert_rowid())
    }
}
