//! Synchronous PostgreSQL driver using [`postgres`].
//!
//! Connections are opened without TLS.

use postgres::fallible_iterator::FallibleIterator;
use postgres::types::ToSql;
use postgres::{Client, NoTls};
use relq_core::{Dialect, DriverError, Row, Value};

use super::Driver;

pub struct PostgresDriver {
    client: Client,
}

fn params(bindings: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    bindings.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

impl PostgresDriver {
    /// Connects with a `host=... dbname=...` string or a `postgres://` URL.
    pub fn connect(dsn: &str) -> Result<Self, DriverError> {
        Ok(Self {
            client: Client::connect(dsn, NoTls)?,
        })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    #[inline]
    pub fn inner(&mut self) -> &mut Client {
        &mut self.client
    }
}

impl Driver for PostgresDriver {
    fn dialect(&self) -> Dialect {
        Dialect::PostgreSQL
    }

    fn execute(&mut self, sql: &str, bindings: &[Value]) -> Result<u64, DriverError> {
        Ok(self.client.execute(sql, &params(bindings))?)
    }

    fn query(&mut self, sql: &str, bindings: &[Value]) -> Result<Vec<Row>, DriverError> {
        let rows = self.client.query(sql, &params(bindings))?;
        rows.iter()
            .map(|row| Row::from_postgres(row).map_err(DriverError::from))
            .collect()
    }

    fn query_each(
        &mut self,
        sql: &str,
        bindings: &[Value],
        each: &mut dyn FnMut(Row) -> bool,
    ) -> Result<(), DriverError> {
        let params = params(bindings);
        let mut rows = self.client.query_raw(sql, params.iter().copied())?;
        while let Some(row) = rows.next()? {
            if !each(Row::from_postgres(&row)?) {
                break;
            }
        }
        Ok(())
    }

    fn batch(&mut self, sql: &str) -> Result<(), DriverError> {
        self.client.batch_execute(sql)?;
        Ok(())
    }
}
