//! Native database handles.
//!
//! A [`Driver`] wraps exactly one native handle and speaks plain rows; the
//! [`Connector`] builds a fresh one from configuration, which is how a
//! [`Connection`](crate::Connection) reconnects.

#[cfg(feature = "postgres-sync")]
pub mod postgres;
#[cfg(feature = "rusqlite")]
pub mod rusqlite;

use relq_core::{Dialect, DriverError, Row, Value};

use crate::config::ConnectionConfig;

/// One open native handle.
///
/// Every call blocks until the database answers.
pub trait Driver {
    fn dialect(&self) -> Dialect;

    /// Runs a statement and returns the number of affected rows.
    fn execute(&mut self, sql: &str, bindings: &[Value]) -> Result<u64, DriverError>;

    /// Runs a statement and buffers every returned row.
    fn query(&mut self, sql: &str, bindings: &[Value]) -> Result<Vec<Row>, DriverError>;

    /// Runs a statement and hands rows to `each` as the native cursor yields
    /// them, stopping early when it returns `false`.
    fn query_each(
        &mut self,
        sql: &str,
        bindings: &[Value],
        each: &mut dyn FnMut(Row) -> bool,
    ) -> Result<(), DriverError> {
        for row in self.query(sql, bindings)? {
            if !each(row) {
                break;
            }
        }
        Ok(())
    }

    /// Runs parameterless statements such as `BEGIN` or `SAVEPOINT trans_2`.
    fn batch(&mut self, sql: &str) -> Result<(), DriverError>;

    fn last_insert_id(&mut self) -> Option<i64> {
        None
    }
}

/// Builds drivers from configuration.
pub trait Connector {
    fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Driver>, DriverError>;
}

impl<F> Connector for F
where
    F: Fn(&ConnectionConfig) -> Result<Box<dyn Driver>, DriverError>,
{
    fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Driver>, DriverError> {
        self(config)
    }
}

/// Connector for the drivers compiled into this crate.
///
/// MySQL has no bundled driver; plug one in through a custom [`Connector`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeConnector;

impl Connector for NativeConnector {
    fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Driver>, DriverError> {
        match config.dialect() {
            #[cfg(feature = "rusqlite")]
            Dialect::SQLite => Ok(Box::new(rusqlite::RusqliteDriver::open(&config.dsn())?)),
            #[cfg(feature = "postgres-sync")]
            Dialect::PostgreSQL => Ok(Box::new(postgres::PostgresDriver::connect(&config.dsn())?)),
            dialect => Err(DriverError::new(format!(
                "no native driver compiled in for {dialect}"
            ))),
        }
    }
}
