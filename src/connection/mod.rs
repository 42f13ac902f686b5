//! Logical database connections.
//!
//! A [`Connection`] owns one native handle, runs statements with a single
//! reconnect-and-retry when the handle turns out to be dead, and tracks the
//! nested transaction state (see the `transaction` module).

mod lost;
mod manager;
mod transaction;

pub use lost::{caused_by_concurrency_error, caused_by_lost_connection};
pub use manager::ConnectionManager;

use std::rc::Rc;
use std::time::Instant;

use relq_core::{
    Dialect, DriverError, Executor, QueryBuilder, RelqError, Result, Row, Value,
    relq_trace_query, relq_trace_reconnect,
};

use crate::config::ConnectionConfig;
use crate::driver::{Connector, Driver};

/// One executed statement, as reported to listeners and the query log.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryExecuted {
    pub connection: String,
    pub sql: String,
    pub bindings: Vec<Value>,
    pub elapsed_ms: f64,
}

type Listener = Box<dyn FnMut(&QueryExecuted)>;

pub struct Connection {
    name: String,
    config: ConnectionConfig,
    dialect: Dialect,
    connector: Rc<dyn Connector>,
    driver: Option<Box<dyn Driver>>,
    transactions: u32,
    savepoints: Vec<String>,
    release_savepoints: bool,
    listeners: Vec<Listener>,
    query_log: Option<Vec<QueryExecuted>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("dialect", &self.dialect)
            .field("connected", &self.driver.is_some())
            .field("transactions", &self.transactions)
            .finish()
    }
}

impl Connection {
    /// Opens a connection through `connector`.
    pub fn open(
        name: impl Into<String>,
        config: ConnectionConfig,
        connector: Rc<dyn Connector>,
    ) -> Result<Self> {
        let driver = connector.connect(&config).map_err(RelqError::Connection)?;
        Ok(Self::with_driver(name, config, connector, driver))
    }

    /// Wraps an already open driver. `connector` is used for reconnects.
    pub fn with_driver(
        name: impl Into<String>,
        config: ConnectionConfig,
        connector: Rc<dyn Connector>,
        driver: Box<dyn Driver>,
    ) -> Self {
        Self {
            name: name.into(),
            dialect: config.dialect(),
            release_savepoints: config.release_savepoints(),
            config,
            connector,
            driver: Some(driver),
            transactions: 0,
            savepoints: Vec::new(),
            listeners: Vec::new(),
            query_log: None,
        }
    }

    /// Opens a named SQLite database with the bundled driver.
    #[cfg(feature = "rusqlite")]
    pub fn sqlite(database: &str) -> Result<Self> {
        Self::open(
            "main",
            ConnectionConfig::sqlite(database),
            Rc::new(crate::driver::NativeConnector),
        )
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    #[inline]
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Starts a query builder against `table`.
    pub fn table(&self, table: &str) -> QueryBuilder {
        QueryBuilder::table(self.dialect, table)
    }

    // ==================== statements ====================

    pub fn select(&mut self, sql: &str, bindings: &[Value]) -> Result<Vec<Row>> {
        self.run(sql, bindings, |driver| driver.query(sql, bindings))
    }

    pub fn select_one(&mut self, sql: &str, bindings: &[Value]) -> Result<Option<Row>> {
        Ok(self.select(sql, bindings)?.into_iter().next())
    }

    pub fn insert(&mut self, sql: &str, bindings: &[Value]) -> Result<u64> {
        self.affecting_statement(sql, bindings)
    }

    pub fn update(&mut self, sql: &str, bindings: &[Value]) -> Result<u64> {
        self.affecting_statement(sql, bindings)
    }

    pub fn delete(&mut self, sql: &str, bindings: &[Value]) -> Result<u64> {
        self.affecting_statement(sql, bindings)
    }

    /// Runs a statement for its side effect.
    pub fn statement(&mut self, sql: &str, bindings: &[Value]) -> Result<bool> {
        self.affecting_statement(sql, bindings)?;
        Ok(true)
    }

    pub fn affecting_statement(&mut self, sql: &str, bindings: &[Value]) -> Result<u64> {
        self.run(sql, bindings, |driver| driver.execute(sql, bindings))
    }

    /// Runs parameterless SQL, for example schema setup.
    pub fn unprepared(&mut self, sql: &str) -> Result<()> {
        self.run(sql, &[], |driver| driver.batch(sql))
    }

    /// Streams rows from the native cursor into `each` until it returns
    /// `false`.
    ///
    /// Another statement must not be issued on this connection from inside
    /// `each`. A lost connection is only retried while no row has been
    /// delivered yet.
    pub fn cursor(
        &mut self,
        sql: &str,
        bindings: &[Value],
        mut each: impl FnMut(Row) -> bool,
    ) -> Result<()> {
        let mut delivered = 0usize;
        self.run_with(
            sql,
            bindings,
            |driver, delivered: &mut usize| {
                driver.query_each(sql, bindings, &mut |row| {
                    *delivered += 1;
                    each(row)
                })
            },
            &mut delivered,
            |delivered| *delivered == 0,
        )
    }

    // ==================== handle lifecycle ====================

    /// Drops the native handle. The next statement reconnects.
    ///
    /// An open transaction ends with the handle, so the level drops to 0.
    pub fn disconnect(&mut self) {
        self.driver = None;
        self.abandon_transaction();
    }

    /// Replaces the native handle with a fresh one from the connector.
    ///
    /// An open transaction is not restored on the new handle; the level
    /// drops to 0.
    pub fn reconnect(&mut self) -> Result<()> {
        self.driver = None;
        self.abandon_transaction();
        let driver = self
            .connector
            .connect(&self.config)
            .map_err(RelqError::Connection)?;
        self.driver = Some(driver);
        Ok(())
    }

    fn reconnect_if_missing(&mut self) -> Result<()> {
        if self.driver.is_none() {
            self.reconnect()?;
        }
        Ok(())
    }

    fn driver(&mut self) -> Result<&mut (dyn Driver + 'static)> {
        self.driver
            .as_deref_mut()
            .ok_or_else(|| RelqError::Connection(DriverError::new("connection is closed")))
    }

    // ==================== execution ====================

    fn run<T>(
        &mut self,
        sql: &str,
        bindings: &[Value],
        mut op: impl FnMut(&mut dyn Driver) -> std::result::Result<T, DriverError>,
    ) -> Result<T> {
        self.run_with(sql, bindings, |driver, _: &mut ()| op(driver), &mut (), |_| true)
    }

    /// Runs `op`, retrying once on a fresh handle when the first attempt hit a
    /// lost connection outside of a transaction and `retryable` still agrees.
    fn run_with<T, S>(
        &mut self,
        sql: &str,
        bindings: &[Value],
        mut op: impl FnMut(&mut dyn Driver, &mut S) -> std::result::Result<T, DriverError>,
        state: &mut S,
        retryable: impl Fn(&S) -> bool,
    ) -> Result<T> {
        self.reconnect_if_missing()?;
        let start = Instant::now();

        let result = match op(self.driver()?, state) {
            Ok(value) => Ok(value),
            Err(error) if caused_by_lost_connection(&error) => {
                if self.transactions >= 1 {
                    Err(RelqError::LostInTransaction(error))
                } else if !retryable(state) {
                    Err(RelqError::Driver {
                        error,
                        sql: sql.to_string(),
                    })
                } else {
                    relq_trace_reconnect!(self.name, error);
                    self.reconnect()?;
                    op(self.driver()?, state).map_err(|error| RelqError::Driver {
                        error,
                        sql: sql.to_string(),
                    })
                }
            }
            Err(error) => Err(RelqError::Driver {
                error,
                sql: sql.to_string(),
            }),
        };

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        relq_trace_query!(sql, bindings.len(), elapsed_ms);
        self.log_query(sql, bindings, elapsed_ms);
        result
    }

    // ==================== side channel ====================

    /// Registers a callback invoked after every statement.
    pub fn listen(&mut self, listener: impl FnMut(&QueryExecuted) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn enable_query_log(&mut self) {
        self.query_log.get_or_insert_with(Vec::new);
    }

    pub fn disable_query_log(&mut self) {
        self.query_log = None;
    }

    pub fn query_log(&self) -> &[QueryExecuted] {
        self.query_log.as_deref().unwrap_or(&[])
    }

    pub fn flush_query_log(&mut self) {
        if let Some(log) = &mut self.query_log {
            log.clear();
        }
    }

    fn log_query(&mut self, sql: &str, bindings: &[Value], elapsed_ms: f64) {
        if self.listeners.is_empty() && self.query_log.is_none() {
            return;
        }
        let event = QueryExecuted {
            connection: self.name.clone(),
            sql: sql.to_string(),
            bindings: bindings.to_vec(),
            elapsed_ms,
        };
        for listener in &mut self.listeners {
            listener(&event);
        }
        if let Some(log) = &mut self.query_log {
            log.push(event);
        }
    }
}

impl Executor for Connection {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn select(&mut self, sql: &str, bindings: &[Value]) -> Result<Vec<Row>> {
        Connection::select(self, sql, bindings)
    }

    fn affecting_statement(&mut self, sql: &str, bindings: &[Value]) -> Result<u64> {
        Connection::affecting_statement(self, sql, bindings)
    }

    fn last_insert_id(&mut self) -> Result<Option<i64>> {
        Ok(self.driver()?.last_insert_id())
    }

    fn cursor(
        &mut self,
        sql: &str,
        bindings: &[Value],
        each: &mut dyn FnMut(Row) -> bool,
    ) -> Result<()> {
        Connection::cursor(self, sql, bindings, each)
    }
}
