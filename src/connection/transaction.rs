//! Nested transactions.
//!
//! Level 0 means no transaction. Going from 0 to 1 issues the real
//! `BEGIN`; every deeper level is a savepoint named `trans_{level}`. Commit
//! and rollback pop exactly one level.

use relq_core::{RelqError, Result, relq_trace_reconnect, relq_trace_tx};

use super::{Connection, caused_by_concurrency_error, caused_by_lost_connection};

impl Connection {
    /// Opens a transaction, or a savepoint when one is already open.
    ///
    /// The level only increases once the statement succeeded. A lost
    /// connection while opening the outermost transaction is retried once on
    /// a fresh handle.
    pub fn begin_transaction(&mut self) -> Result<()> {
        if self.transactions == 0 {
            self.reconnect_if_missing()?;
            let begin = self.dialect.begin_transaction();
            if let Err(error) = self.driver()?.batch(begin) {
                if !caused_by_lost_connection(&error) {
                    return Err(RelqError::Driver {
                        error,
                        sql: begin.to_string(),
                    });
                }
                relq_trace_reconnect!(self.name, error);
                self.reconnect()?;
                self.driver()?
                    .batch(begin)
                    .map_err(|error| RelqError::Driver {
                        error,
                        sql: begin.to_string(),
                    })?;
            }
            self.log_query(begin, &[], 0.0);
            self.savepoints.clear();
            self.transactions = 1;
            relq_trace_tx!("begin", self.transactions);
            return Ok(());
        }

        let name = format!("trans_{}", self.transactions + 1);
        let sql = self.dialect.compile_savepoint(&name);
        self.control(&sql)?;
        self.savepoints.push(name);
        self.transactions += 1;
        relq_trace_tx!("savepoint", self.transactions);
        Ok(())
    }

    /// Commits the innermost level.
    ///
    /// Returns `Ok(false)` without touching the database when no transaction
    /// is open.
    pub fn commit(&mut self) -> Result<bool> {
        match self.transactions {
            0 => Ok(false),
            1 => {
                if let Err(err) = self.control("COMMIT") {
                    // The server has already discarded the transaction.
                    if matches!(err, RelqError::LostInTransaction(_))
                        || caused_by_concurrency_error(&err)
                    {
                        self.reset_transaction_state();
                    }
                    return Err(err);
                }
                self.reset_transaction_state();
                relq_trace_tx!("commit", self.transactions);
                Ok(true)
            }
            _ => {
                if self.release_savepoints {
                    if let Some(name) = self.savepoints.last() {
                        let sql = self.dialect.compile_release_savepoint(name);
                        self.control(&sql)?;
                    }
                }
                self.savepoints.pop();
                self.transactions -= 1;
                relq_trace_tx!("release", self.transactions);
                Ok(true)
            }
        }
    }

    /// Rolls back the innermost level.
    ///
    /// Returns `Ok(false)` when no transaction is open.
    pub fn rollback(&mut self) -> Result<bool> {
        if self.transactions == 0 {
            return Ok(false);
        }
        self.rollback_to(self.transactions - 1)?;
        Ok(true)
    }

    /// Rolls back to `level`: 0 ends the transaction, any lower positive
    /// level rolls back to the savepoint that opened `level + 1`.
    pub fn rollback_to(&mut self, level: u32) -> Result<()> {
        if level >= self.transactions {
            return Ok(());
        }
        if level == 0 {
            if let Err(err) = self.control("ROLLBACK") {
                if matches!(err, RelqError::LostInTransaction(_)) {
                    self.reset_transaction_state();
                }
                return Err(err);
            }
            self.reset_transaction_state();
            relq_trace_tx!("rollback", self.transactions);
            return Ok(());
        }

        let name = format!("trans_{}", level + 1);
        let sql = self.dialect.compile_rollback_to_savepoint(&name);
        self.control(&sql)?;
        self.savepoints.truncate(level as usize - 1);
        self.transactions = level;
        relq_trace_tx!("rollback_to_savepoint", self.transactions);
        Ok(())
    }

    #[inline]
    pub fn in_transaction(&self) -> bool {
        self.transactions > 0
    }

    #[inline]
    pub fn transaction_level(&self) -> u32 {
        self.transactions
    }

    /// Savepoint names currently open, outermost first.
    pub fn savepoints(&self) -> &[String] {
        &self.savepoints
    }

    pub fn create_savepoint(&mut self, name: &str) -> Result<()> {
        let sql = self.dialect.compile_savepoint(name);
        self.control(&sql)
    }

    /// Releases a savepoint; a no-op when releases are disabled.
    pub fn release_savepoint(&mut self, name: &str) -> Result<()> {
        if !self.release_savepoints {
            return Ok(());
        }
        let sql = self.dialect.compile_release_savepoint(name);
        self.control(&sql)
    }

    pub fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        let sql = self.dialect.compile_rollback_to_savepoint(name);
        self.control(&sql)
    }

    /// Runs `f` inside one transaction level.
    ///
    /// `Ok` commits, `Err` or a panic rolls back. When the outermost
    /// transaction fails on a deadlock or serialization conflict the whole
    /// closure runs again, up to `attempts` times in total. A rollback that
    /// fails is returned in place of the closure's error and is never retried.
    pub fn transaction<T, F>(&mut self, attempts: u32, mut f: F) -> Result<T>
    where
        F: FnMut(&mut Connection) -> Result<T>,
    {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            self.begin_transaction()?;
            let level = self.transactions;

            let result =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(&mut *self)));

            let err = match result {
                Ok(Ok(value)) => match self.commit() {
                    Ok(_) => return Ok(value),
                    Err(err) => {
                        if self.transactions >= level {
                            self.rollback_to(level - 1)?;
                        }
                        err
                    }
                },
                Ok(Err(err)) => {
                    // A conflict inside an enclosing transaction belongs to
                    // the outer level, which decides whether to retry.
                    if caused_by_concurrency_error(&err) && level > 1 {
                        self.transactions = level - 1;
                        self.savepoints.truncate(level as usize - 2);
                        return Err(err);
                    }
                    self.rollback_to(level - 1)?;
                    err
                }
                Err(panic) => {
                    if let Err(err) = self.rollback_to(level - 1) {
                        relq_trace_tx!("rollback_failed", self.transactions, err);
                    }
                    std::panic::resume_unwind(panic);
                }
            };

            let retry = level == 1
                && self.transactions == 0
                && caused_by_concurrency_error(&err)
                && attempt < attempts;
            if retry {
                attempt += 1;
                continue;
            }
            return Err(err);
        }
    }

    /// Forgets a transaction whose handle is gone.
    pub(super) fn abandon_transaction(&mut self) {
        if self.transactions > 0 {
            relq_trace_tx!("abandoned", self.transactions);
            self.reset_transaction_state();
        }
    }

    fn reset_transaction_state(&mut self) {
        self.transactions = 0;
        self.savepoints.clear();
    }

    /// Runs a transaction-control statement on the current handle.
    fn control(&mut self, sql: &str) -> Result<()> {
        let outcome = self.driver()?.batch(sql);
        self.log_query(sql, &[], 0.0);
        match outcome {
            Ok(()) => Ok(()),
            Err(error) if self.transactions > 0 && caused_by_lost_connection(&error) => {
                Err(RelqError::LostInTransaction(error))
            }
            Err(error) => Err(RelqError::Driver {
                error,
                sql: sql.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use relq_core::{Dialect, DriverError, Row, Value};

    use crate::config::ConnectionConfig;
    use crate::driver::{Connector, Driver};

    use super::*;

    #[derive(Default)]
    struct Script {
        statements: Vec<String>,
        fail_on: Option<(String, DriverError)>,
    }

    struct Recording(Rc<RefCell<Script>>);

    impl Driver for Recording {
        fn dialect(&self) -> Dialect {
            Dialect::SQLite
        }

        fn execute(&mut self, sql: &str, _: &[Value]) -> std::result::Result<u64, DriverError> {
            self.0.borrow_mut().statements.push(sql.to_string());
            Ok(1)
        }

        fn query(&mut self, sql: &str, _: &[Value]) -> std::result::Result<Vec<Row>, DriverError> {
            self.0.borrow_mut().statements.push(sql.to_string());
            Ok(vec![])
        }

        fn batch(&mut self, sql: &str) -> std::result::Result<(), DriverError> {
            let mut script = self.0.borrow_mut();
            if let Some((needle, error)) = &script.fail_on {
                if sql.starts_with(needle.as_str()) {
                    let error = error.clone();
                    script.fail_on = None;
                    return Err(error);
                }
            }
            script.statements.push(sql.to_string());
            Ok(())
        }
    }

    fn connection(script: &Rc<RefCell<Script>>) -> Connection {
        connection_with(script, ConnectionConfig::sqlite_memory())
    }

    fn connection_with(script: &Rc<RefCell<Script>>, config: ConnectionConfig) -> Connection {
        let shared = script.clone();
        let connector: Rc<dyn Connector> = Rc::new(move |_: &ConnectionConfig| {
            Ok::<_, DriverError>(Box::new(Recording(shared.clone())) as Box<dyn Driver>)
        });
        Connection::open("test", config, connector).unwrap()
    }

    #[test]
    fn disabled_release_still_pops_the_level() {
        let script = Rc::new(RefCell::new(Script::default()));
        let config = ConnectionConfig {
            release_savepoints: Some(false),
            ..ConnectionConfig::sqlite_memory()
        };
        let mut conn = connection_with(&script, config);
        conn.begin_transaction().unwrap();
        conn.begin_transaction().unwrap();
        conn.begin_transaction().unwrap();
        assert!(conn.commit().unwrap());
        assert_eq!(conn.transaction_level(), 2);
        assert_eq!(conn.savepoints(), ["trans_2"]);
        assert!(conn.commit().unwrap());
        assert!(conn.commit().unwrap());
        assert_eq!(
            script.borrow().statements,
            ["BEGIN", "SAVEPOINT trans_2", "SAVEPOINT trans_3", "COMMIT"]
        );
        assert_eq!(conn.transaction_level(), 0);
    }

    #[test]
    fn failed_rollback_is_returned_instead_of_retrying() {
        let script = Rc::new(RefCell::new(Script::default()));
        let mut conn = connection(&script);
        script.borrow_mut().fail_on = Some(("ROLLBACK".into(), DriverError::new("disk I/O error")));
        let mut calls = 0;
        let result: Result<()> = conn.transaction(3, |_| {
            calls += 1;
            Err(RelqError::Driver {
                error: DriverError::new("database is locked"),
                sql: "update t set n = 1".into(),
            })
        });
        assert!(matches!(&result, Err(RelqError::Driver { sql, .. }) if sql == "ROLLBACK"));
        assert_eq!(calls, 1);
        assert_eq!(script.borrow().statements, ["BEGIN"]);
        assert_eq!(conn.transaction_level(), 1);
    }

    #[test]
    fn disconnect_ends_the_open_transaction() {
        let script = Rc::new(RefCell::new(Script::default()));
        let mut conn = connection(&script);
        conn.begin_transaction().unwrap();
        conn.begin_transaction().unwrap();
        conn.disconnect();
        assert_eq!(conn.transaction_level(), 0);
        assert!(conn.savepoints().is_empty());

        conn.begin_transaction().unwrap();
        assert!(conn.commit().unwrap());
        assert_eq!(
            script.borrow().statements,
            ["BEGIN", "SAVEPOINT trans_2", "BEGIN", "COMMIT"]
        );
    }

    #[test]
    fn nested_levels_use_savepoints() {
        let script = Rc::new(RefCell::new(Script::default()));
        let mut conn = connection(&script);
        conn.begin_transaction().unwrap();
        conn.begin_transaction().unwrap();
        conn.begin_transaction().unwrap();
        assert_eq!(conn.savepoints(), ["trans_2", "trans_3"]);
        assert!(conn.commit().unwrap());
        assert!(conn.rollback().unwrap());
        assert!(conn.commit().unwrap());
        assert_eq!(
            script.borrow().statements,
            [
                "BEGIN",
                "SAVEPOINT trans_2",
                "SAVEPOINT trans_3",
                "RELEASE SAVEPOINT trans_3",
                "ROLLBACK TO SAVEPOINT trans_2",
                "COMMIT",
            ]
        );
        assert_eq!(conn.transaction_level(), 0);
        assert!(conn.savepoints().is_empty());
    }

    #[test]
    fn inner_rollback_then_outer_commit() {
        let script = Rc::new(RefCell::new(Script::default()));
        let mut conn = connection(&script);
        conn.begin_transaction().unwrap();
        conn.begin_transaction().unwrap();
        conn.rollback().unwrap();
        conn.commit().unwrap();
        assert_eq!(
            script.borrow().statements,
            ["BEGIN", "SAVEPOINT trans_2", "ROLLBACK TO SAVEPOINT trans_2", "COMMIT"]
        );
        assert_eq!(conn.transaction_level(), 0);
    }

    #[test]
    fn commit_without_transaction_is_false() {
        let script = Rc::new(RefCell::new(Script::default()));
        let mut conn = connection(&script);
        assert!(!conn.commit().unwrap());
        assert!(!conn.rollback().unwrap());
        assert!(script.borrow().statements.is_empty());
    }

    #[test]
    fn failed_savepoint_keeps_level() {
        let script = Rc::new(RefCell::new(Script::default()));
        let mut conn = connection(&script);
        conn.begin_transaction().unwrap();
        script.borrow_mut().fail_on = Some((
            "SAVEPOINT".into(),
            DriverError::new("cannot open savepoint"),
        ));
        assert!(conn.begin_transaction().is_err());
        assert_eq!(conn.transaction_level(), 1);
    }

    #[test]
    fn begin_reconnects_once_on_lost_connection() {
        let script = Rc::new(RefCell::new(Script::default()));
        let mut conn = connection(&script);
        script.borrow_mut().fail_on = Some((
            "BEGIN".into(),
            DriverError::new("MySQL server has gone away"),
        ));
        conn.begin_transaction().unwrap();
        assert_eq!(conn.transaction_level(), 1);
        assert_eq!(script.borrow().statements, ["BEGIN"]);
    }

    #[test]
    fn closure_rolls_back_on_error() {
        let script = Rc::new(RefCell::new(Script::default()));
        let mut conn = connection(&script);
        let result: Result<()> = conn.transaction(1, |conn| {
            conn.statement("insert into t values (1)", &[])?;
            Err(RelqError::Other("nope".into()))
        });
        assert!(result.is_err());
        assert_eq!(
            script.borrow().statements,
            ["BEGIN", "insert into t values (1)", "ROLLBACK"]
        );
        assert!(!conn.in_transaction());
    }

    #[test]
    fn closure_retries_outer_deadlocks() {
        let script = Rc::new(RefCell::new(Script::default()));
        let mut conn = connection(&script);
        let mut calls = 0;
        let value = conn
            .transaction(3, |_| {
                calls += 1;
                if calls < 2 {
                    return Err(RelqError::Driver {
                        error: DriverError::with_code("40P01", "deadlock detected"),
                        sql: "update".into(),
                    });
                }
                Ok(calls)
            })
            .unwrap();
        assert_eq!(value, 2);
        assert_eq!(
            script.borrow().statements,
            ["BEGIN", "ROLLBACK", "BEGIN", "COMMIT"]
        );
    }
}
