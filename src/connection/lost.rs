//! Classification of native errors.

use relq_core::{DriverError, RelqError};

/// Phrases drivers use when the server side of the handle is gone.
const LOST_CONNECTION_MESSAGES: &[&str] = &[
    "server has gone away",
    "no connection to the server",
    "lost connection",
    "is dead or not enabled",
    "error while sending",
    "decryption failed or bad record mac",
    "server closed the connection unexpectedly",
    "ssl connection has been closed unexpectedly",
    "error writing data to the connection",
    "resource deadlock avoided",
    "reset by peer",
    "physical connection is not usable",
    "packets out of order. expected",
    "communication link failure",
    "connection is no longer usable",
    "connection refused",
    "connection timed out",
    "broken pipe",
    "connection closed",
    "terminating connection due to administrator command",
    "the connection is broken and recovery is not possible",
    "temporary failure in name resolution",
];

/// Phrases that mark a deadlock or lock timeout worth retrying.
const CONCURRENCY_MESSAGES: &[&str] = &[
    "deadlock found when trying to get lock",
    "deadlock detected",
    "the database file is locked",
    "database is locked",
    "database table is locked",
    "a table in the database is locked",
    "has been chosen as the deadlock victim",
    "lock wait timeout exceeded; try restarting transaction",
    "wsrep detected deadlock/conflict and aborted the transaction",
    "could not serialize access",
];

/// Whether the native error means the handle is no longer usable.
///
/// Codes are checked first: MySQL client errors 2006/2013, SQLSTATE class 08
/// and `57P01` (admin shutdown) on PostgreSQL.
pub fn caused_by_lost_connection(error: &DriverError) -> bool {
    if let Some(code) = error.code.as_deref() {
        if matches!(code, "2006" | "2013" | "57P01" | "57P02" | "57P03") || code.starts_with("08")
        {
            return true;
        }
    }
    let message = error.message.to_ascii_lowercase();
    LOST_CONNECTION_MESSAGES
        .iter()
        .any(|needle| message.contains(needle))
}

/// Whether the failure is a deadlock or serialization conflict.
pub fn caused_by_concurrency_error(error: &RelqError) -> bool {
    let Some(native) = error.driver_error() else {
        return false;
    };
    if let Some(code) = native.code.as_deref() {
        // SQLSTATE serialization/deadlock, MySQL deadlock, SQLite BUSY/LOCKED.
        if matches!(code, "40001" | "40P01" | "1213" | "5" | "6" | "261" | "262" | "517") {
            return true;
        }
    }
    let message = native.message.to_ascii_lowercase();
    CONCURRENCY_MESSAGES
        .iter()
        .any(|needle| message.contains(needle))
}
