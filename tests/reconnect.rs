#![cfg(feature = "rusqlite")]

use relq::{RelqError, Value};

mod common;
use common::flaky_db;

const COUNT_POSTS: &str = "select count(*) as n from posts";

fn count(rows: &[relq::Row]) -> Option<i64> {
    rows.first().and_then(|row| row.get("n")).and_then(Value::as_i64)
}

#[test]
fn test_lost_connection_is_retried_once() {
    let mut db = flaky_db();
    db.script
        .borrow_mut()
        .fail_next("select count", "MySQL server has gone away");

    let rows = db.conn.select(COUNT_POSTS, &[]).unwrap();
    assert_eq!(count(&rows), Some(4));
    assert_eq!(db.script.borrow().connects, 2);
}

#[test]
fn test_second_failure_is_surfaced() {
    let mut db = flaky_db();
    {
        let mut script = db.script.borrow_mut();
        script.fail_next("select count", "server closed the connection unexpectedly");
        script.fail_next("select count", "server closed the connection unexpectedly");
    }
    let err = db.conn.select(COUNT_POSTS, &[]).unwrap_err();
    assert!(matches!(err, RelqError::Driver { .. }));
    assert_eq!(db.script.borrow().connects, 2);
}

#[test]
fn test_other_errors_are_not_retried() {
    let mut db = flaky_db();
    db.script
        .borrow_mut()
        .fail_next("select count", "no such column: n");
    let err = db.conn.select(COUNT_POSTS, &[]).unwrap_err();
    assert!(matches!(&err, RelqError::Driver { sql, .. } if sql == COUNT_POSTS));
    assert_eq!(db.script.borrow().connects, 1);
}

#[test]
fn test_lost_connection_inside_a_transaction_is_fatal() {
    let mut db = flaky_db();
    db.conn.begin_transaction().unwrap();
    db.script
        .borrow_mut()
        .fail_next("insert", "SSL connection has been closed unexpectedly");

    let err = db
        .conn
        .insert("insert into posts (user_id, title) values (1, 'x')", &[])
        .unwrap_err();
    assert!(matches!(err, RelqError::LostInTransaction(_)));
    assert_eq!(db.script.borrow().connects, 1);
}

#[test]
fn test_begin_reconnects_when_the_handle_died_idle() {
    let mut db = flaky_db();
    db.script
        .borrow_mut()
        .fail_next("BEGIN", "Lost connection to MySQL server during query");

    db.conn.begin_transaction().unwrap();
    assert_eq!(db.conn.transaction_level(), 1);
    assert_eq!(db.script.borrow().connects, 2);
    db.conn.rollback().unwrap();
}

#[test]
fn test_disconnected_connections_reopen_lazily() {
    let mut db = flaky_db();
    db.conn.disconnect();
    assert_eq!(db.script.borrow().connects, 1);

    let rows = db.conn.select(COUNT_POSTS, &[]).unwrap();
    assert_eq!(count(&rows), Some(4));
    assert_eq!(db.script.borrow().connects, 2);
}

#[test]
fn test_model_queries_survive_a_reconnect() {
    let mut db = flaky_db();
    db.script
        .borrow_mut()
        .fail_next("select * from \"posts\"", "broken pipe");

    let users = common::registry()
        .query("User", relq::Dialect::SQLite)
        .unwrap()
        .with(&["posts"])
        .get(&mut db.conn)
        .unwrap();
    assert_eq!(users[0].many("posts").len(), 2);
    assert_eq!(db.script.borrow().connects, 2);
}
