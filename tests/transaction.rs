#![cfg(feature = "rusqlite")]

use std::rc::Rc;

use relq::config::ConnectionConfig;
use relq::driver::NativeConnector;
use relq::{Connection, DriverError, RelqError, Value};

mod common;
use common::{flaky_db, setup_db};

fn post_titles(conn: &mut Connection) -> Vec<String> {
    conn.select("select title from posts order by id", &[])
        .unwrap()
        .iter()
        .filter_map(|row| row.get("title").and_then(Value::as_str).map(str::to_string))
        .collect()
}

fn add_post(conn: &mut Connection, id: i64, title: &str) -> relq::Result<u64> {
    conn.insert(
        "insert into posts (id, user_id, title) values (?, 1, ?)",
        &[id.into(), title.into()],
    )
}

#[test]
fn test_transaction_commit() {
    let mut db = setup_db();
    db.transaction(1, |tx| {
        add_post(tx, 10, "ten")?;
        add_post(tx, 11, "eleven")?;
        Ok(())
    })
    .unwrap();
    assert!(post_titles(&mut db).ends_with(&["ten".to_string(), "eleven".to_string()]));
    assert_eq!(db.transaction_level(), 0);
}

#[test]
fn test_transaction_rollback() {
    let mut db = setup_db();
    let result: relq::Result<()> = db.transaction(1, |tx| {
        add_post(tx, 10, "ten")?;
        Err(RelqError::Other("Intentional rollback".to_string()))
    });
    assert!(result.is_err());
    assert_eq!(post_titles(&mut db).len(), 4);
    assert!(!db.in_transaction());
}

#[test]
fn test_inner_rollback_keeps_outer_work() {
    let mut db = setup_db();
    db.begin_transaction().unwrap();
    add_post(&mut db, 10, "outer").unwrap();

    db.begin_transaction().unwrap();
    assert_eq!(db.transaction_level(), 2);
    add_post(&mut db, 11, "inner").unwrap();
    db.rollback().unwrap();

    db.begin_transaction().unwrap();
    add_post(&mut db, 12, "kept").unwrap();
    db.commit().unwrap();

    db.commit().unwrap();
    let titles = post_titles(&mut db);
    assert!(titles.contains(&"outer".to_string()));
    assert!(titles.contains(&"kept".to_string()));
    assert!(!titles.contains(&"inner".to_string()));
}

#[test]
fn test_nested_closures_roll_back_one_level() {
    let mut db = setup_db();
    db.transaction(1, |tx| {
        add_post(tx, 10, "outer")?;
        let inner: relq::Result<()> = tx.transaction(1, |tx| {
            assert_eq!(tx.transaction_level(), 2);
            add_post(tx, 11, "inner")?;
            Err(RelqError::Other("inner failure".into()))
        });
        assert!(inner.is_err());
        assert_eq!(tx.transaction_level(), 1);
        Ok(())
    })
    .unwrap();

    let titles = post_titles(&mut db);
    assert!(titles.contains(&"outer".to_string()));
    assert!(!titles.contains(&"inner".to_string()));
}

#[test]
fn test_panics_roll_back_and_propagate() {
    let mut db = setup_db();
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _ = db.transaction(1, |tx| -> relq::Result<()> {
            add_post(tx, 10, "doomed").unwrap();
            panic!("boom");
        });
    }));
    assert!(outcome.is_err());
    assert_eq!(db.transaction_level(), 0);
    assert_eq!(post_titles(&mut db).len(), 4);
}

#[test]
fn test_rollback_to_named_levels() {
    let mut db = setup_db();
    db.begin_transaction().unwrap();
    db.begin_transaction().unwrap();
    db.begin_transaction().unwrap();
    assert_eq!(db.savepoints(), ["trans_2", "trans_3"]);

    db.rollback_to(1).unwrap();
    assert_eq!(db.transaction_level(), 1);
    assert!(db.savepoints().is_empty());

    // Rolling back to the current level or above is a no-op.
    db.rollback_to(5).unwrap();
    assert_eq!(db.transaction_level(), 1);

    db.rollback().unwrap();
    assert!(!db.in_transaction());
    assert!(!db.rollback().unwrap());
}

#[test]
fn test_query_listeners_see_every_statement() {
    let mut db = setup_db();
    let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = seen.clone();
    db.listen(move |event| sink.borrow_mut().push(event.sql.clone()));

    db.transaction(1, |tx| add_post(tx, 10, "ten").map(|_| ())).unwrap();
    assert_eq!(
        *seen.borrow(),
        [
            "BEGIN".to_string(),
            "insert into posts (id, user_id, title) values (?, 1, ?)".to_string(),
            "COMMIT".to_string(),
        ]
    );
}

#[test]
fn test_failed_rollback_is_surfaced_and_not_retried() {
    let mut db = flaky_db();
    db.script
        .borrow_mut()
        .fail_next("ROLLBACK", "disk I/O error");

    let mut calls = 0;
    let result: relq::Result<()> = db.conn.transaction(3, |tx| {
        calls += 1;
        add_post(tx, 10, "ten")?;
        Err(RelqError::Driver {
            error: DriverError::new("database is locked"),
            sql: "update posts set votes = 1".into(),
        })
    });

    assert!(matches!(&result, Err(RelqError::Driver { sql, .. }) if sql == "ROLLBACK"));
    assert_eq!(calls, 1);
    assert_eq!(db.conn.transaction_level(), 1);
    assert!(
        !db.script
            .borrow()
            .statements
            .iter()
            .any(|sql| sql.starts_with("SAVEPOINT"))
    );

    assert!(db.conn.rollback().unwrap());
    assert_eq!(post_titles(&mut db.conn).len(), 4);
}

#[test]
fn test_nested_commits_skip_release_when_disabled() {
    let config = ConnectionConfig {
        release_savepoints: Some(false),
        ..ConnectionConfig::sqlite_memory()
    };
    let mut db = Connection::open("legacy", config, Rc::new(NativeConnector)).unwrap();
    db.unprepared("create table posts (id integer primary key, user_id integer, title text)")
        .unwrap();
    db.enable_query_log();

    db.begin_transaction().unwrap();
    db.begin_transaction().unwrap();
    add_post(&mut db, 10, "inner").unwrap();
    db.commit().unwrap();
    assert_eq!(db.transaction_level(), 1);
    db.commit().unwrap();

    let log: Vec<&str> = db.query_log().iter().map(|q| q.sql.as_str()).collect();
    assert_eq!(
        log,
        [
            "BEGIN",
            "SAVEPOINT trans_2",
            "insert into posts (id, user_id, title) values (?, 1, ?)",
            "COMMIT",
        ]
    );
    assert_eq!(post_titles(&mut db), ["inner"]);
}
