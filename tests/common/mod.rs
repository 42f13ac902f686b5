#![cfg(feature = "rusqlite")]
#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use relq::config::ConnectionConfig;
use relq::driver::rusqlite::RusqliteDriver;
use relq::driver::{Connector, Driver};
use relq::{Connection, Dialect, DriverError, ModelDef, Registry, Row, Value};

const SCHEMA: &str = "
    create table countries (id integer primary key, name text not null);
    create table users (
        id integer primary key,
        name text not null,
        active integer not null default 1,
        country_id integer,
        manager_id integer
    );
    create table posts (
        id integer primary key,
        user_id integer,
        title text not null,
        votes integer not null default 0
    );
    create table videos (id integer primary key, title text not null);
    create table comments (
        id integer primary key,
        body text not null,
        approved integer not null default 0,
        commentable_type text,
        commentable_id integer
    );
    create table roles (id integer primary key, name text not null, level integer not null);
    create table role_user (user_id integer not null, role_id integer not null, granted_by text);
    create table tags (id integer primary key, name text not null);
    create table taggables (tag_id integer not null, taggable_type text not null, taggable_id integer not null);
";

const SEED: &str = "
    insert into countries (id, name) values (1, 'Norway'), (2, 'Chile');
    insert into users (id, name, active, country_id, manager_id) values
        (1, 'ann', 1, 1, null),
        (2, 'bob', 1, 1, 1),
        (3, 'cid', 0, 2, 1),
        (4, 'dee', 1, null, null);
    insert into posts (id, user_id, title, votes) values
        (1, 1, 'first', 10),
        (2, 1, 'second', 3),
        (3, 2, 'third', 7),
        (4, 3, 'fourth', 0);
    insert into videos (id, title) values (1, 'intro'), (2, 'outro');
    insert into comments (id, body, approved, commentable_type, commentable_id) values
        (1, 'nice post', 1, 'post', 1),
        (2, 'meh', 0, 'post', 1),
        (3, 'great video', 1, 'video', 1),
        (4, 'hi ann', 1, 'User', 1),
        (5, 'orphan', 0, 'video', 99);
    insert into roles (id, name, level) values (1, 'admin', 9), (2, 'editor', 5), (3, 'viewer', 1);
    insert into role_user (user_id, role_id, granted_by) values
        (1, 1, 'root'), (1, 2, 'root'), (2, 2, 'ann'), (3, 3, 'ann');
    insert into tags (id, name) values (1, 'rust'), (2, 'sql');
    insert into taggables (tag_id, taggable_type, taggable_id) values
        (1, 'post', 1), (2, 'post', 1), (2, 'video', 2);
";

/// Fresh in-memory database with the fixture schema and rows.
pub fn setup_db() -> Connection {
    let mut conn = Connection::sqlite(":memory:").expect("open in-memory database");
    conn.unprepared(SCHEMA).expect("create tables");
    conn.unprepared(SEED).expect("seed rows");
    conn
}

/// Model graph over the fixture schema.
pub fn registry() -> Arc<Registry> {
    Arc::new(
        Registry::new()
            .register(ModelDef::new("Country").has_many_through("posts", "Post", "User"))
            .register(
                ModelDef::new("User")
                    .belongs_to("country", "Country")
                    .belongs_to("manager", "User")
                    .has_many("posts", "Post")
                    .belongs_to_many("roles", "Role")
                    .morph_many("comments", "Comment", "commentable"),
            )
            .register(
                ModelDef::new("Post")
                    .morph_alias("post")
                    .belongs_to("user", "User")
                    .morph_many("comments", "Comment", "commentable")
                    .morph_to_many("tags", "Tag", "taggable"),
            )
            .register(
                ModelDef::new("Video")
                    .morph_alias("video")
                    .morph_many("comments", "Comment", "commentable"),
            )
            .register(ModelDef::new("Comment").morph_to("commentable"))
            .register(ModelDef::new("Role"))
            .register(ModelDef::new("Tag").morphed_by_many("posts", "Post", "taggable"))
            .scope("User", "active", |q, _| q.r#where("users.active", "=", true)),
    )
}

pub fn names(records: &[relq::Record]) -> Vec<String> {
    records
        .iter()
        .filter_map(|r| r.get("name").and_then(Value::as_str).map(str::to_string))
        .collect()
}

pub fn ids(records: &[relq::Record]) -> Vec<i64> {
    records
        .iter()
        .filter_map(|r| r.get("id").and_then(Value::as_i64))
        .collect()
}

// ============================================================================
// Scripted driver
// ============================================================================

/// Shared script of a [`FlakyDriver`]: what ran, what to fail next and how
/// many native handles were opened.
#[derive(Default)]
pub struct Script {
    pub statements: Vec<String>,
    pub failures: Vec<(String, DriverError)>,
    pub connects: usize,
}

impl Script {
    /// Fails the next statement starting with `prefix` with `message`.
    pub fn fail_next(&mut self, prefix: &str, message: &str) {
        self.failures
            .push((prefix.to_string(), DriverError::new(message)));
    }

    fn take_failure(&mut self, sql: &str) -> Option<DriverError> {
        let index = self
            .failures
            .iter()
            .position(|(prefix, _)| sql.starts_with(prefix.as_str()))?;
        Some(self.failures.remove(index).1)
    }
}

/// Real SQLite handle that can be told to fail like a dropped connection.
pub struct FlakyDriver {
    inner: RusqliteDriver,
    script: Rc<RefCell<Script>>,
}

impl FlakyDriver {
    fn check(&self, sql: &str) -> Result<(), DriverError> {
        let mut script = self.script.borrow_mut();
        if let Some(error) = script.take_failure(sql) {
            return Err(error);
        }
        script.statements.push(sql.to_string());
        Ok(())
    }
}

impl Driver for FlakyDriver {
    fn dialect(&self) -> Dialect {
        Dialect::SQLite
    }

    fn execute(&mut self, sql: &str, bindings: &[Value]) -> Result<u64, DriverError> {
        self.check(sql)?;
        self.inner.execute(sql, bindings)
    }

    fn query(&mut self, sql: &str, bindings: &[Value]) -> Result<Vec<Row>, DriverError> {
        self.check(sql)?;
        self.inner.query(sql, bindings)
    }

    fn batch(&mut self, sql: &str) -> Result<(), DriverError> {
        self.check(sql)?;
        self.inner.batch(sql)
    }

    fn last_insert_id(&mut self) -> Option<i64> {
        self.inner.last_insert_id()
    }
}

/// A file-backed database, so reconnecting sees the same rows, behind a
/// connector that hands out [`FlakyDriver`]s.
pub struct FlakyDb {
    pub conn: Connection,
    pub script: Rc<RefCell<Script>>,
    pub dir: tempfile::TempDir,
}

pub fn flaky_db() -> FlakyDb {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("relq.db").to_string_lossy().into_owned();
    let script = Rc::new(RefCell::new(Script::default()));

    let shared = script.clone();
    let connector: Rc<dyn Connector> = Rc::new(move |config: &ConnectionConfig| {
        shared.borrow_mut().connects += 1;
        let inner = RusqliteDriver::open(&config.dsn())?;
        Ok::<_, DriverError>(Box::new(FlakyDriver {
            inner,
            script: shared.clone(),
        }) as Box<dyn Driver>)
    });

    let mut conn = Connection::open("flaky", ConnectionConfig::sqlite(path), connector)
        .expect("open flaky connection");
    conn.unprepared(SCHEMA).expect("create tables");
    conn.unprepared(SEED).expect("seed rows");
    script.borrow_mut().statements.clear();
    FlakyDb { conn, script, dir }
}
