//! # relq
//!
//! Relationship-aware query composition over SQLite and PostgreSQL, with
//! connections that reconnect on a dropped handle and nest transactions
//! through savepoints.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use relq::{Connection, ModelDef, Registry};
//!
//! # fn main() -> relq::Result<()> {
//! let mut db = Connection::sqlite(":memory:")?;
//! db.unprepared(
//!     "create table users (id integer primary key, name text);
//!      create table posts (id integer primary key, user_id integer, title text);
//!      insert into users (id, name) values (1, 'ann'), (2, 'bob');
//!      insert into posts (user_id, title) values (1, 'hello');",
//! )?;
//!
//! let registry = Arc::new(
//!     Registry::new()
//!         .register(ModelDef::new("User").has_many("posts", "Post"))
//!         .register(ModelDef::new("Post").belongs_to("user", "User")),
//! );
//!
//! let authors = registry
//!     .query("User", db.dialect())?
//!     .has("posts", ">=", 1)
//!     .with(&["posts"])
//!     .get(&mut db)?;
//!
//! assert_eq!(authors.len(), 1);
//! assert_eq!(authors[0].many("posts").len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Database Support
//!
//! | Database   | Driver         | Feature Flag     |
//! |------------|----------------|------------------|
//! | SQLite     | rusqlite       | `rusqlite`       |
//! | PostgreSQL | postgres       | `postgres-sync`  |
//!
//! MySQL SQL is generated by the grammar; its handle is supplied through a
//! custom [`Connector`](driver::Connector).

pub mod config;
pub mod connection;
pub mod driver;
pub mod model;
pub mod query;
pub mod relation;

// =============================================================================
// Root-level exports
// =============================================================================

pub use relq_core::{
    Boolean, Dialect, Direction, DriverError, Executor, Grammar, JoinClause, JoinKind, Order,
    QueryBuilder, RelqError, Result, Row, SQL, SQLChunk, Selection, Value, Where,
    quote_identifier,
};

/// Error types
pub mod error {
    pub use crate::config::ConfigError;
    pub use relq_core::error::{DriverError, RelqError};
}

pub use config::{ConnectionConfig, DatabaseConfig};
pub use connection::{Connection, ConnectionManager, QueryExecuted};
pub use model::{ModelDef, Record, Registry, Related};
pub use query::{Cursor, CursorPage, ModelQuery};
pub use relation::{Relation, RelationDecl, RelationKeys, RelationKind};
