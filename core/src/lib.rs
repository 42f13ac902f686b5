//! Core building blocks for relq: dialects, values, rows, SQL fragments and
//! the predicate compiler.
//!
//! Nothing in this crate talks to a database directly. Statements run through
//! the [`Executor`] seam, which the connection layer implements.

pub mod dialect;
pub mod error;
pub mod executor;
pub mod query;
pub mod row;
pub mod sql;
mod trace;
pub mod value;

pub use dialect::Dialect;
pub use error::{DriverError, RelqError, Result};
pub use executor::Executor;
pub use query::{
    Boolean, Direction, Grammar, JoinClause, JoinKind, Order, QueryBuilder, Selection, Where,
};
pub use row::Row;
pub use sql::{SQL, SQLChunk, quote_identifier};
pub use value::Value;
