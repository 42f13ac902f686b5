//! The predicate tree behind WHERE, HAVING and JOIN ... ON clauses.

use compact_str::CompactString;

use crate::error::{RelqError, Result};
use crate::sql::SQL;
use crate::value::Value;

use super::QueryBuilder;

/// Connector recorded when a predicate is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Boolean {
    #[default]
    And,
    Or,
}

impl Boolean {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Boolean::And => "and",
            Boolean::Or => "or",
        }
    }
}

/// Comparison operators accepted by [`Where::Basic`] and [`Where::Column`].
const OPERATORS: &[&str] = &[
    "=", "<", ">", "<=", ">=", "<>", "!=", "<=>", "like", "like binary", "not like", "ilike",
    "not ilike", "&", "|", "^", "<<", ">>", "&~", "rlike", "not rlike", "regexp", "not regexp",
    "~", "~*", "!~", "!~*", "similar to", "not similar to", "is", "is not", "glob",
];

/// Normalizes and validates a comparison operator.
pub fn normalize_operator(operator: &str) -> Result<CompactString> {
    let op = operator.trim().to_ascii_lowercase();
    if OPERATORS.contains(&op.as_str()) {
        Ok(CompactString::from(op))
    } else {
        Err(RelqError::InvalidOperator(operator.to_string()))
    }
}

/// One node of the predicate tree.
#[derive(Debug, Clone)]
pub enum Where {
    /// `column <op> ?`
    Basic {
        column: CompactString,
        operator: CompactString,
        value: Value,
        boolean: Boolean,
    },
    /// `first <op> second`, both identifiers
    Column {
        first: CompactString,
        operator: CompactString,
        second: CompactString,
        boolean: Boolean,
    },
    /// Raw fragment carrying its own bindings
    Raw { sql: SQL, boolean: Boolean },
    /// `column [not] in (?, ...)`
    In {
        column: CompactString,
        values: Vec<Value>,
        not: bool,
        boolean: Boolean,
    },
    /// `column [not] in (select ...)`
    InSub {
        column: CompactString,
        query: Box<QueryBuilder>,
        not: bool,
        boolean: Boolean,
    },
    /// `column is [not] null`
    Null {
        column: CompactString,
        not: bool,
        boolean: Boolean,
    },
    /// `column [not] between ? and ?`
    Between {
        column: CompactString,
        low: Value,
        high: Value,
        not: bool,
        boolean: Boolean,
    },
    /// Parenthesized group built from a sub-builder's predicates
    Nested {
        query: Box<QueryBuilder>,
        boolean: Boolean,
    },
    /// `[not] exists (select ...)`
    Exists {
        query: Box<QueryBuilder>,
        not: bool,
        boolean: Boolean,
    },
    /// `(select ...) <op> ?`
    SubCompare {
        query: Box<QueryBuilder>,
        operator: CompactString,
        value: Value,
        boolean: Boolean,
    },
}

impl Where {
    pub fn boolean(&self) -> Boolean {
        match self {
            Where::Basic { boolean, .. }
            | Where::Column { boolean, .. }
            | Where::Raw { boolean, .. }
            | Where::In { boolean, .. }
            | Where::InSub { boolean, .. }
            | Where::Null { boolean, .. }
            | Where::Between { boolean, .. }
            | Where::Nested { boolean, .. }
            | Where::Exists { boolean, .. }
            | Where::SubCompare { boolean, .. } => *boolean,
        }
    }

    /// Prefixes unqualified column names with `qualifier`.
    ///
    /// Raw fragments and sub-queries are left untouched; nested groups are
    /// walked recursively.
    pub fn qualify(&mut self, qualifier: &str) {
        fn apply(column: &mut CompactString, qualifier: &str) {
            if !column.contains('.') && column.as_str() != "*" {
                *column = CompactString::from(format!("{qualifier}.{column}"));
            }
        }
        match self {
            Where::Basic { column, .. }
            | Where::In { column, .. }
            | Where::InSub { column, .. }
            | Where::Null { column, .. }
            | Where::Between { column, .. } => apply(column, qualifier),
            Where::Column { first, second, .. } => {
                apply(first, qualifier);
                apply(second, qualifier);
            }
            Where::Nested { query, .. } => {
                for nested in &mut query.wheres {
                    nested.qualify(qualifier);
                }
            }
            Where::Raw { .. } | Where::Exists { .. } | Where::SubCompare { .. } => {}
        }
    }

    /// Whether every column this predicate touches is qualified with `table`.
    ///
    /// Raw fragments and sub-queries are opaque and never count as confined.
    pub fn is_confined_to(&self, table: &str) -> bool {
        let owned = |column: &str| {
            column
                .split_once('.')
                .is_some_and(|(prefix, _)| prefix == table)
        };
        match self {
            Where::Basic { column, .. }
            | Where::In { column, .. }
            | Where::Null { column, .. }
            | Where::Between { column, .. } => owned(column),
            Where::Column { first, second, .. } => owned(first) && owned(second),
            Where::Nested { query, .. } => query.wheres.iter().all(|w| w.is_confined_to(table)),
            Where::Raw { .. }
            | Where::InSub { .. }
            | Where::Exists { .. }
            | Where::SubCompare { .. } => false,
        }
    }
}
