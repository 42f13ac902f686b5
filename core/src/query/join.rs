use compact_str::CompactString;

use crate::value::Value;

use super::predicate::{Boolean, Where, normalize_operator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Cross,
}

impl JoinKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            JoinKind::Inner => "inner join",
            JoinKind::Left => "left join",
            JoinKind::Right => "right join",
            JoinKind::Cross => "cross join",
        }
    }
}

/// A join and its ON conditions.
///
/// `on` conditions compare two identifiers; `where` conditions bind a value,
/// and those bindings are emitted in the order the conditions were added.
#[derive(Debug, Clone)]
pub struct JoinClause {
    pub kind: JoinKind,
    pub table: CompactString,
    pub conditions: Vec<Where>,
    pub(crate) error: Option<crate::error::RelqError>,
}

impl JoinClause {
    pub fn new(kind: JoinKind, table: impl Into<CompactString>) -> Self {
        Self {
            kind,
            table: table.into(),
            conditions: Vec::new(),
            error: None,
        }
    }

    pub fn on(self, first: &str, operator: &str, second: &str) -> Self {
        self.push_on(first, operator, second, Boolean::And)
    }

    pub fn or_on(self, first: &str, operator: &str, second: &str) -> Self {
        self.push_on(first, operator, second, Boolean::Or)
    }

    pub fn r#where(self, column: &str, operator: &str, value: impl Into<Value>) -> Self {
        self.push_where(column, operator, value.into(), Boolean::And)
    }

    pub fn or_where(self, column: &str, operator: &str, value: impl Into<Value>) -> Self {
        self.push_where(column, operator, value.into(), Boolean::Or)
    }

    fn push_on(mut self, first: &str, operator: &str, second: &str, boolean: Boolean) -> Self {
        match normalize_operator(operator) {
            Ok(operator) => self.conditions.push(Where::Column {
                first: first.into(),
                operator,
                second: second.into(),
                boolean,
            }),
            Err(err) => {
                self.error.get_or_insert(err);
            }
        }
        self
    }

    fn push_where(mut self, column: &str, operator: &str, value: Value, boolean: Boolean) -> Self {
        match normalize_operator(operator) {
            Ok(operator) => self.conditions.push(Where::Basic {
                column: column.into(),
                operator,
                value,
                boolean,
            }),
            Err(err) => {
                self.error.get_or_insert(err);
            }
        }
        self
    }
}
