//! SQL dialects and their rendering differences.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// SQL dialect for database-specific behavior.
///
/// Each dialect has its own placeholder syntax, identifier quoting and
/// savepoint capabilities.
///
/// ```
/// use relq_core::Dialect;
///
/// assert!(Dialect::PostgreSQL.uses_numbered_placeholders());
/// assert_eq!(Dialect::MySQL.render_placeholder(3), "?");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// SQLite - uses `?` positional placeholders
    #[default]
    #[serde(alias = "sqlite3")]
    SQLite,

    /// PostgreSQL - uses `$1, $2, ...` numbered placeholders
    #[serde(alias = "postgresql", alias = "pgsql", rename = "postgres")]
    PostgreSQL,

    /// MySQL - uses `?` positional placeholders and backtick quoting
    #[serde(alias = "mariadb")]
    MySQL,
}

impl Dialect {
    /// Returns `true` if this dialect uses numbered placeholders (`$1, $2, ...`)
    #[inline]
    #[must_use]
    pub const fn uses_numbered_placeholders(&self) -> bool {
        matches!(self, Dialect::PostgreSQL)
    }

    /// Renders a placeholder for this dialect with the given 1-based index.
    ///
    /// Returns `Cow::Borrowed("?")` for SQLite/MySQL and an owned `$n` for
    /// PostgreSQL.
    #[inline]
    pub fn render_placeholder(&self, index: usize) -> Cow<'static, str> {
        match self {
            Dialect::PostgreSQL => Cow::Owned(format!("${index}")),
            Dialect::SQLite | Dialect::MySQL => Cow::Borrowed("?"),
        }
    }

    /// Character used to quote identifiers.
    #[inline]
    pub const fn quote_char(&self) -> char {
        match self {
            Dialect::MySQL => '`',
            Dialect::SQLite | Dialect::PostgreSQL => '"',
        }
    }

    /// Whether `RELEASE SAVEPOINT` is understood by the engine.
    #[inline]
    pub const fn supports_savepoint_release(&self) -> bool {
        true
    }

    /// Parse a dialect from a string (case-insensitive)
    ///
    /// ```
    /// use relq_core::Dialect;
    ///
    /// assert_eq!(Dialect::parse("pg"), Some(Dialect::PostgreSQL));
    /// assert_eq!(Dialect::parse("unknown"), None);
    /// ```
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("sqlite") || s.eq_ignore_ascii_case("sqlite3") {
            Some(Dialect::SQLite)
        } else if s.eq_ignore_ascii_case("postgresql")
            || s.eq_ignore_ascii_case("postgres")
            || s.eq_ignore_ascii_case("pgsql")
            || s.eq_ignore_ascii_case("pg")
        {
            Some(Dialect::PostgreSQL)
        } else if s.eq_ignore_ascii_case("mysql") || s.eq_ignore_ascii_case("mariadb") {
            Some(Dialect::MySQL)
        } else {
            None
        }
    }

    /// Get the dialect name as a lowercase string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Dialect::SQLite => "sqlite",
            Dialect::PostgreSQL => "postgres",
            Dialect::MySQL => "mysql",
        }
    }

    /// Statement that opens a real transaction.
    pub const fn begin_transaction(&self) -> &'static str {
        match self {
            Dialect::MySQL => "START TRANSACTION",
            Dialect::SQLite | Dialect::PostgreSQL => "BEGIN",
        }
    }

    pub fn compile_savepoint(&self, name: &str) -> String {
        format!("SAVEPOINT {name}")
    }

    pub fn compile_release_savepoint(&self, name: &str) -> String {
        format!("RELEASE SAVEPOINT {name}")
    }

    pub fn compile_rollback_to_savepoint(&self, name: &str) -> String {
        format!("ROLLBACK TO SAVEPOINT {name}")
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
