use std::fmt::Write;

use compact_str::CompactString;

use crate::dialect::Dialect;
use crate::value::Value;

/// A SQL chunk represents a part of an SQL statement.
///
/// - `Raw` - Unquoted SQL text (keywords, operators, raw fragments)
/// - `Ident` - Identifier quoted per dialect at render time
///   (`users.id`, `users.*`, `users as u`)
/// - `Param` - Parameter placeholder with its bound value
#[derive(Debug, Clone, PartialEq)]
pub enum SQLChunk {
    /// Raw SQL text
    /// Renders as: text (no quotes, as-is)
    Raw(CompactString),

    /// Identifier, possibly dotted or aliased
    /// Renders as: "table"."column" (or `table`.`column` on MySQL)
    Ident(CompactString),

    /// Parameter with value
    /// Renders as: ? or $n depending on dialect
    Param(Value),
}

impl SQLChunk {
    #[inline]
    pub fn raw(text: impl Into<CompactString>) -> Self {
        Self::Raw(text.into())
    }

    #[inline]
    pub fn ident(name: impl Into<CompactString>) -> Self {
        Self::Ident(name.into())
    }

    #[inline]
    pub fn param(value: impl Into<Value>) -> Self {
        Self::Param(value.into())
    }

    /// Write chunk content to buffer. `param_index` is the 1-based position of the
    /// next placeholder and is advanced for every parameter written.
    pub(crate) fn write(&self, dialect: Dialect, param_index: &mut usize, buf: &mut String) {
        match self {
            SQLChunk::Raw(text) => buf.push_str(text),
            SQLChunk::Ident(name) => write_identifier(dialect, name, buf),
            SQLChunk::Param(_) => {
                buf.push_str(&dialect.render_placeholder(*param_index));
                *param_index += 1;
            }
        }
    }
}

/// Quotes an identifier for `dialect`.
///
/// Handles dotted paths (`schema.table.column`), the `*` wildcard and a
/// trailing `as alias`.
pub fn write_identifier(dialect: Dialect, name: &str, buf: &mut String) {
    if let Some((expr, alias)) = split_alias(name) {
        write_identifier(dialect, expr, buf);
        buf.push_str(" as ");
        write_segment(dialect, alias, buf);
        return;
    }
    for (i, segment) in name.split('.').enumerate() {
        if i > 0 {
            buf.push('.');
        }
        write_segment(dialect, segment, buf);
    }
}

fn write_segment(dialect: Dialect, segment: &str, buf: &mut String) {
    if segment == "*" {
        buf.push('*');
        return;
    }
    let quote = dialect.quote_char();
    buf.push(quote);
    for ch in segment.chars() {
        if ch == quote {
            buf.push(quote);
        }
        buf.push(ch);
    }
    buf.push(quote);
}

/// Splits `"expr as alias"` (case-insensitive `as`) into its parts.
pub(crate) fn split_alias(name: &str) -> Option<(&str, &str)> {
    let lower = name.to_ascii_lowercase();
    let index = lower.rfind(" as ")?;
    let expr = name[..index].trim();
    let alias = name[index + 4..].trim();
    if expr.is_empty() || alias.is_empty() {
        return None;
    }
    Some((expr, alias))
}

/// Renders an identifier as a standalone string.
pub fn quote_identifier(dialect: Dialect, name: &str) -> String {
    let mut buf = String::with_capacity(name.len() + 4);
    write_identifier(dialect, name, &mut buf);
    buf
}

impl std::fmt::Display for SQLChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SQLChunk::Raw(text) => f.write_str(text),
            SQLChunk::Ident(name) => f.write_str(name),
            SQLChunk::Param(_) => f.write_char('?'),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_per_dialect() {
        assert_eq!(quote_identifier(Dialect::SQLite, "users.id"), r#""users"."id""#);
        assert_eq!(quote_identifier(Dialect::MySQL, "users.*"), "`users`.*");
        assert_eq!(
            quote_identifier(Dialect::PostgreSQL, "users AS u"),
            r#""users" as "u""#
        );
    }

    #[test]
    fn quote_characters_are_escaped() {
        assert_eq!(quote_identifier(Dialect::SQLite, r#"we"ird"#), r#""we""ird""#);
    }
}
