mod chunk;

pub use chunk::{SQLChunk, quote_identifier, write_identifier};
pub(crate) use chunk::split_alias;

use compact_str::CompactString;
use smallvec::SmallVec;

use crate::dialect::Dialect;
use crate::error::{RelqError, Result};
use crate::value::Value;

/// A SQL statement or fragment with parameters.
///
/// Text and parameters live in a single ordered chunk list, so the order in
/// which [`SQL::build`] renders placeholders is, by construction, the order in
/// which it returns the bound values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SQL {
    /// The chunks that make up this SQL statement or fragment.
    pub chunks: SmallVec<[SQLChunk; 8]>,
}

impl SQL {
    /// Creates a new empty SQL fragment.
    pub const fn empty() -> Self {
        Self {
            chunks: SmallVec::new_const(),
        }
    }

    /// Creates a new SQL fragment from raw text.
    ///
    /// The string is treated as literal SQL text, not a parameter.
    pub fn raw(text: impl Into<CompactString>) -> Self {
        let mut sql = Self::empty();
        sql.push_raw(text);
        sql
    }

    /// Creates a quoted identifier fragment.
    pub fn ident(name: impl Into<CompactString>) -> Self {
        let mut sql = Self::empty();
        sql.push_ident(name);
        sql
    }

    /// Creates a single-parameter fragment.
    pub fn param(value: impl Into<Value>) -> Self {
        let mut sql = Self::empty();
        sql.push_param(value);
        sql
    }

    /// Creates a fragment from raw text containing `?` placeholders and the
    /// values bound to them, in order.
    ///
    /// `??` is an escaped literal question mark. Question marks inside single
    /// quoted literals are left alone. A placeholder/binding count mismatch is
    /// an error rather than something to paper over.
    pub fn raw_with_bindings(text: &str, bindings: Vec<Value>) -> Result<Self> {
        let mut sql = Self::empty();
        let mut values = bindings.into_iter();
        let mut pending = String::new();
        let mut placeholders = 0usize;
        let mut in_literal = false;
        let mut chars = text.chars().peekable();
        let total = values.len();

        while let Some(ch) = chars.next() {
            match ch {
                '\'' => {
                    in_literal = !in_literal;
                    pending.push(ch);
                }
                '?' if !in_literal => {
                    if chars.peek() == Some(&'?') {
                        chars.next();
                        pending.push('?');
                        continue;
                    }
                    placeholders += 1;
                    if !pending.is_empty() {
                        sql.push_raw(std::mem::take(&mut pending));
                    }
                    match values.next() {
                        Some(value) => sql.push_param(value),
                        None => {
                            return Err(RelqError::BindingMismatch {
                                sql: text.to_string(),
                                placeholders: count_placeholders(text),
                                bindings: total,
                            });
                        }
                    }
                }
                _ => pending.push(ch),
            }
        }
        if !pending.is_empty() {
            sql.push_raw(pending);
        }
        if placeholders != total {
            return Err(RelqError::BindingMismatch {
                sql: text.to_string(),
                placeholders,
                bindings: total,
            });
        }
        Ok(sql)
    }

    pub fn push_raw(&mut self, text: impl Into<CompactString>) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        // Merge adjacent text so the chunk list stays short.
        if let Some(SQLChunk::Raw(last)) = self.chunks.last_mut() {
            last.push_str(&text);
        } else {
            self.chunks.push(SQLChunk::Raw(text));
        }
    }

    pub fn push_ident(&mut self, name: impl Into<CompactString>) {
        self.chunks.push(SQLChunk::ident(name));
    }

    pub fn push_param(&mut self, value: impl Into<Value>) {
        self.chunks.push(SQLChunk::param(value));
    }

    /// Appends another SQL fragment, moving its chunks in order.
    pub fn append(&mut self, other: SQL) {
        for chunk in other.chunks {
            match chunk {
                SQLChunk::Raw(text) => self.push_raw(text),
                chunk => self.chunks.push(chunk),
            }
        }
    }

    /// Builder-style [`SQL::append`].
    pub fn with(mut self, other: SQL) -> Self {
        self.append(other);
        self
    }

    /// Builder-style [`SQL::push_raw`].
    pub fn text(mut self, text: impl Into<CompactString>) -> Self {
        self.push_raw(text);
        self
    }

    /// Joins multiple SQL fragments with a separator.
    pub fn join<I>(sqls: I, separator: &str) -> SQL
    where
        I: IntoIterator<Item = SQL>,
    {
        let mut out = SQL::empty();
        for (i, sql) in sqls.into_iter().enumerate() {
            if i > 0 {
                out.push_raw(separator);
            }
            out.append(sql);
        }
        out
    }

    /// Wraps the fragment in parentheses.
    pub fn parens(self) -> SQL {
        SQL::raw("(").with(self).text(")")
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Number of bound parameters.
    pub fn param_count(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| matches!(c, SQLChunk::Param(_)))
            .count()
    }

    /// Parameter values in placeholder order.
    pub fn params(&self) -> impl Iterator<Item = &Value> {
        self.chunks.iter().filter_map(|c| match c {
            SQLChunk::Param(value) => Some(value),
            _ => None,
        })
    }

    /// Renders the SQL text and returns the bindings in placeholder order.
    pub fn build(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut buf = String::with_capacity(self.chunks.len().saturating_mul(12).max(64));
        let mut params = Vec::with_capacity(self.param_count());
        let mut index = 1usize;
        for chunk in &self.chunks {
            chunk.write(dialect, &mut index, &mut buf);
            if let SQLChunk::Param(value) = chunk {
                params.push(value.clone());
            }
        }
        (buf, params)
    }

    /// Renders only the SQL text.
    pub fn sql(&self, dialect: Dialect) -> String {
        self.build(dialect).0
    }
}

impl From<&str> for SQL {
    fn from(s: &str) -> Self {
        SQL::raw(s)
    }
}

impl std::fmt::Display for SQL {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.sql(Dialect::SQLite))
    }
}

/// Counts `?` placeholders the same way [`SQL::raw_with_bindings`] does.
pub fn count_placeholders(text: &str) -> usize {
    let mut count = 0;
    let mut in_literal = false;
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\'' => in_literal = !in_literal,
            '?' if !in_literal => {
                if chars.peek() == Some(&'?') {
                    chars.next();
                } else {
                    count += 1;
                }
            }
            _ => {}
        }
    }
    count
}
